use sentinel_types::{IndexCandidate, QueryKey};
use std::collections::BTreeMap;

/// pg_qualstats 聚合后的一行
#[derive(Debug, Clone, PartialEq)]
pub struct QualRow {
    pub table: String,
    pub columns: Vec<String>,
    pub execution_count: i64,
    pub rows_filtered: i64,
    pub query_ids: Vec<QueryKey>,
    pub has_index: bool,
}

/// 合并同一张表同一组列的谓词
///
/// 不同 qualid 可能落在相同的列组合上：执行次数取最大，过滤行数累加，
/// 任一条已有索引则视为已有索引。
pub fn merge_candidates(rows: Vec<QualRow>) -> Vec<IndexCandidate> {
    let mut merged: BTreeMap<(String, Vec<String>), IndexCandidate> = BTreeMap::new();

    for row in rows {
        let mut columns = row.columns;
        columns.sort();
        columns.dedup();
        if columns.is_empty() {
            continue;
        }

        let entry = merged
            .entry((row.table.clone(), columns.clone()))
            .or_insert_with(|| IndexCandidate::new(row.table.clone(), columns));

        entry.execution_count = entry
            .execution_count
            .max(row.execution_count.max(0) as u64);
        entry.rows_filtered = entry
            .rows_filtered
            .saturating_add(row.rows_filtered.max(0) as u64);
        entry.has_index |= row.has_index;
        for id in row.query_ids {
            if !entry.query_ids.contains(&id) {
                entry.query_ids.push(id);
            }
        }
    }

    merged.into_values().collect()
}

/// 从 `EXPLAIN (FORMAT JSON)` 的输出中取根节点总代价
pub fn plan_total_cost(plan: &serde_json::Value) -> Option<f64> {
    plan.get(0)?
        .get("Plan")?
        .get("Total Cost")?
        .as_f64()
}

/// 假设索引带来的代价降低比例，限定在 [0, 1]
pub fn estimated_benefit(cost_before: f64, cost_after: f64) -> Option<f64> {
    if !(cost_before.is_finite() && cost_after.is_finite()) || cost_before <= 0.0 {
        return None;
    }
    Some(((cost_before - cost_after) / cost_before).clamp(0.0, 1.0))
}

/// 只对单条 SELECT 做 EXPLAIN
pub fn is_explainable(query: &str) -> bool {
    let trimmed = query.trim().trim_end_matches(';').trim_end();
    let head: String = trimmed.chars().take(6).collect();
    head.eq_ignore_ascii_case("select") && !trimmed.contains(';')
}
