use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 查询指纹（跨快照的稳定关联键）
///
/// 由 pg_stat_statements 的 `(dbid, userid, queryid)` 组成。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn from_parts(dbid: i64, userid: i64, queryid: i64) -> Self {
        Self(format!("{}:{}:{}", dbid, userid, queryid))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 单个查询指纹在某一时刻的累计计数器
///
/// 计数器自扩展上次重置以来单调递增，分析的单位是两次快照之间的差值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryStat {
    /// 调用次数
    pub calls: u64,

    /// 累计执行耗时（毫秒）
    pub total_time_ms: f64,

    /// 累计返回行数
    pub rows: u64,

    /// CPU 耗时（毫秒），仅在 pg_stat_kcache 可用时存在
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_time_ms: Option<f64>,

    /// I/O 耗时（毫秒），仅在 pg_stat_kcache 可用时存在
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_time_ms: Option<f64>,

    /// 所属数据库名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// 归一化后的 SQL 文本
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl QueryStat {
    pub fn new(calls: u64, total_time_ms: f64) -> Self {
        Self {
            calls,
            total_time_ms,
            rows: 0,
            cpu_time_ms: None,
            io_time_ms: None,
            database: None,
            query: None,
        }
    }

    pub fn with_rows(mut self, rows: u64) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_kcache(mut self, cpu_time_ms: f64, io_time_ms: f64) -> Self {
        self.cpu_time_ms = Some(cpu_time_ms);
        self.io_time_ms = Some(io_time_ms);
        self
    }

    pub fn with_query(mut self, database: impl Into<String>, query: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self.query = Some(query.into());
        self
    }

    /// 平均执行耗时（毫秒）
    pub fn mean_time_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_time_ms / self.calls as f64
        }
    }
}

/// 由 pg_qualstats 汇总出的谓词集合，即候选索引
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexCandidate {
    /// 表名（schema.table）
    pub table: String,

    /// 谓词涉及的列，按列名排序
    pub columns: Vec<String>,

    /// 索引访问方法
    #[serde(default = "default_access_method")]
    pub access_method: String,

    /// 谓词被执行的次数
    pub execution_count: u64,

    /// 被谓词过滤掉的行数
    pub rows_filtered: u64,

    /// 是否已有可用索引（首列命中谓词列）
    pub has_index: bool,

    /// 引用该谓词集合的查询
    #[serde(default)]
    pub query_ids: Vec<QueryKey>,

    /// hypopg 评估的计划代价下降比例（0.0-1.0）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_benefit: Option<f64>,
}

fn default_access_method() -> String {
    "btree".to_string()
}

impl IndexCandidate {
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
            access_method: default_access_method(),
            execution_count: 0,
            rows_filtered: 0,
            has_index: false,
            query_ids: Vec::new(),
            estimated_benefit: None,
        }
    }

    /// 建议索引的 DDL
    pub fn ddl(&self) -> String {
        format!(
            "CREATE INDEX ON {} USING {} ({})",
            self.table,
            self.access_method,
            self.columns.join(", ")
        )
    }

    /// 每次执行平均过滤的行数
    pub fn rows_filtered_per_execution(&self) -> f64 {
        if self.execution_count == 0 {
            0.0
        } else {
            self.rows_filtered as f64 / self.execution_count as f64
        }
    }
}

/// 可选扩展
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionalFeature {
    /// pg_stat_kcache：CPU / I/O 拆分
    Kcache,
    /// pg_qualstats：谓词统计
    Qualstats,
    /// hypopg：假设索引评估
    Hypopg,
}

impl OptionalFeature {
    pub fn extension_name(&self) -> &'static str {
        match self {
            OptionalFeature::Kcache => "pg_stat_kcache",
            OptionalFeature::Qualstats => "pg_qualstats",
            OptionalFeature::Hypopg => "hypopg",
        }
    }
}

impl fmt::Display for OptionalFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension_name())
    }
}

/// 某个监控实例在某一时刻的统计快照
///
/// 一旦写入快照存储即不可变，只会被新的快照取代。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub instance_id: String,
    pub captured_at: DateTime<Utc>,
    pub stats: BTreeMap<QueryKey, QueryStat>,

    /// `None` 表示本周期没有谓词统计数据
    #[serde(default)]
    pub index_candidates: Option<Vec<IndexCandidate>>,

    /// 本快照是否带有 kcache 数据
    #[serde(default)]
    pub kcache: bool,
}

impl Snapshot {
    pub fn new(instance_id: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            instance_id: instance_id.into(),
            captured_at,
            stats: BTreeMap::new(),
            index_candidates: None,
            kcache: false,
        }
    }

    pub fn with_stat(mut self, key: QueryKey, stat: QueryStat) -> Self {
        if stat.cpu_time_ms.is_some() {
            self.kcache = true;
        }
        self.stats.insert(key, stat);
        self
    }

    pub fn with_index_candidates(mut self, candidates: Vec<IndexCandidate>) -> Self {
        self.index_candidates = Some(candidates);
        self
    }

    pub fn get(&self, key: &QueryKey) -> Option<&QueryStat> {
        self.stats.get(key)
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_key_from_parts() {
        let key = QueryKey::from_parts(16384, 10, -4242);
        assert_eq!(key.as_str(), "16384:10:-4242");
    }

    #[test]
    fn test_mean_time() {
        assert_eq!(QueryStat::new(0, 10.0).mean_time_ms(), 0.0);
        assert_eq!(QueryStat::new(4, 10.0).mean_time_ms(), 2.5);
    }

    #[test]
    fn test_index_candidate_ddl() {
        let candidate = IndexCandidate::new(
            "public.orders",
            vec!["customer_id".to_string(), "status".to_string()],
        );
        assert_eq!(
            candidate.ddl(),
            "CREATE INDEX ON public.orders USING btree (customer_id, status)"
        );
    }

    #[test]
    fn test_snapshot_kcache_flag() {
        let snapshot = Snapshot::new("pg-main", Utc::now())
            .with_stat(QueryKey::new("1:1:1"), QueryStat::new(1, 1.0));
        assert!(!snapshot.kcache);

        let snapshot = snapshot.with_stat(
            QueryKey::new("1:1:2"),
            QueryStat::new(1, 1.0).with_kcache(0.5, 0.2),
        );
        assert!(snapshot.kcache);
        assert_eq!(snapshot.len(), 2);
    }
}
