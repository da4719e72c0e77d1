use sentinel_config::MissingIndexConfig;
use sentinel_core::CycleView;
use sentinel_types::{Evidence, Finding, IndexCandidate, OptionalFeature, ScenarioKind, Subject};
use std::cmp::Ordering;

use crate::detector::Detector;

/// 缺失索引：高频且过滤大量行、却没有可用索引的谓词
pub struct MissingIndexDetector {
    config: MissingIndexConfig,
}

impl MissingIndexDetector {
    pub fn new(config: MissingIndexConfig) -> Self {
        Self { config }
    }

    fn qualifies(&self, candidate: &IndexCandidate) -> bool {
        !candidate.has_index
            && !candidate.columns.is_empty()
            && candidate.execution_count >= self.config.min_executions
            && candidate.rows_filtered >= self.config.min_rows_filtered
            && candidate
                .estimated_benefit
                .map_or(true, |benefit| benefit >= self.config.min_benefit)
    }

    fn compare(a: &IndexCandidate, b: &IndexCandidate) -> Ordering {
        let benefit = |c: &IndexCandidate| c.estimated_benefit.unwrap_or(-1.0);
        benefit(b)
            .total_cmp(&benefit(a))
            .then_with(|| b.rows_filtered.cmp(&a.rows_filtered))
            .then_with(|| (&a.table, &a.columns).cmp(&(&b.table, &b.columns)))
    }
}

impl Detector for MissingIndexDetector {
    fn kind(&self) -> ScenarioKind {
        ScenarioKind::MissingIndex
    }

    fn name(&self) -> &'static str {
        "missing_index"
    }

    fn needs_history(&self) -> bool {
        false
    }

    fn required_feature(&self) -> Option<OptionalFeature> {
        Some(OptionalFeature::Qualstats)
    }

    fn detect(&mut self, view: &CycleView) -> Vec<Finding> {
        let Some(candidates) = view.current.index_candidates.as_ref() else {
            return Vec::new();
        };

        let mut selected: Vec<&IndexCandidate> =
            candidates.iter().filter(|c| self.qualifies(c)).collect();
        selected.sort_by(|a, b| Self::compare(a, b));
        selected.truncate(self.config.max_candidates);

        selected
            .into_iter()
            .map(|candidate| {
                let query = candidate
                    .query_ids
                    .iter()
                    .find_map(|key| view.stat(key))
                    .cloned();
                Finding::new(
                    view.instance_id.clone(),
                    ScenarioKind::MissingIndex,
                    Subject::index(candidate.table.clone(), candidate.columns.clone()),
                    Evidence::MissingIndex {
                        execution_count: candidate.execution_count,
                        rows_filtered: candidate.rows_filtered,
                        estimated_benefit: candidate.estimated_benefit,
                        ddl: candidate.ddl(),
                    },
                    view.now,
                )
                .with_context(
                    query.as_ref().and_then(|s| s.database.clone()),
                    query.and_then(|s| s.query),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::view_with_candidates;

    fn candidate(table: &str, executions: u64, rows: u64, benefit: Option<f64>) -> IndexCandidate {
        let mut c = IndexCandidate::new(table, vec!["customer_id".to_string()]);
        c.execution_count = executions;
        c.rows_filtered = rows;
        c.estimated_benefit = benefit;
        c
    }

    fn detector() -> MissingIndexDetector {
        MissingIndexDetector::new(MissingIndexConfig::default())
    }

    #[test]
    fn test_runs_on_first_cycle() {
        let view = view_with_candidates(Some(vec![candidate("public.orders", 500, 50_000, None)]));
        assert!(!view.has_history());

        let findings = detector().detect(&view);
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].subject,
            Subject::index("public.orders", vec!["customer_id".to_string()])
        );
        assert!(matches!(
            &findings[0].evidence,
            Evidence::MissingIndex { ddl, .. } if ddl == "CREATE INDEX ON public.orders USING btree (customer_id)"
        ));
    }

    #[test]
    fn test_thresholds_and_existing_index() {
        let mut indexed = candidate("public.indexed", 500, 50_000, None);
        indexed.has_index = true;
        let view = view_with_candidates(Some(vec![
            indexed,
            candidate("public.rare", 10, 50_000, None),
            candidate("public.selective", 500, 100, None),
            candidate("public.low_benefit", 500, 50_000, Some(0.1)),
            candidate("public.good", 500, 50_000, Some(0.6)),
        ]));

        let findings = detector().detect(&view);
        let tables: Vec<String> = findings.iter().map(|f| f.subject.canonical()).collect();
        assert_eq!(tables, vec!["index:public.good(customer_id)"]);
    }

    #[test]
    fn test_no_qualstats_section() {
        let view = view_with_candidates(None);
        assert!(detector().detect(&view).is_empty());
    }

    #[test]
    fn test_max_candidates_prefers_benefit() {
        let view = view_with_candidates(Some(vec![
            candidate("public.a", 500, 90_000, None),
            candidate("public.b", 500, 20_000, Some(0.9)),
            candidate("public.c", 500, 30_000, Some(0.4)),
        ]));
        let mut detector = MissingIndexDetector::new(MissingIndexConfig {
            max_candidates: 2,
            ..MissingIndexConfig::default()
        });

        let findings = detector.detect(&view);
        let tables: Vec<String> = findings.iter().map(|f| f.subject.canonical()).collect();
        assert_eq!(
            tables,
            vec!["index:public.b(customer_id)", "index:public.c(customer_id)"]
        );
    }
}
