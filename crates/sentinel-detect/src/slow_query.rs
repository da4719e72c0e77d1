use sentinel_config::SlowQueryConfig;
use sentinel_core::{CycleView, QueryDelta};
use sentinel_types::{
    Evidence, Finding, OptionalFeature, QueryKey, ScenarioKind, Subject,
};
use std::cmp::Ordering;

use crate::detector::Detector;

/// 慢查询 Top-N
///
/// 按区间耗时排名；快照带有 kcache 数据时按 CPU + I/O 耗时排名。
pub struct SlowQueryDetector {
    config: SlowQueryConfig,
}

struct Ranked<'a> {
    key: &'a QueryKey,
    delta: &'a QueryDelta,
    weight: f64,
    weighted_by_kcache: bool,
}

impl SlowQueryDetector {
    pub fn new(config: SlowQueryConfig) -> Self {
        Self { config }
    }

    fn rank(a: &Ranked<'_>, b: &Ranked<'_>) -> Ordering {
        b.weight
            .total_cmp(&a.weight)
            .then_with(|| b.delta.calls.cmp(&a.delta.calls))
            .then_with(|| a.key.cmp(b.key))
    }
}

impl Detector for SlowQueryDetector {
    fn kind(&self) -> ScenarioKind {
        ScenarioKind::SlowQueryTopN
    }

    fn name(&self) -> &'static str {
        "slow_query_top_n"
    }

    fn needs_history(&self) -> bool {
        true
    }

    fn detect(&mut self, view: &CycleView) -> Vec<Finding> {
        let use_kcache = view.current.kcache && view.feature_available(OptionalFeature::Kcache);

        let mut ranked: Vec<Ranked<'_>> = view
            .deltas()
            .filter_map(|(key, state)| {
                let delta = state.valid()?;
                let kcache_time = if use_kcache {
                    delta.kcache_time_ms()
                } else {
                    None
                };
                Some(Ranked {
                    key,
                    delta,
                    weight: kcache_time.unwrap_or(delta.total_time_ms),
                    weighted_by_kcache: kcache_time.is_some(),
                })
            })
            .filter(|r| {
                r.weight >= self.config.min_delta_time_ms && r.delta.calls >= self.config.min_calls
            })
            .collect();

        ranked.sort_by(Self::rank);
        ranked.truncate(self.config.top_n);

        ranked
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                let stat = view.stat(r.key);
                Finding::new(
                    view.instance_id.clone(),
                    ScenarioKind::SlowQueryTopN,
                    Subject::query(r.key.clone()),
                    Evidence::SlowQuery {
                        rank: i + 1,
                        delta_time_ms: r.weight,
                        delta_calls: r.delta.calls,
                        mean_time_ms: r.delta.mean_time_ms(),
                        cpu_time_ms: r.delta.cpu_time_ms,
                        io_time_ms: r.delta.io_time_ms,
                        weighted_by_kcache: r.weighted_by_kcache,
                    },
                    view.now,
                )
                .with_context(
                    stat.and_then(|s| s.database.clone()),
                    stat.and_then(|s| s.query.clone()),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, view_from, views_from_snapshots, StatSeries};
    use sentinel_core::Degradation;
    use sentinel_types::{QueryStat, Snapshot};

    fn detector(top_n: usize) -> SlowQueryDetector {
        SlowQueryDetector::new(SlowQueryConfig {
            top_n,
            min_delta_time_ms: 100.0,
            ..SlowQueryConfig::default()
        })
    }

    fn ranks(findings: &[Finding]) -> Vec<String> {
        findings
            .iter()
            .map(|f| f.subject.query_key().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_top_n_ordering() {
        let view = view_from(
            &[
                StatSeries::new("1:1:1", &[(0, 0.0), (10, 500.0)]),
                StatSeries::new("1:1:2", &[(0, 0.0), (10, 3000.0)]),
                StatSeries::new("1:1:3", &[(0, 0.0), (10, 50.0)]),
                StatSeries::new("1:1:4", &[(0, 0.0), (10, 1200.0)]),
            ],
            Vec::new(),
        );

        let findings = detector(2).detect(&view);
        assert_eq!(ranks(&findings), vec!["1:1:2", "1:1:4"]);
        match &findings[0].evidence {
            Evidence::SlowQuery { rank, delta_time_ms, .. } => {
                assert_eq!(*rank, 1);
                assert_eq!(*delta_time_ms, 3000.0);
            }
            other => panic!("unexpected evidence: {:?}", other),
        }
    }

    #[test]
    fn test_ties_break_on_calls_then_key() {
        let series = [
            StatSeries::new("1:1:c", &[(0, 0.0), (5, 1000.0)]),
            StatSeries::new("1:1:b", &[(0, 0.0), (9, 1000.0)]),
            StatSeries::new("1:1:a", &[(0, 0.0), (5, 1000.0)]),
        ];

        // 多次运行结果一致
        for _ in 0..3 {
            let view = view_from(&series, Vec::new());
            let findings = detector(3).detect(&view);
            assert_eq!(ranks(&findings), vec!["1:1:b", "1:1:a", "1:1:c"]);
        }
    }

    #[test]
    fn test_reset_fingerprint_excluded() {
        let view = view_from(
            &[
                StatSeries::new("1:1:1", &[(100, 90_000.0), (3, 900.0)]),
                StatSeries::new("1:1:2", &[(0, 0.0), (10, 500.0)]),
            ],
            Vec::new(),
        );
        assert_eq!(ranks(&detector(5).detect(&view)), vec!["1:1:2"]);
    }

    #[test]
    fn test_reappearing_query_lifetime_time_not_ranked() {
        let key = QueryKey::new("1:1:1");
        let snapshots = vec![
            Snapshot::new("pg-test", at(0)).with_stat(key.clone(), QueryStat::new(10_000, 5_000_000.0)),
            Snapshot::new("pg-test", at(1)),
            Snapshot::new("pg-test", at(2)).with_stat(key, QueryStat::new(10_010, 5_000_010.0)),
        ];
        let view = views_from_snapshots(snapshots).pop().unwrap();

        assert!(detector(5).detect(&view).is_empty());
    }

    #[test]
    fn test_kcache_weighting() {
        let key_a = QueryKey::new("1:1:a");
        let key_b = QueryKey::new("1:1:b");
        let snapshots = vec![
            Snapshot::new("pg-test", at(0))
                .with_stat(key_a.clone(), QueryStat::new(0, 0.0).with_kcache(0.0, 0.0))
                .with_stat(key_b.clone(), QueryStat::new(0, 0.0).with_kcache(0.0, 0.0)),
            Snapshot::new("pg-test", at(1))
                // 总耗时高但多为等待
                .with_stat(key_a.clone(), QueryStat::new(10, 5000.0).with_kcache(100.0, 50.0))
                .with_stat(key_b.clone(), QueryStat::new(10, 2000.0).with_kcache(1500.0, 300.0)),
        ];
        let mut view = views_from_snapshots(snapshots).pop().unwrap();

        let findings = detector(1).detect(&view);
        assert_eq!(ranks(&findings), vec!["1:1:b"]);
        assert!(matches!(
            findings[0].evidence,
            Evidence::SlowQuery {
                weighted_by_kcache: true,
                ..
            }
        ));

        view.degraded = vec![Degradation::new(OptionalFeature::Kcache, "permission denied")];
        let findings = detector(1).detect(&view);
        assert_eq!(ranks(&findings), vec!["1:1:a"]);
    }

    #[test]
    fn test_min_calls_filter() {
        let view = view_from(&[StatSeries::new("1:1:1", &[(0, 0.0), (1, 5000.0)])], Vec::new());
        let mut detector = SlowQueryDetector::new(SlowQueryConfig {
            min_calls: 2,
            ..SlowQueryConfig::default()
        });
        assert!(detector.detect(&view).is_empty());
    }
}
