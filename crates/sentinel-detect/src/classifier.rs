use sentinel_config::{ScenariosConfig, SeverityThresholds};
use sentinel_types::{Evidence, Finding, Severity};

/// 按阈值分级，低于 `l2` 为 L1
pub fn grade(value: f64, thresholds: &SeverityThresholds) -> Severity {
    if value >= thresholds.l3 {
        Severity::L3
    } else if value >= thresholds.l2 {
        Severity::L2
    } else {
        Severity::L1
    }
}

/// 告警级别分类器
///
/// 每个场景按自己的主指标查表：
/// - 慢查询：区间耗时（毫秒）
/// - 异常增长：增长倍数
/// - 性能回退：相对基线的偏离比例
/// - 缺失索引：hypopg 预计代价下降比例，没有评估时用每次执行过滤的行数
#[derive(Debug, Clone)]
pub struct SeverityClassifier {
    slow_query: SeverityThresholds,
    growth: SeverityThresholds,
    regression: SeverityThresholds,
    index_benefit: SeverityThresholds,
    index_rows: SeverityThresholds,
}

impl SeverityClassifier {
    pub fn from_config(config: &ScenariosConfig) -> Self {
        Self {
            slow_query: config.slow_query.severity,
            growth: config.growth.severity,
            regression: config.regression.severity,
            index_benefit: config.missing_index.severity,
            index_rows: config.missing_index.rows_severity,
        }
    }

    pub fn classify(&self, finding: &Finding) -> Severity {
        match &finding.evidence {
            Evidence::SlowQuery { delta_time_ms, .. } => grade(*delta_time_ms, &self.slow_query),
            Evidence::Growth { ratio, .. } => grade(*ratio, &self.growth),
            Evidence::Regression { deviation, .. } => grade(*deviation, &self.regression),
            Evidence::MissingIndex {
                estimated_benefit: Some(benefit),
                ..
            } => grade(*benefit, &self.index_benefit),
            Evidence::MissingIndex {
                execution_count,
                rows_filtered,
                estimated_benefit: None,
                ..
            } => {
                let per_execution = if *execution_count == 0 {
                    0.0
                } else {
                    *rows_filtered as f64 / *execution_count as f64
                };
                grade(per_execution, &self.index_rows)
            }
        }
    }
}

impl Default for SeverityClassifier {
    fn default() -> Self {
        Self::from_config(&ScenariosConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sentinel_types::{GrowthMetric, QueryKey, ScenarioKind, Subject};

    fn growth(ratio: f64) -> Finding {
        Finding::new(
            "pg",
            ScenarioKind::AbnormalGrowth,
            Subject::query(QueryKey::new("1:1:1")),
            Evidence::Growth {
                metric: GrowthMetric::Duration,
                current_delta: ratio * 100.0,
                prior_delta: 100.0,
                ratio,
                delta_calls: 10,
            },
            Utc::now(),
        )
    }

    fn index(executions: u64, rows: u64, benefit: Option<f64>) -> Finding {
        Finding::new(
            "pg",
            ScenarioKind::MissingIndex,
            Subject::index("public.t", vec!["a".to_string()]),
            Evidence::MissingIndex {
                execution_count: executions,
                rows_filtered: rows,
                estimated_benefit: benefit,
                ddl: String::new(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_grade_boundaries() {
        let t = SeverityThresholds::new(5.0, 10.0);
        assert_eq!(grade(4.99, &t), Severity::L1);
        assert_eq!(grade(5.0, &t), Severity::L2);
        assert_eq!(grade(10.0, &t), Severity::L3);
    }

    #[test]
    fn test_growth_grading() {
        let classifier = SeverityClassifier::default();
        assert_eq!(classifier.classify(&growth(4.0)), Severity::L1);
        assert_eq!(classifier.classify(&growth(6.0)), Severity::L2);
        assert_eq!(classifier.classify(&growth(12.0)), Severity::L3);
    }

    #[test]
    fn test_missing_index_grading() {
        let classifier = SeverityClassifier::default();
        assert_eq!(classifier.classify(&index(100, 100_000, Some(0.9))), Severity::L3);
        assert_eq!(classifier.classify(&index(100, 100_000, Some(0.35))), Severity::L1);
        // 没有 hypopg 评估时按每次执行过滤行数
        assert_eq!(classifier.classify(&index(100, 100_000, None)), Severity::L1);
        assert_eq!(classifier.classify(&index(100, 2_000_000, None)), Severity::L2);
    }

    #[test]
    fn test_deterministic() {
        let classifier = SeverityClassifier::default();
        let finding = growth(7.5);
        let first = classifier.classify(&finding);
        for _ in 0..10 {
            assert_eq!(classifier.classify(&finding), first);
        }
    }
}
