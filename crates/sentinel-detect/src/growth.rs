use sentinel_config::GrowthConfig;
use sentinel_core::{CycleView, PriorDelta, QueryDelta};
use sentinel_types::{Evidence, Finding, GrowthMetric, ScenarioKind, Subject};

use crate::detector::Detector;

/// 异常增长：本区间与上一区间对比
pub struct GrowthDetector {
    config: GrowthConfig,
}

impl GrowthDetector {
    pub fn new(config: GrowthConfig) -> Self {
        Self { config }
    }

    fn value(&self, delta: &QueryDelta) -> f64 {
        match self.config.metric {
            GrowthMetric::Duration => delta.total_time_ms,
            GrowthMetric::Calls => delta.calls as f64,
        }
    }
}

impl Detector for GrowthDetector {
    fn kind(&self) -> ScenarioKind {
        ScenarioKind::AbnormalGrowth
    }

    fn name(&self) -> &'static str {
        "abnormal_growth"
    }

    fn needs_history(&self) -> bool {
        true
    }

    fn detect(&mut self, view: &CycleView) -> Vec<Finding> {
        if !view.has_prior_interval() {
            return Vec::new();
        }

        let mut findings = Vec::new();
        for (key, state) in view.deltas() {
            let Some(current) = state.valid() else {
                continue;
            };
            if current.calls < self.config.min_calls {
                continue;
            }

            let prior_value = match view.prior(key) {
                PriorDelta::Valid(prior) if prior.calls > 0 => self.value(prior),
                PriorDelta::Valid(_) | PriorDelta::Absent => 0.0,
                PriorDelta::Unusable | PriorDelta::NoHistory => continue,
            };

            let current_value = self.value(current);
            // 上一区间没有执行时按本区间绝对值计
            let ratio = if prior_value > 0.0 {
                current_value / prior_value
            } else {
                current_value
            };

            if ratio < self.config.multiplier {
                continue;
            }

            let stat = view.stat(key);
            findings.push(
                Finding::new(
                    view.instance_id.clone(),
                    ScenarioKind::AbnormalGrowth,
                    Subject::query(key.clone()),
                    Evidence::Growth {
                        metric: self.config.metric,
                        current_delta: current_value,
                        prior_delta: prior_value,
                        ratio,
                        delta_calls: current.calls,
                    },
                    view.now,
                )
                .with_context(
                    stat.and_then(|s| s.database.clone()),
                    stat.and_then(|s| s.query.clone()),
                ),
            );
        }
        findings
    }
}
