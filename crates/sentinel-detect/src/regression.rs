use chrono::Duration;
use sentinel_config::RegressionConfig;
use sentinel_core::{CycleView, DeltaState};
use sentinel_types::{Evidence, Finding, ScenarioKind, Subject};

use crate::baseline::BaselineTable;
use crate::detector::Detector;

/// 性能回退：区间平均耗时持续高于基线
pub struct RegressionDetector {
    config: RegressionConfig,
    baselines: BaselineTable,
    /// 检测周期序号
    cycle: u64,
}

impl RegressionDetector {
    pub fn new(config: RegressionConfig) -> Self {
        let ttl = Duration::seconds(config.ttl_secs.min(i64::MAX as u64) as i64);
        let baselines = BaselineTable::new(config.max_tracked, ttl);
        Self {
            config,
            baselines,
            cycle: 0,
        }
    }

    pub fn baselines(&self) -> &BaselineTable {
        &self.baselines
    }
}

impl Detector for RegressionDetector {
    fn kind(&self) -> ScenarioKind {
        ScenarioKind::Regression
    }

    fn name(&self) -> &'static str {
        "regression"
    }

    fn needs_history(&self) -> bool {
        true
    }

    fn detect(&mut self, view: &CycleView) -> Vec<Finding> {
        self.cycle = self.cycle.wrapping_add(1);
        let evicted = self.baselines.evict_expired(view.now);
        if evicted > 0 {
            tracing::debug!(instance = %view.instance_id, evicted, "Idle baselines evicted");
        }

        let mut findings = Vec::new();
        for (key, state) in view.deltas() {
            let delta = match state {
                DeltaState::Valid(delta) => delta,
                DeltaState::New | DeltaState::Reset | DeltaState::Inconsistent { .. } => {
                    if let Some(entry) = self.baselines.get_mut(key) {
                        entry.clear_streak();
                    }
                    continue;
                }
            };
            // 样本不足的周期打断连续计数，但不更新基线
            if delta.calls < self.config.min_calls {
                if let Some(entry) = self.baselines.get_mut(key) {
                    entry.clear_streak();
                }
                continue;
            }

            let mean = delta.mean_time_ms();
            let entry = self.baselines.entry(key, view.now);

            if entry.samples < self.config.warmup_cycles {
                entry.feed(mean, self.config.ema_alpha);
                continue;
            }

            let limit = entry.ema_ms * (1.0 + self.config.threshold);
            if entry.ema_ms <= 0.0 || mean <= limit {
                entry.clear_streak();
                entry.feed(mean, self.config.ema_alpha);
                continue;
            }

            // 超出基线的周期不计入基线；本区间未出现的查询由周期序号断开连续计数
            let streak = entry.record_breach(self.cycle);
            if streak < self.config.consecutive_cycles {
                continue;
            }

            let baseline = entry.ema_ms;
            let stat = view.stat(key);
            findings.push(
                Finding::new(
                    view.instance_id.clone(),
                    ScenarioKind::Regression,
                    Subject::query(key.clone()),
                    Evidence::Regression {
                        baseline_mean_ms: baseline,
                        current_mean_ms: mean,
                        deviation: (mean - baseline) / baseline,
                        consecutive_cycles: streak,
                        delta_calls: delta.calls,
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
