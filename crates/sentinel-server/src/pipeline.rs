use chrono::{DateTime, Utc};
use sentinel_config::InstanceConfig;
use sentinel_core::{Collector, CycleSummary, SentinelError, SnapshotStore, StatusRegistry};
use sentinel_detect::{DetectorRegistry, SeverityClassifier};
use sentinel_logging::CauseLimiter;
use sentinel_notify::DispatcherHandle;
use sentinel_suppress::{Admission, SuppressionCheckpoint, SuppressionHandle};
use sentinel_types::{Alert, Finding, Severity};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::metrics;

const SOURCE_CAUSE_PREFIX: &str = "source:";
const DEGRADED_CAUSE_PREFIX: &str = "degraded:";

/// 单个实例的分析流水线
///
/// 一个周期依次执行：采集、计算区间差值、检测、分级、去重抑制、
/// 提交快照轮转、投递告警。同一实例的周期严格串行，由调度任务保证。
pub struct InstancePipeline {
    config: InstanceConfig,
    collector: Collector,
    store: SnapshotStore,
    detectors: DetectorRegistry,
    classifier: Arc<SeverityClassifier>,
    suppression: SuppressionHandle,
    dispatcher: Arc<DispatcherHandle>,
    status: StatusRegistry,
    limiter: Arc<CauseLimiter>,
    checkpoint: Option<Arc<SuppressionCheckpoint>>,
}

/// 流水线的共享部件
#[derive(Clone)]
pub struct PipelineContext {
    pub collector: Collector,
    pub classifier: Arc<SeverityClassifier>,
    pub dispatcher: Arc<DispatcherHandle>,
    pub status: StatusRegistry,
    pub limiter: Arc<CauseLimiter>,
    pub checkpoint: Option<Arc<SuppressionCheckpoint>>,
}

impl InstancePipeline {
    pub fn new(
        config: InstanceConfig,
        detectors: DetectorRegistry,
        suppression: SuppressionHandle,
        context: PipelineContext,
    ) -> Self {
        let store = SnapshotStore::new(config.id.clone());
        Self {
            config,
            collector: context.collector,
            store,
            detectors,
            classifier: context.classifier,
            suppression,
            dispatcher: context.dispatcher,
            status: context.status,
            limiter: context.limiter,
            checkpoint: context.checkpoint,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// 执行一个周期
    ///
    /// 采集失败时整个周期跳过：不轮转快照、不更新基线与抑制记录，
    /// 下一周期重新尝试。
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleSummary, SentinelError> {
        let started = Instant::now();
        let id = self.config.id.clone();

        let collected = match self.collector.collect(&self.config, now).await {
            Ok(collected) => collected,
            Err(e) => {
                if self.limiter.should_emit(&id, e.cause_key()) {
                    warn!(instance = %id, dsn = %self.config.redacted_dsn(), "Cycle skipped: {}", e);
                } else {
                    debug!(instance = %id, "Cycle skipped: {}", e);
                }
                let err = SentinelError::from(e);
                metrics::record_cycle_failure(&id, err.kind());
                self.status.record_failure(&id, now, err.to_string()).await;
                return Err(err);
            }
        };

        for recovered in self.limiter.clear_matching(&id, SOURCE_CAUSE_PREFIX, &[]) {
            info!(instance = %id, cause = %recovered, "Source recovered");
        }
        self.log_degradations(&id, &collected.degraded);

        let degraded: Vec<String> = collected
            .degraded
            .iter()
            .map(|d| d.feature.to_string())
            .collect();

        let staged = self.store.stage(collected.snapshot, collected.degraded, now);
        let report = {
            let view = staged.view();
            for (key, counter) in view.inconsistent() {
                let violation = SentinelError::InternalInvariantViolation(format!(
                    "{} moved in the opposite direction of calls for {}",
                    counter, key
                ));
                error!(instance = %id, "{}", violation);
            }
            let resets = view.reset_count();
            if resets > 0 {
                info!(instance = %id, resets, "Counter resets detected, intervals skipped");
            }
            self.detectors.run(view)
        };

        for skipped in &report.skipped {
            debug!(instance = %id, detector = skipped.name, "Detector skipped: {}", skipped.reason);
        }

        let classified: Vec<(Finding, Severity)> = report
            .findings
            .into_iter()
            .map(|finding| {
                metrics::record_finding(finding.scenario_kind);
                let severity = self.classifier.classify(&finding);
                (finding, severity)
            })
            .collect();
        let findings = classified.len();

        let admissions = {
            let mut state = self.suppression.lock().await;
            state.admit_batch(classified, now)
        };

        self.store.commit(staged)?;

        let mut alerts: Vec<Alert> = Vec::new();
        let mut suppressed = 0;
        for admission in admissions {
            match admission {
                Admission::Emit(alert) => {
                    metrics::record_emitted(alert.severity);
                    alerts.push(alert);
                }
                Admission::Suppressed {
                    fingerprint,
                    severity,
                    suppressed_since_emit,
                    next_eligible_at,
                } => {
                    suppressed += 1;
                    metrics::record_suppressed(severity);
                    debug!(
                        instance = %id,
                        fingerprint = %fingerprint.short(),
                        suppressed_since_emit,
                        next_eligible_at = %next_eligible_at,
                        "Finding suppressed"
                    );
                }
            }
        }

        let emitted = alerts.len();
        for alert in alerts {
            info!(
                instance = %id,
                scenario = alert.finding.scenario_kind.as_str(),
                severity = %alert.severity,
                fingerprint = %alert.fingerprint.short(),
                "Alert emitted"
            );
            self.dispatcher.dispatch(alert).await;
        }

        self.save_checkpoint().await;

        let elapsed = started.elapsed();
        metrics::record_cycle(&id, elapsed);
        let summary = CycleSummary {
            findings,
            emitted,
            suppressed,
            degraded,
            skipped_detectors: report
                .skipped
                .iter()
                .map(|s| s.name.to_string())
                .collect(),
            elapsed_ms: elapsed.as_millis() as u64,
        };
        self.status.record_success(&id, now, summary.clone()).await;

        info!(
            instance = %id,
            findings,
            emitted,
            suppressed,
            elapsed_ms = summary.elapsed_ms,
            "Cycle complete"
        );
        Ok(summary)
    }

    /// 降级原因每次出现只警告一次，恢复时记一条 info
    fn log_degradations(&self, id: &str, degraded: &[sentinel_core::Degradation]) {
        let active: Vec<String> = degraded.iter().map(|d| d.cause_key()).collect();
        for degradation in degraded {
            metrics::record_degraded(id, degradation.feature.to_string());
            if self.limiter.should_emit(id, &degradation.cause_key()) {
                warn!(
                    instance = %id,
                    feature = %degradation.feature,
                    "Optional feature unavailable, dependent analysis skipped: {}",
                    degradation.reason
                );
            }
        }
        for cleared in self
            .limiter
            .clear_matching(id, DEGRADED_CAUSE_PREFIX, &active)
        {
            info!(instance = %id, cause = %cleared, "Optional feature available again");
        }
    }

    /// 抑制状态有变化时写检查点，失败只记录日志
    pub async fn save_checkpoint(&self) {
        let Some(checkpoint) = &self.checkpoint else {
            return;
        };
        let mut state = self.suppression.lock().await;
        if !state.is_dirty() {
            return;
        }
        match checkpoint.save(&state).await {
            Ok(()) => state.mark_clean(),
            Err(e) => warn!(instance = %self.config.id, "Failed to save suppression checkpoint: {}", e),
        }
    }
}
