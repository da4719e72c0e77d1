use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// 一个成功周期的摘要
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    pub findings: usize,
    pub emitted: usize,
    pub suppressed: usize,
    pub degraded: Vec<String>,
    pub skipped_detectors: Vec<String>,
    pub elapsed_ms: u64,
}

/// 实例运行状态
#[derive(Debug, Clone, Serialize, Default)]
pub struct InstanceStatus {
    pub instance_id: String,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub degraded: Vec<String>,
    pub skipped_detectors: Vec<String>,
    pub cycles: u64,
    pub failures: u64,
    pub findings: u64,
    pub alerts_emitted: u64,
    pub alerts_suppressed: u64,
    pub last_cycle_ms: Option<u64>,
}

impl InstanceStatus {
    pub fn healthy(&self) -> bool {
        self.consecutive_failures == 0
    }
}

/// 所有实例的状态表，供状态接口读取
#[derive(Debug, Clone, Default)]
pub struct StatusRegistry {
    inner: Arc<RwLock<HashMap<String, InstanceStatus>>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, instance_id: &str) {
        let mut inner = self.inner.write().await;
        inner
            .entry(instance_id.to_string())
            .or_insert_with(|| InstanceStatus {
                instance_id: instance_id.to_string(),
                ..Default::default()
            });
    }

    pub async fn record_success(&self, instance_id: &str, at: DateTime<Utc>, summary: CycleSummary) {
        let mut inner = self.inner.write().await;
        let status = inner
            .entry(instance_id.to_string())
            .or_insert_with(|| InstanceStatus {
                instance_id: instance_id.to_string(),
                ..Default::default()
            });

        status.last_success_at = Some(at);
        status.consecutive_failures = 0;
        status.cycles += 1;
        status.findings += summary.findings as u64;
        status.alerts_emitted += summary.emitted as u64;
        status.alerts_suppressed += summary.suppressed as u64;
        status.degraded = summary.degraded;
        status.skipped_detectors = summary.skipped_detectors;
        status.last_cycle_ms = Some(summary.elapsed_ms);
    }

    pub async fn record_failure(&self, instance_id: &str, at: DateTime<Utc>, error: String) {
        let mut inner = self.inner.write().await;
        let status = inner
            .entry(instance_id.to_string())
            .or_insert_with(|| InstanceStatus {
                instance_id: instance_id.to_string(),
                ..Default::default()
            });

        status.last_failure_at = Some(at);
        status.last_error = Some(error);
        status.consecutive_failures += 1;
        status.cycles += 1;
        status.failures += 1;
    }

    pub async fn get(&self, instance_id: &str) -> Option<InstanceStatus> {
        self.inner.read().await.get(instance_id).cloned()
    }

    /// 按实例 ID 排序的全部状态
    pub async fn all(&self) -> Vec<InstanceStatus> {
        let inner = self.inner.read().await;
        let mut statuses: Vec<InstanceStatus> = inner.values().cloned().collect();
        statuses.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_resets_failures() {
        let registry = StatusRegistry::new();
        registry.register("pg").await;

        registry
            .record_failure("pg", Utc::now(), "source unavailable".into())
            .await;
        registry
            .record_failure("pg", Utc::now(), "source unavailable".into())
            .await;
        let status = registry.get("pg").await.unwrap();
        assert_eq!(status.consecutive_failures, 2);
        assert!(!status.healthy());

        registry
            .record_success(
                "pg",
                Utc::now(),
                CycleSummary {
                    findings: 3,
                    emitted: 1,
                    suppressed: 2,
                    ..Default::default()
                },
            )
            .await;
        let status = registry.get("pg").await.unwrap();
        assert!(status.healthy());
        assert_eq!(status.cycles, 3);
        assert_eq!(status.failures, 2);
        assert_eq!(status.alerts_suppressed, 2);
        assert_eq!(status.last_error.as_deref(), Some("source unavailable"));
    }

    #[tokio::test]
    async fn test_all_sorted() {
        let registry = StatusRegistry::new();
        registry.register("b").await;
        registry.register("a").await;
        let ids: Vec<String> = registry.all().await.into_iter().map(|s| s.instance_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
