use chrono::{DateTime, Utc};
use sentinel_config::InstanceConfig;
use sentinel_types::Snapshot;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::source::{Degradation, SnapshotSource, SourceError};

/// 一次成功采集的结果
#[derive(Debug, Clone)]
pub struct Collected {
    pub snapshot: Snapshot,
    pub degraded: Vec<Degradation>,
    pub elapsed: Duration,
}

/// 采集器：带超时地从快照源读取并打上时间戳
#[derive(Clone)]
pub struct Collector {
    source: Arc<dyn SnapshotSource>,
}

impl Collector {
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self { source }
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub async fn collect(
        &self,
        instance: &InstanceConfig,
        now: DateTime<Utc>,
    ) -> Result<Collected, SourceError> {
        let started = Instant::now();
        let limit = Duration::from_secs(instance.fetch_timeout_secs);

        let fetched = timeout(limit, self.source.fetch(instance))
            .await
            .map_err(|_| {
                SourceError::Unavailable(format!(
                    "fetch timed out after {}s",
                    instance.fetch_timeout_secs
                ))
            })??;

        let elapsed = started.elapsed();
        tracing::debug!(
            instance = %instance.id,
            source = self.source.name(),
            queries = fetched.stats.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Snapshot collected"
        );

        let snapshot = Snapshot {
            instance_id: instance.id.clone(),
            captured_at: now,
            stats: fetched.stats,
            index_candidates: fetched.index_candidates,
            kcache: fetched.kcache,
        };

        Ok(Collected {
            snapshot,
            degraded: fetched.degraded,
            elapsed,
        })
    }
}
