use chrono::Utc;
use sentinel_shutdown::{InFlightTracker, ShutdownListener};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::pipeline::InstancePipeline;

/// 每个实例一个任务，按实例的采集间隔驱动周期
///
/// 周期耗时超过间隔时跳过错过的 tick，不会并发执行同一实例的两个周期。
pub fn spawn_instance(
    mut pipeline: InstancePipeline,
    tracker: InFlightTracker,
    mut shutdown: ShutdownListener,
) -> JoinHandle<InstancePipeline> {
    tokio::spawn(async move {
        let every = Duration::from_secs(pipeline.config().interval_secs.max(1));
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            instance = pipeline.instance_id(),
            interval_secs = every.as_secs(),
            "Instance scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    let Some(_guard) = tracker.acquire(pipeline.instance_id()) else {
                        break;
                    };
                    // 失败已在流水线内记录
                    if let Err(e) = pipeline.run_cycle(Utc::now()).await {
                        debug!(instance = pipeline.instance_id(), kind = e.kind(), "Cycle failed");
                    }
                }
            }
        }

        info!(instance = pipeline.instance_id(), "Instance scheduler stopped");
        pipeline
    })
}
