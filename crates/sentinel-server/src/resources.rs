use async_trait::async_trait;
use sentinel_notify::DispatcherHandle;
use sentinel_powa::PowaSource;
use sentinel_shutdown::{Resource, ResourceError};
use sentinel_suppress::{SuppressionCheckpoint, SuppressionRegistry};
use std::sync::Arc;
use std::time::Duration;

/// 发送队列：停止接收新告警并在限时内投递剩余告警
pub struct DispatcherResource {
    handle: Arc<DispatcherHandle>,
    drain_timeout: Duration,
}

impl DispatcherResource {
    pub fn new(handle: Arc<DispatcherHandle>, drain_timeout: Duration) -> Self {
        Self {
            handle,
            drain_timeout,
        }
    }
}

#[async_trait]
impl Resource for DispatcherResource {
    async fn cleanup(&self) -> Result<(), ResourceError> {
        self.handle.shutdown(self.drain_timeout).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "dispatcher"
    }

    fn priority(&self) -> u32 {
        10
    }
}

/// 抑制状态检查点，在发送队列排空之后写入，包含最后的投递结果
pub struct CheckpointResource {
    registry: SuppressionRegistry,
    checkpoint: Arc<SuppressionCheckpoint>,
}

impl CheckpointResource {
    pub fn new(registry: SuppressionRegistry, checkpoint: Arc<SuppressionCheckpoint>) -> Self {
        Self {
            registry,
            checkpoint,
        }
    }
}

#[async_trait]
impl Resource for CheckpointResource {
    async fn cleanup(&self) -> Result<(), ResourceError> {
        let mut failed = Vec::new();
        for (instance_id, handle) in self.registry.handles() {
            let mut state = handle.lock().await;
            match self.checkpoint.save(&state).await {
                Ok(()) => state.mark_clean(),
                Err(e) => failed.push(format!("{}: {}", instance_id, e)),
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(ResourceError::CleanupFailed(failed.join("; ")))
        }
    }

    fn name(&self) -> &str {
        "suppression-checkpoint"
    }

    fn priority(&self) -> u32 {
        20
    }
}

/// PoWA 连接池
pub struct PowaPoolResource {
    source: Arc<PowaSource>,
}

impl PowaPoolResource {
    pub fn new(source: Arc<PowaSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Resource for PowaPoolResource {
    async fn cleanup(&self) -> Result<(), ResourceError> {
        self.source.close().await;
        Ok(())
    }

    fn name(&self) -> &str {
        "powa-pools"
    }

    fn priority(&self) -> u32 {
        30
    }
}
