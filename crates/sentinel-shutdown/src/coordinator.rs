use crate::resource::ResourceManager;
use crate::signal::{ShutdownSignal, SignalHandler};
use crate::tracker::InFlightTracker;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// 关闭结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub signal: ShutdownSignal,
    /// 进行中的周期是否在限时内结束
    pub cycles_drained: bool,
    pub resource_failures: usize,
    pub elapsed: Duration,
}

/// 关闭协调器
///
/// 收到信号后依次：停止接收新周期、等待进行中的周期、按优先级清理资源。
pub struct ShutdownCoordinator {
    signal_handler: SignalHandler,
    tracker: InFlightTracker,
    resource_manager: ResourceManager,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn builder() -> ShutdownCoordinatorBuilder {
        ShutdownCoordinatorBuilder::new()
    }

    pub fn signal_handler(&self) -> &SignalHandler {
        &self.signal_handler
    }

    pub fn tracker(&self) -> &InFlightTracker {
        &self.tracker
    }

    /// 等待关闭信号（系统信号或手动触发）后执行关闭流程
    pub async fn run(self) -> ShutdownReport {
        info!("Shutdown coordinator started, waiting for signal...");
        let signal = match self.signal_handler.wait_for_system_signal().await {
            Ok(signal) => signal,
            Err(e) => {
                warn!("Failed to install signal handlers: {}, waiting for manual trigger", e);
                self.signal_handler.subscribe().wait().await
            }
        };
        self.shutdown(signal).await
    }

    /// 已知信号时直接执行关闭流程
    pub async fn shutdown(mut self, signal: ShutdownSignal) -> ShutdownReport {
        self.signal_handler.trigger(signal);
        info!("Received shutdown signal: {:?}", signal);
        let start = Instant::now();

        info!("Phase 1: Draining in-flight cycles...");
        let cycles_drained = self.tracker.drain(self.drain_timeout).await;

        info!("Phase 2: Cleaning up resources...");
        let resource_failures = self.resource_manager.cleanup_all().await;

        let elapsed = start.elapsed();
        info!("Graceful shutdown complete in {:?}", elapsed);
        ShutdownReport {
            signal,
            cycles_drained,
            resource_failures,
            elapsed,
        }
    }
}

/// 关闭协调器构建器
pub struct ShutdownCoordinatorBuilder {
    signal_handler: Option<SignalHandler>,
    tracker: Option<InFlightTracker>,
    resource_manager: ResourceManager,
    drain_timeout: Duration,
}

impl ShutdownCoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            signal_handler: None,
            tracker: None,
            resource_manager: ResourceManager::new(),
            drain_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_signal_handler(mut self, handler: SignalHandler) -> Self {
        self.signal_handler = Some(handler);
        self
    }

    pub fn with_tracker(mut self, tracker: InFlightTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_resource_manager(mut self, manager: ResourceManager) -> Self {
        self.resource_manager = manager;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn build(self) -> ShutdownCoordinator {
        ShutdownCoordinator {
            signal_handler: self.signal_handler.unwrap_or_default(),
            tracker: self.tracker.unwrap_or_default(),
            resource_manager: self.resource_manager,
            drain_timeout: self.drain_timeout,
        }
    }
}

impl Default for ShutdownCoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Resource, ResourceError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct Flag {
        cleaned: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Resource for Flag {
        async fn cleanup(&self) -> Result<(), ResourceError> {
            self.cleaned.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &str {
            "flag"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_then_cleans() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let mut manager = ResourceManager::new();
        manager.register(Arc::new(Flag {
            cleaned: cleaned.clone(),
        }));

        let tracker = InFlightTracker::new();
        let guard = tracker.acquire("pg-main").unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(guard);
        });

        let coordinator = ShutdownCoordinator::builder()
            .with_tracker(tracker.clone())
            .with_resource_manager(manager)
            .with_drain_timeout(Duration::from_secs(5))
            .build();
        let mut listener = coordinator.signal_handler().subscribe();

        let report = coordinator.shutdown(ShutdownSignal::Manual).await;
        assert!(report.cycles_drained);
        assert_eq!(report.resource_failures, 0);
        assert!(cleaned.load(Ordering::SeqCst));
        assert!(tracker.is_shutting_down());
        assert_eq!(listener.wait().await, ShutdownSignal::Manual);
    }

    #[tokio::test]
    async fn test_run_returns_on_manual_trigger() {
        let handler = SignalHandler::new();
        let coordinator = ShutdownCoordinator::builder()
            .with_signal_handler(handler.clone())
            .build();

        let task = tokio::spawn(coordinator.run());
        tokio::task::yield_now().await;
        handler.trigger(ShutdownSignal::Manual);

        let report = task.await.unwrap();
        assert_eq!(report.signal, ShutdownSignal::Manual);
        assert!(report.cycles_drained);
    }
}
