use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 进行中的检测周期计数
///
/// 每个周期开始前 `acquire` 一个守卫，关闭时等待守卫全部释放。
#[derive(Clone)]
pub struct InFlightTracker {
    active: Arc<AtomicUsize>,
    is_shutting_down: Arc<AtomicBool>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            is_shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 开始一个周期；关闭后返回 `None`
    pub fn acquire(&self, instance_id: &str) -> Option<CycleGuard> {
        if self.is_shutting_down.load(Ordering::SeqCst) {
            debug!(instance = %instance_id, "Rejecting new cycle: shutting down");
            return None;
        }

        let count = self.active.fetch_add(1, Ordering::SeqCst);
        debug!(instance = %instance_id, "Cycle started, in flight: {}", count + 1);
        Some(CycleGuard {
            counter: self.active.clone(),
        })
    }

    pub fn start_shutdown(&self) {
        self.is_shutting_down.store(true, Ordering::SeqCst);
    }

    /// 等待进行中的周期结束，返回是否在限时内排空
    pub async fn drain(&self, max_duration: Duration) -> bool {
        self.start_shutdown();

        let start = Instant::now();
        let mut last_count = self.active_count();
        if last_count > 0 {
            info!("Waiting for {} in-flight cycles", last_count);
        }

        while self.active_count() > 0 {
            let elapsed = start.elapsed();
            if elapsed >= max_duration {
                warn!(
                    "Cycle drain timed out after {:?}, {} cycles still running",
                    elapsed,
                    self.active_count()
                );
                return false;
            }

            let current = self.active_count();
            if current != last_count {
                info!("Draining cycles: {} remaining ({:?} elapsed)", current, elapsed);
                last_count = current;
            }
            sleep(POLL_INTERVAL).await;
        }

        info!("All in-flight cycles finished");
        true
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }
}

impl Default for InFlightTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// 周期守卫，释放时计数减一
pub struct CycleGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_counts() {
        let tracker = InFlightTracker::new();
        let a = tracker.acquire("pg-a").unwrap();
        let b = tracker.acquire("pg-b").unwrap();
        assert_eq!(tracker.active_count(), 2);

        drop(a);
        assert_eq!(tracker.active_count(), 1);
        drop(b);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_cycles() {
        let tracker = InFlightTracker::new();
        let _guard = tracker.acquire("pg-a").unwrap();
        tracker.start_shutdown();
        assert!(tracker.acquire("pg-a").is_none());
        assert!(tracker.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_guards() {
        let tracker = InFlightTracker::new();
        let guard = tracker.acquire("pg-a").unwrap();

        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            drop(guard);
        });

        assert!(tracker.drain(Duration::from_secs(5)).await);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_timeout() {
        let tracker = InFlightTracker::new();
        let _guard = tracker.acquire("pg-a").unwrap();

        assert!(!tracker.drain(Duration::from_millis(500)).await);
        assert_eq!(tracker.active_count(), 1);
    }
}
