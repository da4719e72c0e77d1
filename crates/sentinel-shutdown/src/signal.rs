use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

/// 关闭信号类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM
    Terminate,

    /// SIGINT / Ctrl+C
    Interrupt,

    /// 程序内触发（`--once` 结束、测试）
    Manual,
}

/// 信号处理器
///
/// 关闭状态用 watch 通道广播，晚订阅的任务也能看到已触发的信号。
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_tx: Arc<watch::Sender<Option<ShutdownSignal>>>,
}

impl SignalHandler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(None);
        Self {
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// 订阅关闭信号
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.shutdown_tx.subscribe(),
        }
    }

    /// 触发关闭，重复触发只保留第一次的信号
    pub fn trigger(&self, signal: ShutdownSignal) {
        let first = self.shutdown_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(signal);
                true
            } else {
                false
            }
        });
        if first {
            info!("Shutdown triggered: {:?}", signal);
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.shutdown_tx.borrow().is_some()
    }

    /// 等待系统信号并广播
    #[cfg(unix)]
    pub async fn wait_for_system_signal(&self) -> std::io::Result<ShutdownSignal> {
        use signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut listener = self.subscribe();

        let received = tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                ShutdownSignal::Terminate
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
                ShutdownSignal::Interrupt
            }
            triggered = listener.wait() => return Ok(triggered),
        };
        self.trigger(received);
        Ok(received)
    }

    #[cfg(not(unix))]
    pub async fn wait_for_system_signal(&self) -> std::io::Result<ShutdownSignal> {
        let mut listener = self.subscribe();
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C");
                self.trigger(ShutdownSignal::Interrupt);
                Ok(ShutdownSignal::Interrupt)
            }
            triggered = listener.wait() => Ok(triggered),
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭信号订阅端
#[derive(Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownListener {
    pub fn is_triggered(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// 等待关闭；发送端全部释放时视为手动关闭
    pub async fn wait(&mut self) -> ShutdownSignal {
        loop {
            if let Some(signal) = *self.rx.borrow_and_update() {
                return signal;
            }
            if self.rx.changed().await.is_err() {
                return (*self.rx.borrow()).unwrap_or(ShutdownSignal::Manual);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_trigger() {
        let handler = SignalHandler::new();
        let mut listener = handler.subscribe();
        assert!(!listener.is_triggered());

        handler.trigger(ShutdownSignal::Manual);
        assert_eq!(listener.wait().await, ShutdownSignal::Manual);
        assert!(handler.is_triggered());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_signal() {
        let handler = SignalHandler::new();
        handler.trigger(ShutdownSignal::Terminate);
        handler.trigger(ShutdownSignal::Interrupt);

        let mut late = handler.subscribe();
        assert_eq!(late.wait().await, ShutdownSignal::Terminate);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let handler = SignalHandler::new();
        let mut a = handler.subscribe();
        let mut b = handler.subscribe();

        let trigger = handler.clone();
        tokio::spawn(async move {
            trigger.trigger(ShutdownSignal::Manual);
        });

        assert_eq!(a.wait().await, ShutdownSignal::Manual);
        assert_eq!(b.wait().await, ShutdownSignal::Manual);
    }

    #[tokio::test]
    async fn test_dropped_handler_counts_as_manual() {
        let handler = SignalHandler::new();
        let mut listener = handler.subscribe();
        drop(handler);
        assert_eq!(listener.wait().await, ShutdownSignal::Manual);
    }
}
