use crate::message::NotifyMessage;
use crate::notifier::{Notifier, NotifyError};
use crate::render::render_alert;
use crate::router::ChannelRouter;
use chrono::Utc;
use metrics::{counter, gauge};
use sentinel_config::{DispatchConfig, OverflowPolicy};
use sentinel_suppress::{DeliveryOutcome, DeliveryRecord, SuppressionRegistry};
use sentinel_types::Alert;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 一个（告警, 渠道）投递任务
struct Job {
    instance_id: String,
    alert: Arc<Alert>,
    message: Arc<NotifyMessage>,
    notifier: Arc<dyn Notifier>,
}

/// 有界发送队列
struct Queue {
    jobs: Mutex<VecDeque<Job>>,
    capacity: usize,
    ready: Notify,
}

impl Queue {
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Job>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn pop(&self) -> Option<Job> {
        let mut jobs = self.lock();
        let job = jobs.pop_front();
        gauge!("sentinel_dispatch_queue_depth", jobs.len() as f64);
        job
    }
}

/// 一次 `dispatch` 的入队结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub enqueued: usize,
    /// 为腾出空间被丢弃的旧任务数
    pub dropped: usize,
    /// 被拒绝的新任务数
    pub rejected: usize,
}

/// 告警发送器
///
/// 检测周期只负责入队，投递由后台 worker 完成，慢渠道不会阻塞检测。
pub struct Dispatcher {
    queue: Arc<Queue>,
    router: Arc<ChannelRouter>,
    registry: SuppressionRegistry,
    config: DispatchConfig,
    closed_tx: watch::Sender<bool>,
}

impl Dispatcher {
    pub fn new(router: ChannelRouter, registry: SuppressionRegistry, config: DispatchConfig) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            queue: Arc::new(Queue {
                jobs: Mutex::new(VecDeque::with_capacity(config.queue_depth)),
                capacity: config.queue_depth,
                ready: Notify::new(),
            }),
            router: Arc::new(router),
            registry,
            config,
            closed_tx,
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// 渲染告警并为每个目标渠道入队
    pub async fn dispatch(&self, alert: Alert) -> DispatchReport {
        let mut report = DispatchReport::default();
        let notifiers = self.router.resolve(alert.severity);
        if notifiers.is_empty() {
            warn!(
                instance = %alert.instance_id(),
                fingerprint = %alert.fingerprint.short(),
                "No channel routed for severity {}",
                alert.severity
            );
            return report;
        }

        let instance_id = alert.instance_id().to_string();
        let message = Arc::new(render_alert(&alert));
        let alert = Arc::new(alert);
        let closed = *self.closed_tx.borrow();

        let mut evicted = Vec::new();
        {
            let mut jobs = self.queue.lock();
            for notifier in notifiers {
                if closed {
                    report.rejected += 1;
                    continue;
                }
                if jobs.len() >= self.queue.capacity {
                    match self.config.overflow {
                        OverflowPolicy::DropOldest => {
                            if let Some(old) = jobs.pop_front() {
                                evicted.push(old);
                                report.dropped += 1;
                            }
                        }
                        OverflowPolicy::Reject => {
                            report.rejected += 1;
                            continue;
                        }
                    }
                }
                jobs.push_back(Job {
                    instance_id: instance_id.clone(),
                    alert: alert.clone(),
                    message: message.clone(),
                    notifier,
                });
                report.enqueued += 1;
                self.queue.ready.notify_one();
            }
            gauge!("sentinel_dispatch_queue_depth", jobs.len() as f64);
        }

        for job in evicted {
            warn!(
                instance = %job.instance_id,
                channel = %job.notifier.name(),
                fingerprint = %job.alert.fingerprint.short(),
                "Dispatch queue full, dropping oldest alert"
            );
            self.record_dropped(&job.instance_id, &job.alert, "queue overflow")
                .await;
        }
        if report.rejected > 0 {
            warn!(
                instance = %instance_id,
                fingerprint = %alert.fingerprint.short(),
                rejected = report.rejected,
                "Dispatch queue rejected alert"
            );
            let detail = if closed { "dispatcher closed" } else { "queue full" };
            self.record_dropped(&instance_id, &alert, detail).await;
        }
        report
    }

    async fn record_dropped(&self, instance_id: &str, alert: &Alert, detail: &str) {
        counter!("sentinel_dispatch_dropped_total", 1);
        self.registry
            .record_delivery(
                instance_id,
                &alert.fingerprint,
                DeliveryRecord {
                    outcome: DeliveryOutcome::Dropped,
                    at: Utc::now(),
                    detail: Some(detail.to_string()),
                },
            )
            .await;
    }

    /// 启动后台 worker
    pub fn start(self) -> DispatcherHandle {
        let this = Arc::new(self);
        let workers = this.config.workers.max(1);
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let worker = this.clone();
            let closed_rx = this.closed_tx.subscribe();
            handles.push(tokio::spawn(async move {
                worker.worker_loop(id, closed_rx).await;
            }));
        }
        info!("Dispatcher started with {} workers", workers);
        DispatcherHandle {
            dispatcher: this,
            workers: Mutex::new(handles),
        }
    }

    async fn worker_loop(&self, id: usize, mut closed_rx: watch::Receiver<bool>) {
        loop {
            if let Some(job) = self.queue.pop() {
                self.deliver(job).await;
                continue;
            }
            if *closed_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = self.queue.ready.notified() => {}
                changed = closed_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Dispatch worker {} stopped", id);
    }

    /// 投递单个任务，瞬时错误按指数退避重试
    async fn deliver(&self, job: Job) {
        let channel = job.notifier.name().to_string();
        let send_timeout = Duration::from_secs(self.config.send_timeout_secs);
        let max_backoff = Duration::from_millis(self.config.max_backoff_ms);
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms);
        let mut attempt: u32 = 0;

        let (outcome, detail) = loop {
            attempt += 1;
            let result = match tokio::time::timeout(send_timeout, job.notifier.send(&job.message)).await
            {
                Ok(result) => result,
                Err(_) => Err(NotifyError::Transient(format!(
                    "send timed out after {}s",
                    self.config.send_timeout_secs
                ))),
            };

            match result {
                Ok(()) => {
                    info!(
                        instance = %job.instance_id,
                        channel = %channel,
                        fingerprint = %job.alert.fingerprint.short(),
                        attempt,
                        "Notification sent: {}",
                        job.message.title
                    );
                    counter!("sentinel_dispatch_success_total", 1, "channel" => channel.clone());
                    break (DeliveryOutcome::Delivered, None);
                }
                Err(e) if e.is_transient() && attempt <= self.config.max_retries => {
                    warn!(
                        instance = %job.instance_id,
                        channel = %channel,
                        attempt,
                        "Notification failed, retrying in {:?}: {}",
                        backoff,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
                Err(e) => {
                    error!(
                        instance = %job.instance_id,
                        channel = %channel,
                        fingerprint = %job.alert.fingerprint.short(),
                        attempt,
                        "Notification abandoned: {}",
                        e
                    );
                    counter!("sentinel_dispatch_failure_total", 1, "channel" => channel.clone());
                    break (DeliveryOutcome::Failed, Some(format!("{}: {}", channel, e)));
                }
            }
        };

        self.registry
            .record_delivery(
                &job.instance_id,
                &job.alert.fingerprint,
                DeliveryRecord {
                    outcome,
                    at: Utc::now(),
                    detail,
                },
            )
            .await;
    }
}

/// 运行中的发送器，可在各实例流水线之间共享
pub struct DispatcherHandle {
    dispatcher: Arc<Dispatcher>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DispatcherHandle {
    pub async fn dispatch(&self, alert: Alert) -> DispatchReport {
        self.dispatcher.dispatch(alert).await
    }

    pub fn queue_len(&self) -> usize {
        self.dispatcher.queue_len()
    }

    pub fn is_closed(&self) -> bool {
        *self.dispatcher.closed_tx.borrow()
    }

    /// 停止接收新告警，在限定时间内投递完队列，超时后放弃剩余任务
    ///
    /// 重复调用时后续调用直接返回。
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.dispatcher.closed_tx.send_replace(true);
        let workers: Vec<JoinHandle<()>> = {
            let mut guard = match self.workers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *guard)
        };
        if workers.is_empty() {
            return;
        }
        let pending = self.dispatcher.queue_len();
        info!("Draining dispatch queue ({} pending)", pending);

        let aborts: Vec<_> = workers.iter().map(|h| h.abort_handle()).collect();
        let drained = tokio::time::timeout(drain_timeout, async move {
            for worker in workers {
                let _ = worker.await;
            }
        })
        .await;

        match drained {
            Ok(()) => info!("Dispatch queue drained"),
            Err(_) => {
                for abort in aborts {
                    abort.abort();
                }
                let abandoned = self.dispatcher.queue_len();
                warn!(
                    "Dispatch drain timed out after {:?}, abandoning {} alerts",
                    drain_timeout, abandoned
                );
            }
        }
    }
}
