use anyhow::Context;
use chrono::{DateTime, Utc};
use sentinel_config::{AppConfig, ConfigLoader, InstanceConfig, RoutingConfig};
use sentinel_core::{Collector, CycleSummary, SentinelError, SnapshotSource, StatusRegistry};
use sentinel_detect::{DetectorRegistry, SeverityClassifier};
use sentinel_logging::CauseLimiter;
use sentinel_notify::{ChannelRouter, Dispatcher, DispatcherHandle, LogNotifier, Notifier};
use sentinel_shutdown::{
    InFlightTracker, Resource, ResourceManager, ShutdownCoordinator, ShutdownReport, SignalHandler,
};
use sentinel_suppress::{
    SuppressionCheckpoint, SuppressionHandle, SuppressionPolicy, SuppressionRegistry,
    SuppressionState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::api::{create_router, ApiState};
use crate::metrics;
use crate::pipeline::{InstancePipeline, PipelineContext};
use crate::resources::{CheckpointResource, DispatcherResource};
use crate::scheduler::spawn_instance;

/// 组装完成的分析服务
pub struct App {
    config: AppConfig,
    pipelines: Vec<InstancePipeline>,
    dispatcher: Arc<DispatcherHandle>,
    status: StatusRegistry,
    suppression: SuppressionRegistry,
    checkpoint: Option<Arc<SuppressionCheckpoint>>,
    extra_resources: Vec<Arc<dyn Resource>>,
}

impl App {
    /// 按配置创建渠道并组装服务
    pub async fn build(config: AppConfig, source: Arc<dyn SnapshotSource>) -> anyhow::Result<Self> {
        let send_timeout = Duration::from_secs(config.dispatch.send_timeout_secs);
        let router = ChannelRouter::from_config(&config.channels, &config.routing, send_timeout)
            .context("Failed to build notification channels")?;
        Self::with_router(config, source, router).await
    }

    /// 使用给定的渠道路由组装服务
    ///
    /// 没有任何启用的渠道时告警只写入日志。
    pub async fn with_router(
        config: AppConfig,
        source: Arc<dyn SnapshotSource>,
        router: ChannelRouter,
    ) -> anyhow::Result<Self> {
        ConfigLoader::validate(&config)?;

        let router = if router.is_empty() {
            warn!("No notification channels enabled, alerts will only be logged");
            let fallback: Arc<dyn Notifier> = Arc::new(LogNotifier::new("log"));
            ChannelRouter::with_notifiers(vec![fallback], RoutingConfig::default())
        } else {
            info!("Notification channels: {:?}", router.channel_names());
            router
        };

        let status = StatusRegistry::new();
        let checkpoint = config
            .suppression
            .state_dir
            .as_ref()
            .map(|dir| Arc::new(SuppressionCheckpoint::new(dir)));
        let policy = SuppressionPolicy::from_config(&config.suppression);

        let mut suppression = SuppressionRegistry::new();
        let mut instances: Vec<(InstanceConfig, SuppressionHandle)> = Vec::new();
        for instance in config.enabled_instances() {
            let state = restore_state(checkpoint.as_deref(), &instance.id, policy.clone()).await;
            let handle = Arc::new(Mutex::new(state));
            suppression.insert(instance.id.clone(), handle.clone());
            status.register(&instance.id).await;
            instances.push((instance.clone(), handle));
        }

        let dispatcher = Arc::new(
            Dispatcher::new(router, suppression.clone(), config.dispatch.clone()).start(),
        );

        let context = PipelineContext {
            collector: Collector::new(source),
            classifier: Arc::new(SeverityClassifier::from_config(&config.scenarios)),
            dispatcher: dispatcher.clone(),
            status: status.clone(),
            limiter: Arc::new(CauseLimiter::new()),
            checkpoint: checkpoint.clone(),
        };
        let pipelines: Vec<InstancePipeline> = instances
            .into_iter()
            .map(|(instance, handle)| {
                info!(
                    instance = %instance.id,
                    dsn = %instance.redacted_dsn(),
                    srvid = instance.srvid,
                    "Instance configured"
                );
                InstancePipeline::new(
                    instance,
                    DetectorRegistry::from_config(&config.scenarios),
                    handle,
                    context.clone(),
                )
            })
            .collect();

        if pipelines.is_empty() {
            warn!("No enabled instances configured");
        }

        Ok(Self {
            config,
            pipelines,
            dispatcher,
            status,
            suppression,
            checkpoint,
            extra_resources: Vec::new(),
        })
    }

    /// 停机时额外清理的资源（例如数据库连接池）
    pub fn with_resource(mut self, resource: Arc<dyn Resource>) -> Self {
        self.extra_resources.push(resource);
        self
    }

    pub fn status(&self) -> &StatusRegistry {
        &self.status
    }

    pub fn suppression(&self) -> &SuppressionRegistry {
        &self.suppression
    }

    pub fn dispatcher(&self) -> &Arc<DispatcherHandle> {
        &self.dispatcher
    }

    pub fn pipelines(&self) -> &[InstancePipeline] {
        &self.pipelines
    }

    /// 所有实例各执行一个周期
    pub async fn run_cycles(
        &mut self,
        now: DateTime<Utc>,
    ) -> Vec<(String, Result<CycleSummary, SentinelError>)> {
        let mut results = Vec::with_capacity(self.pipelines.len());
        for pipeline in &mut self.pipelines {
            let result = pipeline.run_cycle(now).await;
            results.push((pipeline.instance_id().to_string(), result));
        }
        results
    }

    /// 执行一个周期后排空发送队列并写检查点
    pub async fn run_once(mut self) -> Vec<(String, Result<CycleSummary, SentinelError>)> {
        let results = self.run_cycles(Utc::now()).await;
        self.close().await;
        results
    }

    /// 按优先级清理资源，返回失败数
    pub async fn close(self) -> usize {
        let mut resources = self.resource_manager();
        resources.cleanup_all().await
    }

    fn resource_manager(&self) -> ResourceManager {
        let drain_timeout = Duration::from_secs(self.config.shutdown.drain_timeout_secs);
        let mut manager = ResourceManager::new();
        manager.register(Arc::new(DispatcherResource::new(
            self.dispatcher.clone(),
            drain_timeout,
        )));
        if let Some(checkpoint) = &self.checkpoint {
            manager.register(Arc::new(CheckpointResource::new(
                self.suppression.clone(),
                checkpoint.clone(),
            )));
        }
        for resource in &self.extra_resources {
            manager.register(resource.clone());
        }
        manager
    }

    /// 启动状态接口与各实例调度任务，直到收到停机信号
    pub async fn serve(self) -> anyhow::Result<ShutdownReport> {
        if let Some(addr) = &self.config.server.metrics_addr {
            let addr: SocketAddr = addr
                .parse()
                .with_context(|| format!("Invalid metrics address: {}", addr))?;
            metrics::init_metrics(addr)?;
        }
        metrics::set_instances(self.pipelines.len());

        let listener = TcpListener::bind(&self.config.server.listen)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.server.listen))?;
        info!("Status API listening on http://{}", self.config.server.listen);

        let signal = SignalHandler::new();
        let tracker = InFlightTracker::new();
        let resources = self.resource_manager();
        let drain_timeout = Duration::from_secs(self.config.shutdown.drain_timeout_secs);

        let router = create_router(ApiState::new(self.status.clone()));
        let mut api_shutdown = signal.subscribe();
        let api = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    api_shutdown.wait().await;
                })
                .await
        });

        let tasks: Vec<_> = self
            .pipelines
            .into_iter()
            .map(|pipeline| spawn_instance(pipeline, tracker.clone(), signal.subscribe()))
            .collect();

        let coordinator = ShutdownCoordinator::builder()
            .with_signal_handler(signal)
            .with_tracker(tracker)
            .with_resource_manager(resources)
            .with_drain_timeout(drain_timeout)
            .build();
        let report = coordinator.run().await;

        for task in tasks {
            if !report.cycles_drained {
                task.abort();
            }
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Instance task failed: {}", e);
                }
            }
        }

        match api.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Status API error: {}", e),
            Err(e) => warn!("Status API task failed: {}", e),
        }

        Ok(report)
    }
}

/// 从检查点恢复抑制状态，读取失败时从空状态开始
async fn restore_state(
    checkpoint: Option<&SuppressionCheckpoint>,
    instance_id: &str,
    policy: SuppressionPolicy,
) -> SuppressionState {
    let Some(checkpoint) = checkpoint else {
        return SuppressionState::new(instance_id, policy);
    };

    match checkpoint.load(instance_id).await {
        Ok(Some(records)) => SuppressionState::restore(instance_id, policy, records),
        Ok(None) => SuppressionState::new(instance_id, policy),
        Err(e) => {
            warn!(
                instance = instance_id,
                "Failed to load suppression checkpoint, starting empty: {}", e
            );
            SuppressionState::new(instance_id, policy)
        }
    }
}
