use crate::notifier::Notifier;
use crate::providers::build_notifier;
use anyhow::{anyhow, Result};
use sentinel_config::{ChannelConfig, RoutingConfig};
use sentinel_types::Severity;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 按级别把告警路由到渠道
///
/// 某级别未配置路由时发往全部启用的渠道。
pub struct ChannelRouter {
    channels: BTreeMap<String, Arc<dyn Notifier>>,
    routing: RoutingConfig,
}

impl ChannelRouter {
    pub fn from_config(
        channels: &[ChannelConfig],
        routing: &RoutingConfig,
        send_timeout: Duration,
    ) -> Result<Self> {
        let mut built = BTreeMap::new();
        for channel in channels.iter().filter(|c| c.enabled) {
            let notifier = build_notifier(channel, send_timeout)?;
            info!("Registered notifier: {} ({:?})", channel.name, channel.kind);
            built.insert(channel.name.clone(), notifier);
        }

        for name in routing.all_routes() {
            let known = channels.iter().any(|c| &c.name == name);
            if !known {
                return Err(anyhow!("route references unknown channel: {}", name));
            }
        }

        Ok(Self {
            channels: built,
            routing: routing.clone(),
        })
    }

    /// 直接使用给定的通知器
    pub fn with_notifiers(notifiers: Vec<Arc<dyn Notifier>>, routing: RoutingConfig) -> Self {
        let channels = notifiers
            .into_iter()
            .map(|n| (n.name().to_string(), n))
            .collect();
        Self { channels, routing }
    }

    /// 解析某级别的目标渠道
    ///
    /// 路由中引用但已禁用的渠道会被跳过。
    pub fn resolve(&self, severity: Severity) -> Vec<Arc<dyn Notifier>> {
        let routes = self.routing.channels_for(severity);
        if routes.is_empty() {
            return self
                .channels
                .values()
                .filter(|n| n.is_enabled())
                .cloned()
                .collect();
        }

        routes
            .iter()
            .filter_map(|name| self.channels.get(name))
            .filter(|n| n.is_enabled())
            .cloned()
            .collect()
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
