use sentinel_types::Severity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::app::default_true;

/// 通知渠道类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// 企业微信群机器人
    Wecom,
    /// 飞书自定义机器人
    Feishu,
    /// 钉钉自定义机器人
    Dingtalk,
    /// 通用 Webhook（JSON）
    Webhook,
    /// 仅写日志
    Log,
}

impl ChannelKind {
    pub fn requires_url(&self) -> bool {
        !matches!(self, ChannelKind::Log)
    }
}

/// 通知渠道
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    pub name: String,
    pub kind: ChannelKind,

    #[serde(default)]
    pub url: Option<String>,

    /// 飞书 / 钉钉的签名密钥
    #[serde(default)]
    pub secret: Option<String>,

    /// Webhook 附加请求头
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// @ 的成员（手机号或用户 ID）
    #[serde(default)]
    pub mentions: Vec<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            name: name.into(),
            kind,
            url: None,
            secret: None,
            headers: HashMap::new(),
            mentions: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }
}

/// 级别到渠道的路由，某级别为空时发往所有启用的渠道
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RoutingConfig {
    #[serde(default)]
    pub l1: Vec<String>,
    #[serde(default)]
    pub l2: Vec<String>,
    #[serde(default)]
    pub l3: Vec<String>,
}

impl RoutingConfig {
    pub fn channels_for(&self, severity: Severity) -> &[String] {
        match severity {
            Severity::L1 => &self.l1,
            Severity::L2 => &self.l2,
            Severity::L3 => &self.l3,
        }
    }

    pub fn all_routes(&self) -> impl Iterator<Item = &String> {
        self.l1.iter().chain(self.l2.iter()).chain(self.l3.iter())
    }
}

/// 队列满时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// 丢弃队首最旧的告警
    #[default]
    DropOldest,
    /// 拒绝新告警
    Reject,
}

/// 发送队列配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

fn default_queue_depth() -> usize {
    256
}

fn default_workers() -> usize {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_send_timeout_secs() -> u64 {
    10
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            overflow: OverflowPolicy::DropOldest,
            workers: default_workers(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            send_timeout_secs: default_send_timeout_secs(),
        }
    }
}
