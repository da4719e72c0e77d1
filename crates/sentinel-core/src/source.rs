use async_trait::async_trait;
use sentinel_config::InstanceConfig;
use sentinel_types::{IndexCandidate, OptionalFeature, QueryKey, QueryStat};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// 快照源的硬错误，出现时整个周期跳过
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl SourceError {
    /// 日志限流使用的原因键
    pub fn cause_key(&self) -> &'static str {
        match self {
            SourceError::Unavailable(_) => "source:unavailable",
            SourceError::SchemaMismatch(_) => "source:schema",
            SourceError::PermissionDenied(_) => "source:permission",
        }
    }
}

/// 可选数据缺失（扩展未安装、无权限等），不影响其余检测
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Degradation {
    pub feature: OptionalFeature,
    pub reason: String,
}

impl Degradation {
    pub fn new(feature: OptionalFeature, reason: impl Into<String>) -> Self {
        Self {
            feature,
            reason: reason.into(),
        }
    }

    pub fn cause_key(&self) -> String {
        format!("degraded:{}", self.feature)
    }
}

/// 快照源一次读取的结果
#[derive(Debug, Clone, Default)]
pub struct SourceSnapshot {
    pub stats: BTreeMap<QueryKey, QueryStat>,
    pub index_candidates: Option<Vec<IndexCandidate>>,
    pub kcache: bool,
    pub degraded: Vec<Degradation>,
}

impl SourceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stat(mut self, key: QueryKey, stat: QueryStat) -> Self {
        if stat.cpu_time_ms.is_some() {
            self.kcache = true;
        }
        self.stats.insert(key, stat);
        self
    }

    pub fn with_index_candidates(mut self, candidates: Vec<IndexCandidate>) -> Self {
        self.index_candidates = Some(candidates);
        self
    }

    pub fn degrade(mut self, feature: OptionalFeature, reason: impl Into<String>) -> Self {
        self.degraded.push(Degradation::new(feature, reason));
        self
    }

    pub fn is_degraded(&self, feature: OptionalFeature) -> bool {
        self.degraded.iter().any(|d| d.feature == feature)
    }
}

/// 统计快照源
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// 读取实例当前的累计统计
    async fn fetch(&self, instance: &InstanceConfig) -> Result<SourceSnapshot, SourceError>;

    /// 源名称
    fn name(&self) -> &str;
}
