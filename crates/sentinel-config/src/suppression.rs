use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 去重与抑制配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SuppressionConfig {
    /// 同一指纹两次告警的最小间隔
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// 记录在 `window_secs * retention_multiplier` 内未再出现则清除
    #[serde(default = "default_retention_multiplier")]
    pub retention_multiplier: u32,

    /// 级别升高时是否立即重新告警
    #[serde(default)]
    pub escalate_on_severity_increase: bool,

    /// 抑制记录的持久化目录，不配置则只保存在内存
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

fn default_window_secs() -> u64 {
    3600
}

fn default_retention_multiplier() -> u32 {
    3
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            retention_multiplier: default_retention_multiplier(),
            escalate_on_severity_increase: false,
            state_dir: None,
        }
    }
}
