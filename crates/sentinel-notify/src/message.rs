use chrono::{DateTime, Utc};
use sentinel_types::Severity;
use serde::{Deserialize, Serialize};

/// 通知消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyMessage {
    /// 标题
    pub title: String,

    /// Markdown 正文
    pub content: String,

    /// 纯文本正文（不支持 Markdown 的渠道使用）
    pub text: String,

    /// 级别
    pub severity: Severity,

    pub instance_id: String,

    pub fingerprint: String,

    /// 时间
    pub timestamp: DateTime<Utc>,

    /// 额外数据，Webhook 渠道原样发送
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl NotifyMessage {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        severity: Severity,
    ) -> Self {
        let content = content.into();
        Self {
            title: title.into(),
            text: content.clone(),
            content,
            severity,
            instance_id: String::new(),
            fingerprint: String::new(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
