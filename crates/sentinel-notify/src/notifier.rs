use crate::message::NotifyMessage;
use async_trait::async_trait;
use thiserror::Error;

/// 发送错误
///
/// 瞬时错误按退避重试，永久错误直接放弃。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),
}

impl NotifyError {
    pub fn is_transient(&self) -> bool {
        matches!(self, NotifyError::Transient(_))
    }
}

/// 通知器 trait
#[async_trait]
pub trait Notifier: Send + Sync {
    /// 发送通知
    async fn send(&self, message: &NotifyMessage) -> Result<(), NotifyError>;

    /// 通知器名称（渠道名）
    fn name(&self) -> &str;

    /// 是否启用
    fn is_enabled(&self) -> bool {
        true
    }
}

/// HTTP 状态码分类：408 / 429 / 5xx 为瞬时错误
pub fn classify_status(status: u16, body: &str) -> NotifyError {
    let message = format!("HTTP {}: {}", status, truncate(body, 256));
    if status == 408 || status == 429 || (500..600).contains(&status) {
        NotifyError::Transient(message)
    } else {
        NotifyError::Permanent(message)
    }
}

/// 传输层错误分类：超时与连接失败为瞬时错误
pub fn classify_transport(err: &reqwest::Error) -> NotifyError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        NotifyError::Transient(err.to_string())
    } else if let Some(status) = err.status() {
        classify_status(status.as_u16(), &err.to_string())
    } else {
        NotifyError::Permanent(err.to_string())
    }
}

/// 厂商业务错误码分类，限流类错误码为瞬时错误
pub fn classify_vendor_code(vendor: &str, code: i64, message: &str) -> Result<(), NotifyError> {
    if code == 0 {
        return Ok(());
    }

    let rate_limited = match vendor {
        // 45009: 接口调用超过限制；-1: 系统繁忙
        "wecom" => matches!(code, 45009 | -1),
        // 130101: 发送速度太快
        "dingtalk" => matches!(code, 130101),
        // 11232 / 9499: 频率限制
        "feishu" => matches!(code, 11232 | 9499),
        _ => false,
    };

    let detail = format!("{} errcode {}: {}", vendor, code, message);
    if rate_limited {
        Err(NotifyError::Transient(detail))
    } else {
        Err(NotifyError::Permanent(detail))
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
