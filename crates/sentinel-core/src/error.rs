use thiserror::Error;

use crate::source::SourceError;

/// Sentinel 统一错误类型
///
/// 核心流程内没有致命错误：实例周期失败只会跳过该周期。
#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Schema incompatible: {0}")]
    SchemaIncompatible(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transient transport error: {0}")]
    TransportTransient(String),

    #[error("Permanent transport error: {0}")]
    TransportPermanent(String),

    #[error("Internal invariant violation: {0}")]
    InternalInvariantViolation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, SentinelError>;

impl From<SourceError> for SentinelError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Unavailable(msg) => SentinelError::DataUnavailable(msg),
            SourceError::SchemaMismatch(msg) => SentinelError::SchemaIncompatible(msg),
            SourceError::PermissionDenied(msg) => SentinelError::PermissionDenied(msg),
        }
    }
}

impl SentinelError {
    /// 错误类别，用于指标标签与状态接口
    pub fn kind(&self) -> &'static str {
        match self {
            SentinelError::DataUnavailable(_) => "data_unavailable",
            SentinelError::SchemaIncompatible(_) => "schema_incompatible",
            SentinelError::PermissionDenied(_) => "permission_denied",
            SentinelError::TransportTransient(_) => "transport_transient",
            SentinelError::TransportPermanent(_) => "transport_permanent",
            SentinelError::InternalInvariantViolation(_) => "internal_invariant_violation",
            SentinelError::Config(_) => "config",
            SentinelError::Serialization(_) => "serialization",
            SentinelError::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_mapping() {
        let err: SentinelError = SourceError::SchemaMismatch("powa_statements".into()).into();
        assert!(matches!(err, SentinelError::SchemaIncompatible(_)));
        assert_eq!(err.kind(), "schema_incompatible");

        let err: SentinelError = SourceError::Unavailable("timeout".into()).into();
        assert_eq!(err.to_string(), "Data unavailable: timeout");
    }
}
