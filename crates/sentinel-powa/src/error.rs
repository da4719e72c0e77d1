use sea_orm::{DbErr, RuntimeErr};
use sentinel_core::SourceError;

/// 按 SQLSTATE 归类数据库错误
///
/// - `42P01` / `42883` / `42703` / `3F000`：对象不存在，PoWA 版本或扩展不匹配
/// - `42501` / `28000` / `28P01`：权限或认证失败
/// - 其余（连接类 `08*`、资源不足、管理员关停等）视为暂不可用
pub fn classify_sqlstate(code: Option<&str>, message: impl Into<String>) -> SourceError {
    let message = message.into();
    match code {
        Some("42P01") | Some("42883") | Some("42703") | Some("3F000") => {
            SourceError::SchemaMismatch(message)
        }
        Some("42501") | Some("28000") | Some("28P01") => SourceError::PermissionDenied(message),
        _ => SourceError::Unavailable(message),
    }
}

/// 提取 SQLSTATE
pub fn sqlstate(err: &DbErr) -> Option<String> {
    let runtime = match err {
        DbErr::Conn(e) | DbErr::Exec(e) | DbErr::Query(e) => e,
        _ => return None,
    };
    match runtime {
        RuntimeErr::SqlxError(sea_orm::SqlxError::Database(db)) => {
            db.code().map(|code| code.into_owned())
        }
        _ => None,
    }
}

/// sea-orm 错误转换为快照源错误
pub fn classify_db_err(err: &DbErr) -> SourceError {
    classify_sqlstate(sqlstate(err).as_deref(), err.to_string())
}

/// 可选数据读取失败时是否只需降级
///
/// 对象缺失与权限不足只影响该项可选数据，连接类错误则整个周期失败。
pub fn is_degradable(err: &SourceError) -> bool {
    matches!(
        err,
        SourceError::SchemaMismatch(_) | SourceError::PermissionDenied(_)
    )
}
