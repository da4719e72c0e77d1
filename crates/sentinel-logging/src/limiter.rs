use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// 按原因去重的日志限流器
///
/// 同一 `(scope, cause)` 在原因消失前只输出一次，用于降级和
/// schema 不兼容这类每个周期都会重复出现的警告。
#[derive(Debug, Default)]
pub struct CauseLimiter {
    active: Mutex<HashMap<String, HashSet<String>>>,
}

impl CauseLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 原因首次出现时返回 true
    pub fn should_emit(&self, scope: &str, cause: &str) -> bool {
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        active
            .entry(scope.to_string())
            .or_default()
            .insert(cause.to_string())
    }

    /// 原因消失，返回此前是否处于激活状态
    pub fn clear(&self, scope: &str, cause: &str) -> bool {
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match active.get_mut(scope) {
            Some(causes) => causes.remove(cause),
            None => false,
        }
    }

    /// 清除 scope 下以 `prefix` 开头且不在 `keep` 中的原因，返回被清除的原因
    pub fn clear_matching(&self, scope: &str, prefix: &str, keep: &[String]) -> Vec<String> {
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(causes) = active.get_mut(scope) else {
            return Vec::new();
        };

        let mut cleared: Vec<String> = causes
            .iter()
            .filter(|c| c.starts_with(prefix) && !keep.contains(c))
            .cloned()
            .collect();
        for cause in &cleared {
            causes.remove(cause);
        }
        cleared.sort();
        cleared
    }

    pub fn active_causes(&self, scope: &str) -> Vec<String> {
        let active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut causes: Vec<String> = active
            .get(scope)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default();
        causes.sort();
        causes
    }
}
