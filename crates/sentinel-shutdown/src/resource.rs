use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Cleanup failed: {0}")]
    CleanupFailed(String),

    #[error("Cleanup timed out: {0}")]
    Timeout(String),
}

/// 关闭时需要收尾的资源（发送队列、抑制状态检查点、数据库连接池）
#[async_trait]
pub trait Resource: Send + Sync {
    async fn cleanup(&self) -> Result<(), ResourceError>;

    fn name(&self) -> &str;

    /// 清理顺序，数字越小越先清理
    fn priority(&self) -> u32 {
        100
    }
}

/// 资源管理器
pub struct ResourceManager {
    resources: Vec<Arc<dyn Resource>>,
}

impl ResourceManager {
    pub fn new() -> Self {
        Self {
            resources: Vec::new(),
        }
    }

    pub fn register(&mut self, resource: Arc<dyn Resource>) {
        info!("Registering resource: {}", resource.name());
        self.resources.push(resource);
    }

    /// 按优先级依次清理，单个失败不影响其余资源，返回失败数
    pub async fn cleanup_all(&mut self) -> usize {
        self.resources.sort_by_key(|r| r.priority());

        info!("Cleaning up {} resources", self.resources.len());
        let mut failures = 0;
        for resource in &self.resources {
            match resource.cleanup().await {
                Ok(()) => info!("Cleaned up: {}", resource.name()),
                Err(e) => {
                    failures += 1;
                    error!("Failed to cleanup {}: {}", resource.name(), e);
                }
            }
        }
        failures
    }

    pub fn count(&self) -> usize {
        self.resources.len()
    }

    pub fn names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name()).collect()
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorded {
        name: String,
        priority: u32,
        fail: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Resource for Recorded {
        async fn cleanup(&self) -> Result<(), ResourceError> {
            self.log.lock().unwrap().push(self.name.clone());
            if self.fail {
                Err(ResourceError::CleanupFailed("boom".to_string()))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> u32 {
            self.priority
        }
    }

    fn resource(name: &str, priority: u32, fail: bool, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Resource> {
        Arc::new(Recorded {
            name: name.to_string(),
            priority,
            fail,
            log: log.clone(),
        })
    }

    #[tokio::test]
    async fn test_cleanup_in_priority_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = ResourceManager::new();
        manager.register(resource("pools", 30, false, &log));
        manager.register(resource("dispatcher", 10, false, &log));
        manager.register(resource("checkpoint", 20, false, &log));

        assert_eq!(manager.cleanup_all().await, 0);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["dispatcher", "checkpoint", "pools"]
        );
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_cleanup() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut manager = ResourceManager::new();
        manager.register(resource("first", 1, true, &log));
        manager.register(resource("second", 2, false, &log));

        assert_eq!(manager.cleanup_all().await, 1);
        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(manager.count(), 2);
    }
}
