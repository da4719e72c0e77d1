use chrono::{DateTime, Utc};
use sentinel_types::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::info;

use crate::engine::{SuppressionRecord, SuppressionState};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Checkpoint belongs to instance {found}, expected {expected}")]
    InstanceMismatch { expected: String, found: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    instance_id: String,
    saved_at: DateTime<Utc>,
    records: BTreeMap<Fingerprint, SuppressionRecord>,
}

/// 抑制记录检查点，每个实例一个 JSON 文件
#[derive(Debug, Clone)]
pub struct SuppressionCheckpoint {
    dir: PathBuf,
}

impl SuppressionCheckpoint {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, instance_id: &str) -> PathBuf {
        let name: String = instance_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }

    /// 保存检查点（临时文件 + 原子重命名）
    pub async fn save(&self, state: &SuppressionState) -> Result<(), CheckpointError> {
        let file = CheckpointFile {
            instance_id: state.instance_id().to_string(),
            saved_at: Utc::now(),
            records: state.records().clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(state.instance_id());
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json).await?;
        fs::rename(&temp_path, &path).await?;

        info!(
            instance = state.instance_id(),
            records = file.records.len(),
            "Suppression checkpoint saved to {:?}",
            path
        );
        Ok(())
    }

    /// 加载检查点，不存在时返回 None
    pub async fn load(
        &self,
        instance_id: &str,
    ) -> Result<Option<BTreeMap<Fingerprint, SuppressionRecord>>, CheckpointError> {
        let path = self.path_for(instance_id);
        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(&path).await?;
        let file: CheckpointFile = serde_json::from_str(&json)?;
        if file.instance_id != instance_id {
            return Err(CheckpointError::InstanceMismatch {
                expected: instance_id.to_string(),
                found: file.instance_id,
            });
        }

        info!(
            instance = instance_id,
            records = file.records.len(),
            saved_at = %file.saved_at,
            "Suppression checkpoint loaded from {:?}",
            path
        );
        Ok(Some(file.records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SuppressionPolicy;
    use sentinel_types::{Evidence, Finding, QueryKey, ScenarioKind, Severity, Subject};
    use tempfile::tempdir;

    fn finding() -> Finding {
        Finding::new(
            "pg/main",
            ScenarioKind::SlowQueryTopN,
            Subject::query(QueryKey::new("1:1:1")),
            Evidence::SlowQuery {
                rank: 1,
                delta_time_ms: 5000.0,
                delta_calls: 10,
                mean_time_ms: 500.0,
                cpu_time_ms: None,
                io_time_ms: None,
                weighted_by_kcache: false,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_save_and_restore() {
        let temp_dir = tempdir().unwrap();
        let checkpoint = SuppressionCheckpoint::new(temp_dir.path().join("state"));

        let policy = SuppressionPolicy::new(3600, 3);
        let mut state = SuppressionState::new("pg/main", policy.clone());
        let now = Utc::now();
        state.admit(finding(), Severity::L2, now);
        state.admit(finding(), Severity::L2, now + chrono::Duration::minutes(5));

        checkpoint.save(&state).await.unwrap();
        assert!(checkpoint.path_for("pg/main").ends_with("pg_main.json"));

        let records = checkpoint.load("pg/main").await.unwrap().unwrap();
        let mut restored = SuppressionState::restore("pg/main", policy, records);
        assert_eq!(restored.records(), state.records());

        // 恢复后仍在窗口内，不会重复告警
        let admission = restored.admit(finding(), Severity::L2, now + chrono::Duration::minutes(10));
        assert!(!admission.is_emit());
    }

    #[tokio::test]
    async fn test_missing_checkpoint() {
        let temp_dir = tempdir().unwrap();
        let checkpoint = SuppressionCheckpoint::new(temp_dir.path());
        assert!(checkpoint.load("pg-main").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint() {
        let temp_dir = tempdir().unwrap();
        let checkpoint = SuppressionCheckpoint::new(temp_dir.path());
        std::fs::write(checkpoint.path_for("pg-main"), "not json").unwrap();
        assert!(matches!(
            checkpoint.load("pg-main").await,
            Err(CheckpointError::SerializationError(_))
        ));
    }
}
