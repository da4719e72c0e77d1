use crate::finding::{Finding, ScenarioKind, Subject};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// 告警级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    L1,
    L2,
    L3,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::L1 => "L1",
            Severity::L2 => "L2",
            Severity::L3 => "L3",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::L1 => "提示",
            Severity::L2 => "警告",
            Severity::L3 => "严重",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "L1" => Ok(Severity::L1),
            "L2" => Ok(Severity::L2),
            "L3" => Ok(Severity::L3),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// 去重指纹
///
/// `(instance_id, scenario_kind, subject)` 的 SHA-256，不包含证据，
/// 因此同一问题在不同周期的数值变化不会产生新指纹。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(instance_id: &str, kind: ScenarioKind, subject: &Subject) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(instance_id.as_bytes());
        hasher.update([0x1f]);
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(subject.canonical().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn of(finding: &Finding) -> Self {
        Self::compute(&finding.instance_id, finding.scenario_kind, &finding.subject)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 展示用的短指纹
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 通过去重后的告警
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub fingerprint: Fingerprint,
    pub finding: Finding,
    pub severity: Severity,
    pub conclusion: String,

    /// 上一次告警以来被抑制的重复检测次数
    pub suppressed_since_last: u64,

    /// 是否因级别升高而提前发出
    #[serde(default)]
    pub escalated: bool,

    pub emitted_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        fingerprint: Fingerprint,
        finding: Finding,
        severity: Severity,
        suppressed_since_last: u64,
        emitted_at: DateTime<Utc>,
    ) -> Self {
        let conclusion = finding.conclusion();
        Self {
            fingerprint,
            finding,
            severity,
            conclusion,
            suppressed_since_last,
            escalated: false,
            emitted_at,
        }
    }

    pub fn escalated(mut self) -> Self {
        self.escalated = true;
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.finding.instance_id
    }

    pub fn title(&self) -> String {
        format!(
            "[{}][{}] {} - {}",
            self.severity,
            self.severity.label(),
            self.finding.scenario_kind.title(),
            self.finding.instance_id
        )
    }
}
