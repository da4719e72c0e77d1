use chrono::{DateTime, Duration, Utc};
use sentinel_config::SuppressionConfig;
use sentinel_types::{Alert, Finding, Fingerprint, Severity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// 抑制策略
#[derive(Debug, Clone)]
pub struct SuppressionPolicy {
    pub window: Duration,
    pub retention: Duration,
    pub escalate_on_severity_increase: bool,
}

/// 抑制窗口与记录保留时长的上限，时间戳加减不会溢出
const MAX_SPAN_SECS: i64 = 100 * 365 * 24 * 3600;

impl SuppressionPolicy {
    pub fn new(window_secs: u64, retention_multiplier: u32) -> Self {
        let max_span = Duration::seconds(MAX_SPAN_SECS);
        let window_secs = i64::try_from(window_secs).unwrap_or(i64::MAX).min(MAX_SPAN_SECS);
        let window = Duration::seconds(window_secs);
        let multiplier = i32::try_from(retention_multiplier.max(1)).unwrap_or(i32::MAX);
        let retention = window
            .checked_mul(multiplier)
            .map_or(max_span, |retention| retention.min(max_span));
        Self {
            window,
            retention,
            escalate_on_severity_increase: false,
        }
    }

    pub fn from_config(config: &SuppressionConfig) -> Self {
        let mut policy = Self::new(config.window_secs, config.retention_multiplier);
        policy.escalate_on_severity_increase = config.escalate_on_severity_increase;
        policy
    }

    pub fn with_escalation(mut self, enabled: bool) -> Self {
        self.escalate_on_severity_increase = enabled;
        self
    }
}

/// 告警投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    /// 重试耗尽或永久失败
    Failed,
    /// 队列溢出被丢弃
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub outcome: DeliveryOutcome,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// 每个活跃指纹一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppressionRecord {
    pub first_emitted_at: DateTime<Utc>,
    pub last_emitted_at: DateTime<Utc>,
    /// 累计检测次数（告警与被抑制的都计入）
    pub emit_count: u64,
    /// 上一次告警以来被抑制的次数
    pub suppressed_since_emit: u64,
    pub last_severity: Severity,
    pub last_seen_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_delivery: Option<DeliveryRecord>,
}

/// 去重判定结果
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Emit(Alert),
    Suppressed {
        fingerprint: Fingerprint,
        severity: Severity,
        suppressed_since_emit: u64,
        next_eligible_at: DateTime<Utc>,
    },
}

impl Admission {
    pub fn alert(&self) -> Option<&Alert> {
        match self {
            Admission::Emit(alert) => Some(alert),
            Admission::Suppressed { .. } => None,
        }
    }

    pub fn into_alert(self) -> Option<Alert> {
        match self {
            Admission::Emit(alert) => Some(alert),
            Admission::Suppressed { .. } => None,
        }
    }

    pub fn is_emit(&self) -> bool {
        matches!(self, Admission::Emit(_))
    }
}

/// 单个实例的抑制状态
#[derive(Debug)]
pub struct SuppressionState {
    instance_id: String,
    policy: SuppressionPolicy,
    records: BTreeMap<Fingerprint, SuppressionRecord>,
    dirty: bool,
}

impl SuppressionState {
    pub fn new(instance_id: impl Into<String>, policy: SuppressionPolicy) -> Self {
        Self {
            instance_id: instance_id.into(),
            policy,
            records: BTreeMap::new(),
            dirty: false,
        }
    }

    /// 从检查点恢复
    pub fn restore(
        instance_id: impl Into<String>,
        policy: SuppressionPolicy,
        records: BTreeMap<Fingerprint, SuppressionRecord>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            policy,
            records,
            dirty: false,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn policy(&self) -> &SuppressionPolicy {
        &self.policy
    }

    pub fn records(&self) -> &BTreeMap<Fingerprint, SuppressionRecord> {
        &self.records
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&SuppressionRecord> {
        self.records.get(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 上次检查点之后是否有变化
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// 判定单个发现项是否告警
    pub fn admit(&mut self, finding: Finding, severity: Severity, now: DateTime<Utc>) -> Admission {
        let fingerprint = Fingerprint::of(&finding);
        self.admit_inner(fingerprint, finding, severity, now, false)
    }

    fn admit_inner(
        &mut self,
        fingerprint: Fingerprint,
        finding: Finding,
        severity: Severity,
        now: DateTime<Utc>,
        force_suppress: bool,
    ) -> Admission {
        self.dirty = true;

        let Some(record) = self.records.get_mut(&fingerprint) else {
            self.records.insert(
                fingerprint.clone(),
                SuppressionRecord {
                    first_emitted_at: now,
                    last_emitted_at: now,
                    emit_count: 1,
                    suppressed_since_emit: 0,
                    last_severity: severity,
                    last_seen_at: now,
                    last_delivery: None,
                },
            );
            return Admission::Emit(Alert::new(fingerprint, finding, severity, 0, now));
        };

        record.emit_count += 1;
        record.last_seen_at = now;

        let window_elapsed = now - record.last_emitted_at >= self.policy.window;
        let escalated = !window_elapsed
            && self.policy.escalate_on_severity_increase
            && severity > record.last_severity;

        if !force_suppress && (window_elapsed || escalated) {
            let suppressed = record.suppressed_since_emit;
            record.last_emitted_at = now;
            record.suppressed_since_emit = 0;
            record.last_severity = severity;

            let alert = Alert::new(fingerprint, finding, severity, suppressed, now);
            if escalated {
                debug!(
                    instance = %self.instance_id,
                    fingerprint = alert.fingerprint.short(),
                    severity = %severity,
                    "Severity increased, suppression window bypassed"
                );
                return Admission::Emit(alert.escalated());
            }
            return Admission::Emit(alert);
        }

        record.suppressed_since_emit += 1;
        Admission::Suppressed {
            fingerprint,
            severity,
            suppressed_since_emit: record.suppressed_since_emit,
            next_eligible_at: record.last_emitted_at + self.policy.window,
        }
    }

    /// 一个周期的批量判定，结束后清理过期记录
    ///
    /// 同一批次中指纹相同的发现项最多产生一条告警。
    pub fn admit_batch(
        &mut self,
        findings: Vec<(Finding, Severity)>,
        now: DateTime<Utc>,
    ) -> Vec<Admission> {
        let mut emitted: HashSet<Fingerprint> = HashSet::new();
        let mut admissions = Vec::with_capacity(findings.len());

        for (finding, severity) in findings {
            let fingerprint = Fingerprint::of(&finding);
            let already = emitted.contains(&fingerprint);
            let admission = self.admit_inner(fingerprint.clone(), finding, severity, now, already);
            if admission.is_emit() {
                emitted.insert(fingerprint);
            }
            admissions.push(admission);
        }

        self.expire(now);
        admissions
    }

    /// 清除超过保留期未再检测到的记录
    pub fn expire(&mut self, now: DateTime<Utc>) -> usize {
        let retention = self.policy.retention;
        let before = self.records.len();
        self.records
            .retain(|_, record| now - record.last_seen_at < retention);
        let removed = before - self.records.len();

        if removed > 0 {
            self.dirty = true;
            info!(
                instance = %self.instance_id,
                removed,
                remaining = self.records.len(),
                "Expired suppression records"
            );
        }
        removed
    }

    /// 记录投递结果，不影响 `last_emitted_at`
    pub fn record_delivery(&mut self, fingerprint: &Fingerprint, record: DeliveryRecord) -> bool {
        match self.records.get_mut(fingerprint) {
            Some(existing) => {
                existing.last_delivery = Some(record);
                self.dirty = true;
                true
            }
            None => false,
        }
    }
}

/// 实例任务持有的抑制状态句柄
pub type SuppressionHandle = Arc<Mutex<SuppressionState>>;

/// 所有实例的抑制状态，供发送端回写投递结果
#[derive(Debug, Clone, Default)]
pub struct SuppressionRegistry {
    handles: HashMap<String, SuppressionHandle>,
}

impl SuppressionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, instance_id: impl Into<String>, handle: SuppressionHandle) {
        self.handles.insert(instance_id.into(), handle);
    }

    pub fn get(&self, instance_id: &str) -> Option<&SuppressionHandle> {
        self.handles.get(instance_id)
    }

    pub fn handles(&self) -> impl Iterator<Item = (&String, &SuppressionHandle)> {
        self.handles.iter()
    }

    pub async fn record_delivery(
        &self,
        instance_id: &str,
        fingerprint: &Fingerprint,
        record: DeliveryRecord,
    ) -> bool {
        match self.handles.get(instance_id) {
            Some(handle) => handle.lock().await.record_delivery(fingerprint, record),
            None => false,
        }
    }
}
