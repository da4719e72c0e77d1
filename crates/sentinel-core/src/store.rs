use chrono::{DateTime, Utc};
use sentinel_types::{OptionalFeature, QueryKey, QueryStat, Snapshot};
use std::sync::Arc;

use crate::delta::{compute_deltas, DeltaState, DeltaTable, QueryDelta};
use crate::error::{Result, SentinelError};
use crate::source::Degradation;

/// 上一区间中某个查询的状态
#[derive(Debug, Clone, PartialEq)]
pub enum PriorDelta<'a> {
    /// 还没有上一区间（不足三个快照）
    NoHistory,
    /// 上一区间中该查询不存在
    Absent,
    Valid(&'a QueryDelta),
    /// 上一区间是重置、不一致，或该查询在上一区间才出现
    Unusable,
}

/// 一个周期的只读分析视图
#[derive(Debug, Clone)]
pub struct CycleView {
    pub instance_id: String,
    pub now: DateTime<Utc>,
    pub current: Arc<Snapshot>,
    pub previous: Option<Arc<Snapshot>>,
    /// 本区间增量，首个周期为 None
    pub deltas: Option<Arc<DeltaTable>>,
    /// 上一区间增量
    pub prior_deltas: Option<Arc<DeltaTable>>,
    pub degraded: Vec<Degradation>,
}

impl CycleView {
    pub fn has_history(&self) -> bool {
        self.deltas.is_some()
    }

    pub fn has_prior_interval(&self) -> bool {
        self.prior_deltas.is_some()
    }

    pub fn feature_available(&self, feature: OptionalFeature) -> bool {
        !self.degraded.iter().any(|d| d.feature == feature)
    }

    pub fn stat(&self, key: &QueryKey) -> Option<&QueryStat> {
        self.current.get(key)
    }

    pub fn delta(&self, key: &QueryKey) -> Option<&DeltaState> {
        self.deltas.as_ref().and_then(|t| t.get(key))
    }

    /// 遍历本区间的全部增量
    pub fn deltas(&self) -> impl Iterator<Item = (&QueryKey, &DeltaState)> {
        self.deltas.iter().flat_map(|t| t.iter())
    }

    pub fn prior(&self, key: &QueryKey) -> PriorDelta<'_> {
        match &self.prior_deltas {
            None => PriorDelta::NoHistory,
            Some(table) => match table.get(key) {
                None => PriorDelta::Absent,
                Some(DeltaState::Valid(delta)) => PriorDelta::Valid(delta),
                Some(_) => PriorDelta::Unusable,
            },
        }
    }

    /// 本区间中计数器不一致的查询
    pub fn inconsistent(&self) -> Vec<(&QueryKey, &'static str)> {
        self.deltas()
            .filter_map(|(key, state)| match state {
                DeltaState::Inconsistent { counter } => Some((key, *counter)),
                _ => None,
            })
            .collect()
    }

    pub fn reset_count(&self) -> usize {
        self.deltas()
            .filter(|(_, state)| matches!(state, DeltaState::Reset))
            .count()
    }
}

/// 待提交的快照轮换
#[derive(Debug, Clone)]
pub struct StagedRotation {
    generation: u64,
    view: CycleView,
}

impl StagedRotation {
    pub fn view(&self) -> &CycleView {
        &self.view
    }
}

/// 单个实例的快照存储：当前、上一快照以及上一区间的增量表
#[derive(Debug)]
pub struct SnapshotStore {
    instance_id: String,
    current: Option<Arc<Snapshot>>,
    previous: Option<Arc<Snapshot>>,
    last_deltas: Option<Arc<DeltaTable>>,
    generation: u64,
}

impl SnapshotStore {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            current: None,
            previous: None,
            last_deltas: None,
            generation: 0,
        }
    }

    pub fn current(&self) -> Option<&Arc<Snapshot>> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&Arc<Snapshot>> {
        self.previous.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 基于新快照计算分析视图，不修改存储
    pub fn stage(
        &self,
        snapshot: Snapshot,
        degraded: Vec<Degradation>,
        now: DateTime<Utc>,
    ) -> StagedRotation {
        let current = Arc::new(snapshot);
        let deltas = self
            .current
            .as_ref()
            .map(|prev| Arc::new(compute_deltas(prev, &current)));

        StagedRotation {
            generation: self.generation,
            view: CycleView {
                instance_id: self.instance_id.clone(),
                now,
                current,
                previous: self.current.clone(),
                deltas,
                prior_deltas: self.last_deltas.clone(),
                degraded,
            },
        }
    }

    /// 周期完成后提交轮换
    pub fn commit(&mut self, staged: StagedRotation) -> Result<()> {
        if staged.generation != self.generation {
            return Err(SentinelError::InternalInvariantViolation(format!(
                "stale snapshot rotation for {}: staged at generation {}, store at {}",
                self.instance_id, staged.generation, self.generation
            )));
        }

        let view = staged.view;
        self.previous = self.current.take();
        self.current = Some(view.current);
        self.last_deltas = view.deltas;
        self.generation += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(calls: u64, time: f64) -> Snapshot {
        Snapshot::new("pg", Utc::now()).with_stat(QueryKey::new("q"), QueryStat::new(calls, time))
    }

    #[test]
    fn test_stage_does_not_mutate() {
        let store = SnapshotStore::new("pg");
        let staged = store.stage(snapshot(1, 1.0), Vec::new(), Utc::now());
        assert!(!staged.view().has_history());
        assert!(store.current().is_none());
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn test_three_generations_of_history() {
        let mut store = SnapshotStore::new("pg");
        let key = QueryKey::new("q");

        let staged = store.stage(snapshot(100, 0.0), Vec::new(), Utc::now());
        assert_eq!(staged.view().prior(&key), PriorDelta::NoHistory);
        store.commit(staged).unwrap();

        let staged = store.stage(snapshot(100, 1000.0), Vec::new(), Utc::now());
        assert!(staged.view().has_history());
        assert!(!staged.view().has_prior_interval());
        store.commit(staged).unwrap();

        let staged = store.stage(snapshot(110, 5000.0), Vec::new(), Utc::now());
        let view = staged.view();
        match view.prior(&key) {
            PriorDelta::Valid(delta) => assert_eq!(delta.total_time_ms, 1000.0),
            other => panic!("unexpected prior: {:?}", other),
        }
        assert_eq!(view.delta(&key).unwrap().valid().unwrap().total_time_ms, 4000.0);
        assert_eq!(view.prior(&QueryKey::new("other")), PriorDelta::Absent);
        store.commit(staged).unwrap();
        assert_eq!(store.generation(), 3);
        assert!(store.previous().is_some());
    }

    #[test]
    fn test_stale_commit_rejected() {
        let mut store = SnapshotStore::new("pg");
        let first = store.stage(snapshot(1, 1.0), Vec::new(), Utc::now());
        let second = store.stage(snapshot(2, 2.0), Vec::new(), Utc::now());
        store.commit(first).unwrap();
        let err = store.commit(second).unwrap_err();
        assert!(matches!(err, SentinelError::InternalInvariantViolation(_)));
    }

    #[test]
    fn test_reset_prior_unusable() {
        let mut store = SnapshotStore::new("pg");
        let key = QueryKey::new("q");
        for (calls, time) in [(100, 1000.0), (5, 50.0)] {
            let staged = store.stage(snapshot(calls, time), Vec::new(), Utc::now());
            store.commit(staged).unwrap();
        }
        let staged = store.stage(snapshot(20, 500.0), Vec::new(), Utc::now());
        assert_eq!(staged.view().prior(&key), PriorDelta::Unusable);
    }

    #[test]
    fn test_key_new_in_prior_interval_unusable() {
        let mut store = SnapshotStore::new("pg");
        let key = QueryKey::new("q");
        let staged = store.stage(Snapshot::new("pg", Utc::now()), Vec::new(), Utc::now());
        store.commit(staged).unwrap();
        let staged = store.stage(snapshot(10_000, 90_000.0), Vec::new(), Utc::now());
        assert_eq!(staged.view().delta(&key), Some(&DeltaState::New));
        store.commit(staged).unwrap();

        let staged = store.stage(snapshot(10_010, 90_100.0), Vec::new(), Utc::now());
        assert_eq!(staged.view().prior(&key), PriorDelta::Unusable);
        assert_eq!(staged.view().delta(&key).unwrap().valid().unwrap().calls, 10);
    }

    #[test]
    fn test_feature_available() {
        let store = SnapshotStore::new("pg");
        let staged = store.stage(
            snapshot(1, 1.0),
            vec![Degradation::new(OptionalFeature::Kcache, "missing")],
            Utc::now(),
        );
        assert!(!staged.view().feature_available(OptionalFeature::Kcache));
        assert!(staged.view().feature_available(OptionalFeature::Qualstats));
    }
}
