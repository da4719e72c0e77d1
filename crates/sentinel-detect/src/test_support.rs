use chrono::{Duration, TimeZone, Utc};
use sentinel_core::{CycleView, Degradation, SnapshotStore};
use sentinel_types::{IndexCandidate, QueryKey, QueryStat, Snapshot};

/// 一个查询在连续快照中的 `(calls, total_time_ms)`
pub struct StatSeries {
    pub key: QueryKey,
    pub points: Vec<(u64, f64)>,
}

impl StatSeries {
    pub fn new(key: &str, points: &[(u64, f64)]) -> Self {
        Self {
            key: QueryKey::new(key),
            points: points.to_vec(),
        }
    }
}

/// 按顺序提交每个快照，返回每个周期的视图
pub fn views_from(series: &[StatSeries]) -> Vec<CycleView> {
    let generations = series.iter().map(|s| s.points.len()).max().unwrap_or(0);
    let snapshots = (0..generations)
        .map(|i| {
            let mut snapshot = Snapshot::new("pg-test", at(i));
            for s in series {
                if let Some((calls, time)) = s.points.get(i) {
                    snapshot = snapshot.with_stat(s.key.clone(), QueryStat::new(*calls, *time));
                }
            }
            snapshot
        })
        .collect();
    views_from_snapshots(snapshots)
}

pub fn views_from_snapshots(snapshots: Vec<Snapshot>) -> Vec<CycleView> {
    let mut store = SnapshotStore::new("pg-test");
    let mut views = Vec::new();
    for (i, snapshot) in snapshots.into_iter().enumerate() {
        let staged = store.stage(snapshot, Vec::new(), at(i));
        views.push(staged.view().clone());
        store.commit(staged).unwrap();
    }
    views
}

pub fn view_from(series: &[StatSeries], degraded: Vec<Degradation>) -> CycleView {
    let mut view = views_from(series).pop().unwrap();
    view.degraded = degraded;
    view
}

pub fn view_with_candidates(candidates: Option<Vec<IndexCandidate>>) -> CycleView {
    let mut snapshot = Snapshot::new("pg-test", at(0));
    snapshot.index_candidates = candidates;
    views_from_snapshots(vec![snapshot]).pop().unwrap()
}

pub fn at(cycle: usize) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(5 * cycle as i64)
}
