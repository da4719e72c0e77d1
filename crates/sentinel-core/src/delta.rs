use sentinel_types::{QueryKey, QueryStat, Snapshot};
use std::collections::BTreeMap;

/// 浮点计数器回退的容差
const FLOAT_EPSILON: f64 = 1e-6;

/// 一个查询在一个区间内的增量
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDelta {
    pub calls: u64,
    pub total_time_ms: f64,
    pub rows: u64,
    pub cpu_time_ms: Option<f64>,
    pub io_time_ms: Option<f64>,
}

impl QueryDelta {
    pub fn mean_time_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_time_ms / self.calls as f64
        }
    }

    /// CPU + I/O 耗时，任一缺失时为 None
    pub fn kcache_time_ms(&self) -> Option<f64> {
        match (self.cpu_time_ms, self.io_time_ms) {
            (Some(cpu), Some(io)) => Some(cpu + io),
            _ => None,
        }
    }

}

/// 增量计算结果
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaState {
    Valid(QueryDelta),
    /// 上一快照中没有该查询：累计值的起点未知，本周期没有增量
    New,
    /// 调用次数减少：统计被重置，本周期没有增量
    Reset,
    /// 调用次数未减少但其它累计计数器减少了
    Inconsistent { counter: &'static str },
}

impl DeltaState {
    pub fn valid(&self) -> Option<&QueryDelta> {
        match self {
            DeltaState::Valid(delta) => Some(delta),
            _ => None,
        }
    }
}

pub type DeltaTable = BTreeMap<QueryKey, DeltaState>;

/// 计算单个查询的增量
///
/// 上一快照中不存在的查询没有增量：它可能是新语句，也可能是长期未执行后
/// 重新出现、累计计数远大于本区间实际执行量的旧语句。
pub fn compute_delta(previous: Option<&QueryStat>, current: &QueryStat) -> DeltaState {
    let Some(prev) = previous else {
        return DeltaState::New;
    };

    if current.calls < prev.calls {
        return DeltaState::Reset;
    }
    if current.total_time_ms + FLOAT_EPSILON < prev.total_time_ms {
        return DeltaState::Inconsistent {
            counter: "total_time",
        };
    }
    if current.rows < prev.rows {
        return DeltaState::Inconsistent { counter: "rows" };
    }

    let cpu_time_ms = match float_delta(prev.cpu_time_ms, current.cpu_time_ms) {
        Ok(value) => value,
        Err(()) => return DeltaState::Inconsistent { counter: "cpu_time" },
    };
    let io_time_ms = match float_delta(prev.io_time_ms, current.io_time_ms) {
        Ok(value) => value,
        Err(()) => return DeltaState::Inconsistent { counter: "io_time" },
    };

    DeltaState::Valid(QueryDelta {
        calls: current.calls - prev.calls,
        total_time_ms: (current.total_time_ms - prev.total_time_ms).max(0.0),
        rows: current.rows - prev.rows,
        cpu_time_ms,
        io_time_ms,
    })
}

fn float_delta(previous: Option<f64>, current: Option<f64>) -> Result<Option<f64>, ()> {
    match (previous, current) {
        (Some(prev), Some(cur)) => {
            if cur + FLOAT_EPSILON < prev {
                Err(())
            } else {
                Ok(Some((cur - prev).max(0.0)))
            }
        }
        _ => Ok(None),
    }
}

/// 计算两次快照之间所有查询的增量
///
/// 只遍历当前快照中的查询，上一快照中消失的查询不产生条目。
pub fn compute_deltas(previous: &Snapshot, current: &Snapshot) -> DeltaTable {
    current
        .stats
        .iter()
        .map(|(key, stat)| (key.clone(), compute_delta(previous.get(key), stat)))
        .collect()
}
