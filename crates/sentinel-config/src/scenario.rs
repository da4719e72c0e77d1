use sentinel_types::GrowthMetric;
use serde::{Deserialize, Serialize};

use crate::app::default_true;

/// 主指标到 L2 / L3 的分级阈值，低于 `l2` 为 L1
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct SeverityThresholds {
    pub l2: f64,
    pub l3: f64,
}

impl SeverityThresholds {
    pub const fn new(l2: f64, l3: f64) -> Self {
        Self { l2, l3 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ScenariosConfig {
    #[serde(default)]
    pub slow_query: SlowQueryConfig,
    #[serde(default)]
    pub growth: GrowthConfig,
    #[serde(default)]
    pub regression: RegressionConfig,
    #[serde(default)]
    pub missing_index: MissingIndexConfig,
}

/// 慢查询 Top-N
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlowQueryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// 区间耗时下限（毫秒）
    #[serde(default = "default_min_delta_time_ms")]
    pub min_delta_time_ms: f64,
    #[serde(default = "default_slow_min_calls")]
    pub min_calls: u64,
    /// 按区间耗时（毫秒）分级
    #[serde(default = "default_slow_severity")]
    pub severity: SeverityThresholds,
}

/// 异常增长
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GrowthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_growth_min_calls")]
    pub min_calls: u64,
    #[serde(default)]
    pub metric: GrowthMetric,
    /// 按增长倍数分级
    #[serde(default = "default_growth_severity")]
    pub severity: SeverityThresholds,
}

/// 性能回退
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegressionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 相对基线的偏离比例，0.5 表示超过基线 50%
    #[serde(default = "default_regression_threshold")]
    pub threshold: f64,
    #[serde(default = "default_consecutive_cycles")]
    pub consecutive_cycles: u32,
    /// EMA 平滑系数
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f64,
    /// 基线可信前需要的样本数
    #[serde(default = "default_warmup_cycles")]
    pub warmup_cycles: u32,
    #[serde(default = "default_regression_min_calls")]
    pub min_calls: u64,
    /// 基线闲置多久后淘汰
    #[serde(default = "default_baseline_ttl_secs")]
    pub ttl_secs: u64,
    /// 基线表容量上限
    #[serde(default = "default_max_tracked")]
    pub max_tracked: usize,
    /// 按偏离比例分级
    #[serde(default = "default_regression_severity")]
    pub severity: SeverityThresholds,
}

/// 缺失索引
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MissingIndexConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_min_executions")]
    pub min_executions: u64,
    #[serde(default = "default_min_rows_filtered")]
    pub min_rows_filtered: u64,
    /// hypopg 评估过的候选需要达到的代价下降比例
    #[serde(default = "default_min_benefit")]
    pub min_benefit: f64,
    /// 每周期最多报告的候选数
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// 按预计代价下降比例分级
    #[serde(default = "default_index_severity")]
    pub severity: SeverityThresholds,
    /// 没有 hypopg 评估时，按每次执行过滤的行数分级
    #[serde(default = "default_index_rows_severity")]
    pub rows_severity: SeverityThresholds,
}

fn default_top_n() -> usize {
    5
}

fn default_min_delta_time_ms() -> f64 {
    1000.0
}

fn default_slow_min_calls() -> u64 {
    1
}

fn default_slow_severity() -> SeverityThresholds {
    SeverityThresholds::new(10_000.0, 60_000.0)
}

fn default_multiplier() -> f64 {
    3.0
}

fn default_growth_min_calls() -> u64 {
    10
}

fn default_growth_severity() -> SeverityThresholds {
    SeverityThresholds::new(5.0, 10.0)
}

fn default_regression_threshold() -> f64 {
    0.5
}

fn default_consecutive_cycles() -> u32 {
    2
}

fn default_ema_alpha() -> f64 {
    0.2
}

fn default_warmup_cycles() -> u32 {
    3
}

fn default_regression_min_calls() -> u64 {
    5
}

fn default_baseline_ttl_secs() -> u64 {
    86_400
}

fn default_max_tracked() -> usize {
    10_000
}

fn default_regression_severity() -> SeverityThresholds {
    SeverityThresholds::new(1.0, 3.0)
}

fn default_min_executions() -> u64 {
    100
}

fn default_min_rows_filtered() -> u64 {
    10_000
}

fn default_min_benefit() -> f64 {
    0.3
}

fn default_max_candidates() -> usize {
    10
}

fn default_index_severity() -> SeverityThresholds {
    SeverityThresholds::new(0.5, 0.8)
}

fn default_index_rows_severity() -> SeverityThresholds {
    SeverityThresholds::new(10_000.0, 1_000_000.0)
}

impl Default for SlowQueryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_n: default_top_n(),
            min_delta_time_ms: default_min_delta_time_ms(),
            min_calls: default_slow_min_calls(),
            severity: default_slow_severity(),
        }
    }
}

impl Default for GrowthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            multiplier: default_multiplier(),
            min_calls: default_growth_min_calls(),
            metric: GrowthMetric::Duration,
            severity: default_growth_severity(),
        }
    }
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_regression_threshold(),
            consecutive_cycles: default_consecutive_cycles(),
            ema_alpha: default_ema_alpha(),
            warmup_cycles: default_warmup_cycles(),
            min_calls: default_regression_min_calls(),
            ttl_secs: default_baseline_ttl_secs(),
            max_tracked: default_max_tracked(),
            severity: default_regression_severity(),
        }
    }
}

impl Default for MissingIndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_executions: default_min_executions(),
            min_rows_filtered: default_min_rows_filtered(),
            min_benefit: default_min_benefit(),
            max_candidates: default_max_candidates(),
            severity: default_index_severity(),
            rows_severity: default_index_rows_severity(),
        }
    }
}
