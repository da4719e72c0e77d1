use crate::snapshot::QueryKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 场景类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// 慢查询 Top-N
    SlowQueryTopN,
    /// 异常增长
    AbnormalGrowth,
    /// 性能回退
    Regression,
    /// 缺失索引
    MissingIndex,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 4] = [
        ScenarioKind::SlowQueryTopN,
        ScenarioKind::AbnormalGrowth,
        ScenarioKind::Regression,
        ScenarioKind::MissingIndex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioKind::SlowQueryTopN => "slow_query_top_n",
            ScenarioKind::AbnormalGrowth => "abnormal_growth",
            ScenarioKind::Regression => "regression",
            ScenarioKind::MissingIndex => "missing_index",
        }
    }

    /// 通知标题中使用的名称
    pub fn title(&self) -> &'static str {
        match self {
            ScenarioKind::SlowQueryTopN => "慢查询",
            ScenarioKind::AbnormalGrowth => "执行量异常增长",
            ScenarioKind::Regression => "性能回退",
            ScenarioKind::MissingIndex => "缺失索引",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 发现项的对象：某个查询或某个候选索引
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Subject {
    Query { key: QueryKey },
    Index { table: String, columns: Vec<String> },
}

impl Subject {
    pub fn query(key: QueryKey) -> Self {
        Subject::Query { key }
    }

    pub fn index(table: impl Into<String>, columns: Vec<String>) -> Self {
        Subject::Index {
            table: table.into(),
            columns,
        }
    }

    /// 参与指纹计算的规范化表示
    pub fn canonical(&self) -> String {
        match self {
            Subject::Query { key } => format!("query:{}", key),
            Subject::Index { table, columns } => format!("index:{}({})", table, columns.join(",")),
        }
    }

    pub fn query_key(&self) -> Option<&QueryKey> {
        match self {
            Subject::Query { key } => Some(key),
            Subject::Index { .. } => None,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Query { key } => write!(f, "查询 {}", key),
            Subject::Index { table, columns } => write!(f, "{} ({})", table, columns.join(", ")),
        }
    }
}

/// 异常增长比较的指标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GrowthMetric {
    /// 区间累计耗时
    #[default]
    Duration,
    /// 区间调用次数
    Calls,
}

impl GrowthMetric {
    pub fn unit(&self) -> &'static str {
        match self {
            GrowthMetric::Duration => "ms",
            GrowthMetric::Calls => "次",
        }
    }
}

/// 各场景的证据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
    SlowQuery {
        rank: usize,
        /// 排名依据的区间耗时（毫秒）
        delta_time_ms: f64,
        delta_calls: u64,
        mean_time_ms: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cpu_time_ms: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        io_time_ms: Option<f64>,
        /// 是否按 kcache 的 CPU + I/O 排名
        weighted_by_kcache: bool,
    },
    Growth {
        metric: GrowthMetric,
        current_delta: f64,
        prior_delta: f64,
        ratio: f64,
        delta_calls: u64,
    },
    Regression {
        baseline_mean_ms: f64,
        current_mean_ms: f64,
        /// 相对基线的偏离比例
        deviation: f64,
        consecutive_cycles: u32,
        delta_calls: u64,
    },
    MissingIndex {
        execution_count: u64,
        rows_filtered: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        estimated_benefit: Option<f64>,
        ddl: String,
    },
}

impl Evidence {
    /// 通知中展示的关键指标
    pub fn key_metrics(&self) -> Vec<(&'static str, String)> {
        match self {
            Evidence::SlowQuery {
                rank,
                delta_time_ms,
                delta_calls,
                mean_time_ms,
                cpu_time_ms,
                io_time_ms,
                ..
            } => {
                let mut metrics = vec![
                    ("排名", format!("#{}", rank)),
                    ("区间耗时", format!("{:.1} ms", delta_time_ms)),
                    ("调用次数", delta_calls.to_string()),
                    ("平均耗时", format!("{:.2} ms", mean_time_ms)),
                ];
                if let (Some(cpu), Some(io)) = (cpu_time_ms, io_time_ms) {
                    metrics.push(("CPU / I/O", format!("{:.1} ms / {:.1} ms", cpu, io)));
                }
                metrics
            }
            Evidence::Growth {
                metric,
                current_delta,
                prior_delta,
                ratio,
                delta_calls,
            } => vec![
                ("本区间", format!("{:.1} {}", current_delta, metric.unit())),
                ("上区间", format!("{:.1} {}", prior_delta, metric.unit())),
                ("增长倍数", format!("{:.2}x", ratio)),
                ("调用次数", delta_calls.to_string()),
            ],
            Evidence::Regression {
                baseline_mean_ms,
                current_mean_ms,
                deviation,
                consecutive_cycles,
                ..
            } => vec![
                ("基线平均耗时", format!("{:.2} ms", baseline_mean_ms)),
                ("当前平均耗时", format!("{:.2} ms", current_mean_ms)),
                ("偏离", format!("+{:.0}%", deviation * 100.0)),
                ("连续周期", consecutive_cycles.to_string()),
            ],
            Evidence::MissingIndex {
                execution_count,
                rows_filtered,
                estimated_benefit,
                ..
            } => {
                let mut metrics = vec![
                    ("执行次数", execution_count.to_string()),
                    ("过滤行数", rows_filtered.to_string()),
                ];
                if let Some(benefit) = estimated_benefit {
                    metrics.push(("预计代价下降", format!("{:.0}%", benefit * 100.0)));
                }
                metrics
            }
        }
    }
}

/// 检测器的输出
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub instance_id: String,
    pub scenario_kind: ScenarioKind,
    pub subject: Subject,
    pub evidence: Evidence,
    pub detected_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl Finding {
    pub fn new(
        instance_id: impl Into<String>,
        scenario_kind: ScenarioKind,
        subject: Subject,
        evidence: Evidence,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            scenario_kind,
            subject,
            evidence,
            detected_at,
            database: None,
            query: None,
        }
    }

    pub fn with_context(mut self, database: Option<String>, query: Option<String>) -> Self {
        self.database = database;
        self.query = query;
        self
    }

    /// 人类可读的结论
    pub fn conclusion(&self) -> String {
        let db = self
            .database
            .as_deref()
            .map(|d| format!("（库 {}）", d))
            .unwrap_or_default();

        match &self.evidence {
            Evidence::SlowQuery {
                rank,
                delta_time_ms,
                delta_calls,
                ..
            } => format!(
                "{}{} 在本周期累计耗时 {:.1} ms，调用 {} 次，位列慢查询第 {} 名",
                self.subject, db, delta_time_ms, delta_calls, rank
            ),
            Evidence::Growth {
                metric,
                current_delta,
                prior_delta,
                ratio,
                ..
            } => format!(
                "{}{} 本周期 {:.1} {}，上一周期 {:.1} {}，增长 {:.2} 倍",
                self.subject,
                db,
                current_delta,
                metric.unit(),
                prior_delta,
                metric.unit(),
                ratio
            ),
            Evidence::Regression {
                baseline_mean_ms,
                current_mean_ms,
                consecutive_cycles,
                ..
            } => format!(
                "{}{} 平均耗时从基线 {:.2} ms 升至 {:.2} ms，已连续 {} 个周期",
                self.subject, db, baseline_mean_ms, current_mean_ms, consecutive_cycles
            ),
            Evidence::MissingIndex {
                execution_count,
                rows_filtered,
                ddl,
                ..
            } => format!(
                "表 {} 的谓词执行 {} 次共过滤 {} 行且无可用索引，建议：{}",
                self.subject, execution_count, rows_filtered, ddl
            ),
        }
    }
}
