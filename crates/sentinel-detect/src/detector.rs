use sentinel_config::ScenariosConfig;
use sentinel_core::CycleView;
use sentinel_types::{Finding, OptionalFeature, ScenarioKind};

use crate::growth::GrowthDetector;
use crate::missing_index::MissingIndexDetector;
use crate::regression::RegressionDetector;
use crate::slow_query::SlowQueryDetector;

/// 场景检测器
///
/// 检测器在实例任务内顺序执行，可以持有跨周期的状态。
pub trait Detector: Send + Sync {
    fn kind(&self) -> ScenarioKind;

    fn name(&self) -> &'static str;

    /// 是否需要本区间增量（至少两个快照）
    fn needs_history(&self) -> bool;

    /// 依赖的可选扩展，扩展降级时整个检测器跳过
    fn required_feature(&self) -> Option<OptionalFeature> {
        None
    }

    fn detect(&mut self, view: &CycleView) -> Vec<Finding>;
}

/// 被跳过的检测器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDetector {
    pub name: &'static str,
    pub reason: String,
}

/// 一个周期的检测结果
#[derive(Debug, Clone, Default)]
pub struct DetectionReport {
    /// 按 `(scenario_kind, subject)` 排序
    pub findings: Vec<Finding>,
    pub skipped: Vec<SkippedDetector>,
}

/// 检测器注册表
#[derive(Default)]
pub struct DetectorRegistry {
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按配置创建所有启用的检测器
    pub fn from_config(config: &ScenariosConfig) -> Self {
        let mut registry = Self::new();
        if config.slow_query.enabled {
            registry.register(Box::new(SlowQueryDetector::new(config.slow_query.clone())));
        }
        if config.growth.enabled {
            registry.register(Box::new(GrowthDetector::new(config.growth.clone())));
        }
        if config.regression.enabled {
            registry.register(Box::new(RegressionDetector::new(config.regression.clone())));
        }
        if config.missing_index.enabled {
            registry.register(Box::new(MissingIndexDetector::new(
                config.missing_index.clone(),
            )));
        }
        registry
    }

    pub fn register(&mut self, detector: Box<dyn Detector>) {
        tracing::debug!(detector = detector.name(), "Detector registered");
        self.detectors.push(detector);
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// 运行所有检测器并合并结果
    pub fn run(&mut self, view: &CycleView) -> DetectionReport {
        let mut report = DetectionReport::default();

        for detector in self.detectors.iter_mut() {
            if let Some(feature) = detector.required_feature() {
                if !view.feature_available(feature) {
                    report.skipped.push(SkippedDetector {
                        name: detector.name(),
                        reason: format!("{} unavailable", feature),
                    });
                    continue;
                }
            }
            if detector.needs_history() && !view.has_history() {
                report.skipped.push(SkippedDetector {
                    name: detector.name(),
                    reason: "no previous snapshot".to_string(),
                });
                continue;
            }

            let findings = detector.detect(view);
            tracing::debug!(
                instance = %view.instance_id,
                detector = detector.name(),
                findings = findings.len(),
                "Detector finished"
            );
            report.findings.extend(findings);
        }

        report.findings.sort_by(|a, b| {
            (a.scenario_kind, &a.subject).cmp(&(b.scenario_kind, &b.subject))
        });
        report
    }
}
