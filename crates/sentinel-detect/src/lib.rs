pub mod baseline;
pub mod classifier;
pub mod detector;
pub mod growth;
pub mod missing_index;
pub mod regression;
pub mod slow_query;

pub use baseline::{BaselineEntry, BaselineTable};
pub use classifier::{grade, SeverityClassifier};
pub use detector::{DetectionReport, Detector, DetectorRegistry, SkippedDetector};
pub use growth::GrowthDetector;
pub use missing_index::MissingIndexDetector;
pub use regression::RegressionDetector;
pub use slow_query::SlowQueryDetector;

#[cfg(test)]
pub(crate) mod test_support;
