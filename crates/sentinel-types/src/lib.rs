pub mod alert;
pub mod finding;
pub mod snapshot;

pub use alert::{Alert, Fingerprint, Severity};
pub use finding::{Evidence, Finding, GrowthMetric, ScenarioKind, Subject};
pub use snapshot::{IndexCandidate, OptionalFeature, QueryKey, QueryStat, Snapshot};
