pub mod collector;
pub mod delta;
pub mod error;
pub mod source;
pub mod status;
pub mod store;

pub use collector::{Collected, Collector};
pub use delta::{compute_delta, compute_deltas, DeltaState, DeltaTable, QueryDelta};
pub use error::{Result, SentinelError};
pub use source::{Degradation, SnapshotSource, SourceError, SourceSnapshot};
pub use status::{CycleSummary, InstanceStatus, StatusRegistry};
pub use store::{CycleView, PriorDelta, SnapshotStore, StagedRotation};
