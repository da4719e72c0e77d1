pub mod checkpoint;
pub mod engine;

pub use checkpoint::{CheckpointError, SuppressionCheckpoint};
pub use engine::{
    Admission, DeliveryOutcome, DeliveryRecord, SuppressionHandle, SuppressionPolicy,
    SuppressionRecord, SuppressionRegistry, SuppressionState,
};
