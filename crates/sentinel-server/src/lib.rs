//! Sentinel 服务进程
//!
//! 把采集、检测、抑制与发送串成按实例调度的流水线，并提供状态接口。

pub mod api;
pub mod app;
pub mod metrics;
pub mod pipeline;
pub mod resources;
pub mod scheduler;

pub use api::{create_router, ApiError, ApiState};
pub use app::App;
pub use pipeline::{InstancePipeline, PipelineContext};
pub use resources::{CheckpointResource, DispatcherResource, PowaPoolResource};
