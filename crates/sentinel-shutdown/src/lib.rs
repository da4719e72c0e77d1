pub mod coordinator;
pub mod resource;
pub mod signal;
pub mod tracker;

pub use coordinator::{ShutdownCoordinator, ShutdownCoordinatorBuilder, ShutdownReport};
pub use resource::{Resource, ResourceError, ResourceManager};
pub use signal::{ShutdownListener, ShutdownSignal, SignalHandler};
pub use tracker::{CycleGuard, InFlightTracker};
