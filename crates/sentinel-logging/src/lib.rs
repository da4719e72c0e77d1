pub mod limiter;
pub mod subscriber;

pub use limiter::CauseLimiter;
pub use subscriber::{init_logging, LoggingError};
