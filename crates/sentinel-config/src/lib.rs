pub mod app;
pub mod channel;
pub mod loader;
pub mod scenario;
pub mod suppression;

pub use app::{redact_dsn, AppConfig, InstanceConfig, LogFormat, LoggingConfig, ServerConfig, ShutdownConfig};
pub use channel::{ChannelConfig, ChannelKind, DispatchConfig, OverflowPolicy, RoutingConfig};
pub use loader::ConfigLoader;
pub use scenario::{
    GrowthConfig, MissingIndexConfig, RegressionConfig, ScenariosConfig, SeverityThresholds,
    SlowQueryConfig,
};
pub use suppression::SuppressionConfig;
