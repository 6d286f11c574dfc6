pub mod engine;
pub mod execution;
pub mod logging;
pub mod metrics;
pub mod runtime;
pub mod sink;
pub mod sources;
pub mod types;
mod validate;

pub use engine::EngineConfig;
pub use execution::ExecutionConfig;
pub use logging::{LogFormat, LoggingConfig};
pub use metrics::MetricsConfig;
pub use runtime::{MaintenanceConfig, RetryConfig, RuntimeConfig};
pub use sink::SinkConfig;
pub use sources::{CacheConfig, SourcesConfig, resolve_glob, resolve_path};
pub use types::HumanDuration;
