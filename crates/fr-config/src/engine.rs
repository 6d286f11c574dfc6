use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::execution::ExecutionConfig;
use crate::logging::LoggingConfig;
use crate::metrics::MetricsConfig;
use crate::runtime::{MaintenanceConfig, RetryConfig, RuntimeConfig};
use crate::sink::SinkConfig;
use crate::sources::{CacheConfig, SourcesConfig};
use crate::validate;

// ---------------------------------------------------------------------------
// EngineConfig (resolved, validated)
// ---------------------------------------------------------------------------

/// Top-level `fault-reactor.toml`. Every section may be omitted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub runtime: RuntimeConfig,
    pub execution: ExecutionConfig,
    pub sink: SinkConfig,
    pub retry: RetryConfig,
    pub maintenance: MaintenanceConfig,
    pub cache: CacheConfig,
    pub sources: SourcesConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Read and parse a `fault-reactor.toml` file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.as_ref().display()))?;
        content.parse()
    }
}

impl FromStr for EngineConfig {
    type Err = anyhow::Error;

    /// Parse a TOML string into a validated [`EngineConfig`].
    fn from_str(toml_str: &str) -> anyhow::Result<Self> {
        let config: EngineConfig = toml::from_str(toml_str)?;
        validate::validate(&config)?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
