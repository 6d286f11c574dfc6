use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

/// Insight / command queue settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Bounded queue capacity between the processor and the insight writer.
    pub insight_capacity: usize,
    /// Bounded queue capacity between the processor and the command writer.
    pub command_capacity: usize,
    /// Records per repository write.
    pub batch_size: usize,
    /// Partially filled batches are written at least this often.
    pub flush_interval: HumanDuration,
    /// Optional JSON Lines output for insights. Relative to the config dir.
    pub insights_file: Option<PathBuf>,
    /// Optional JSON Lines output for commands. Relative to the config dir.
    pub commands_file: Option<PathBuf>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            insight_capacity: 256,
            command_capacity: 256,
            batch_size: 64,
            flush_interval: HumanDuration::from(Duration::from_secs(5)),
            insights_file: None,
            commands_file: None,
        }
    }
}
