use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker partitions per execution pass.
    pub parallelism: usize,
    /// Upper bound on worker chunks advancing at the same time, across all
    /// passes (Semaphore upper limit).
    pub max_concurrent_operations: usize,
    /// Capacity of the real-time request channel.
    pub realtime_channel_capacity: usize,
    /// Capacity of the batch/backfill request channel.
    pub batch_channel_capacity: usize,
    /// Capacity of each per-worker point channel.
    pub point_channel_capacity: usize,
    /// Period of the live ticker. `0s` disables the ticker.
    pub realtime_interval: HumanDuration,
    /// How far back a live pass reaches when no watermark exists yet.
    pub lookback: HumanDuration,
    /// Chunk size for historical telemetry queries.
    pub query_window: HumanDuration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            parallelism: 1 + cpus * 2,
            max_concurrent_operations: 100,
            realtime_channel_capacity: 16,
            batch_channel_capacity: 64,
            point_channel_capacity: 1024,
            realtime_interval: HumanDuration::from(std::time::Duration::from_secs(60)),
            lookback: HumanDuration::from(std::time::Duration::from_secs(15 * 86400)),
            query_window: HumanDuration::from(std::time::Duration::from_secs(86400)),
        }
    }
}

/// Bounded exponential backoff for collaborator calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: HumanDuration,
    pub max_backoff: HumanDuration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: HumanDuration::from(std::time::Duration::from_millis(500)),
            max_backoff: HumanDuration::from(std::time::Duration::from_secs(30)),
        }
    }
}

/// Timer-driven background jobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Point status sweep + shared buffer eviction.
    pub status_interval: HumanDuration,
    /// Actor state and buffer persistence.
    pub persist_interval: HumanDuration,
    /// A point with no value for this long is reported offline.
    pub offline_after: HumanDuration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            status_interval: HumanDuration::from(std::time::Duration::from_secs(300)),
            persist_interval: HumanDuration::from(std::time::Duration::from_secs(600)),
            offline_after: HumanDuration::from(std::time::Duration::from_secs(3600)),
        }
    }
}
