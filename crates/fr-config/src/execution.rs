use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

/// Per-actor execution limits and thresholds.
///
/// `min_points` and the compaction trigger (`compaction_ratio ×
/// compaction_threshold`) were historically hard-coded; both are tunable here.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Points a bound buffer needs before the actor output counts as valid.
    pub min_points: usize,
    /// Base size for timeline compaction.
    pub compaction_threshold: usize,
    /// Compaction runs once the timeline holds more than
    /// `compaction_ratio × compaction_threshold` segments.
    pub compaction_ratio: usize,
    /// Maximum age of buffered values (`maxDaysToKeep`).
    pub max_days_to_keep: HumanDuration,
    /// Maximum number of buffered values per point.
    pub max_points_to_keep: usize,
    /// Closed timeline segments that ended longer ago than this are dropped.
    pub max_output_days_to_keep: HumanDuration,
    /// Maximum number of timeline segments kept per actor.
    pub max_output_values_to_keep: usize,
    /// A bound value older than this at evaluation time counts as missing.
    /// `0s` disables the check.
    pub stale_after: HumanDuration,
    /// Maximum number of edges walked from an equipment node while binding.
    pub max_binding_depth: usize,
}

impl ExecutionConfig {
    pub fn compaction_trigger(&self) -> usize {
        self.compaction_threshold
            .saturating_mul(self.compaction_ratio)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            min_points: 1,
            compaction_threshold: 8,
            compaction_ratio: 2,
            max_days_to_keep: HumanDuration::from(Duration::from_secs(7 * 86400)),
            max_points_to_keep: 10_000,
            max_output_days_to_keep: HumanDuration::from(Duration::from_secs(365 * 86400)),
            max_output_values_to_keep: 1_000,
            stale_after: HumanDuration::from(Duration::from_secs(30 * 60)),
            max_binding_depth: 3,
        }
    }
}
