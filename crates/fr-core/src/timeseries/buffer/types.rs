use chrono::{DateTime, TimeDelta, Utc};
use fr_config::ExecutionConfig;

/// Result of [`TimeSeriesBuffer::append`](super::TimeSeriesBuffer::append).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Timestamp at or before the newest stored value.
    DroppedLate { last: DateTime<Utc> },
    /// Non-finite number.
    DroppedMalformed,
}

impl AppendOutcome {
    pub fn is_appended(&self) -> bool {
        matches!(self, AppendOutcome::Appended)
    }
}

/// Retention bounds for one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferLimits {
    /// `None` keeps values regardless of age.
    pub max_age: Option<TimeDelta>,
    pub max_count: usize,
}

impl BufferLimits {
    pub fn from_config(cfg: &ExecutionConfig) -> Self {
        Self {
            max_age: to_delta(cfg.max_days_to_keep.as_duration()),
            max_count: cfg.max_points_to_keep.max(1),
        }
    }
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

/// Zero disables an age bound.
pub(crate) fn to_delta(d: std::time::Duration) -> Option<TimeDelta> {
    if d.is_zero() {
        None
    } else {
        TimeDelta::from_std(d).ok()
    }
}
