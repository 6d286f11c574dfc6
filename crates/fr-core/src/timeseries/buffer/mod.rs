mod types;

#[cfg(test)]
mod tests;

pub use types::{AppendOutcome, BufferLimits};
pub(crate) use types::to_delta;

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::TimedValue;

/// Strictly time-ordered, bounded value history for one point.
///
/// Values are appended at the back and evicted from the front. An append
/// never reorders: anything at or before the newest timestamp is dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesBuffer {
    values: VecDeque<TimedValue>,
}

impl TimeSeriesBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, tv: TimedValue) -> AppendOutcome {
        if !tv.value.is_well_formed() {
            return AppendOutcome::DroppedMalformed;
        }
        if let Some(last) = self.values.back() {
            if tv.timestamp <= last.timestamp {
                return AppendOutcome::DroppedLate {
                    last: last.timestamp,
                };
            }
        }
        self.values.push_back(tv);
        AppendOutcome::Appended
    }

    /// Evict values older than `now - max_age`, then the oldest values over
    /// `max_count`. Returns the number evicted.
    pub fn apply_limits(&mut self, now: DateTime<Utc>, limits: &BufferLimits) -> usize {
        let before = self.values.len();
        if let Some(max_age) = limits.max_age {
            let cutoff = now - max_age;
            while self.values.front().is_some_and(|v| v.timestamp < cutoff) {
                self.values.pop_front();
            }
        }
        while self.values.len() > limits.max_count {
            self.values.pop_front();
        }
        before - self.values.len()
    }

    /// Drop every value after `t`. Returns the number removed.
    pub fn remove_after(&mut self, t: DateTime<Utc>) -> usize {
        let before = self.values.len();
        while self.values.back().is_some_and(|v| v.timestamp > t) {
            self.values.pop_back();
        }
        before - self.values.len()
    }

    /// Newest value at or before `t`.
    pub fn value_at(&self, t: DateTime<Utc>) -> Option<&TimedValue> {
        let idx = self.values.partition_point(|v| v.timestamp <= t);
        idx.checked_sub(1).and_then(|i| self.values.get(i))
    }

    /// Number of values in `(after, until]`; `after == None` is unbounded.
    pub fn count_between(&self, after: Option<DateTime<Utc>>, until: DateTime<Utc>) -> usize {
        let hi = self.values.partition_point(|v| v.timestamp <= until);
        let lo = after.map_or(0, |a| self.values.partition_point(|v| v.timestamp <= a));
        hi.saturating_sub(lo)
    }

    pub fn latest(&self) -> Option<&TimedValue> {
        self.values.back()
    }

    pub fn oldest(&self) -> Option<&TimedValue> {
        self.values.front()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimedValue> {
        self.values.iter()
    }

    /// True when every adjacent pair is strictly increasing.
    pub fn is_strictly_ordered(&self) -> bool {
        self.values
            .iter()
            .zip(self.values.iter().skip(1))
            .all(|(a, b)| a.timestamp < b.timestamp)
    }
}
