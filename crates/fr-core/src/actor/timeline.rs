use chrono::{DateTime, TimeDelta, Utc};
use fr_config::ExecutionConfig;
use serde::{Deserialize, Serialize};

use crate::timeseries::buffer::to_delta;

/// The `(isValid, isFaulted, text)` triple an evaluation produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputStatus {
    pub is_valid: bool,
    pub is_faulted: bool,
    pub text: String,
}

impl OutputStatus {
    pub fn healthy() -> Self {
        Self {
            is_valid: true,
            is_faulted: false,
            text: String::new(),
        }
    }

    pub fn faulted(text: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            is_faulted: true,
            text: text.into(),
        }
    }

    pub fn invalid(text: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            is_faulted: false,
            text: text.into(),
        }
    }

    /// Valid and faulted.
    pub fn is_active_fault(&self) -> bool {
        self.is_valid && self.is_faulted
    }

    pub fn label(&self) -> &'static str {
        match (self.is_valid, self.is_faulted) {
            (false, _) => "invalid",
            (true, true) => "faulted",
            (true, false) => "healthy",
        }
    }
}

/// One run of identical output. `end == None` marks the open segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub status: OutputStatus,
}

/// A committed status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub at: DateTime<Utc>,
    /// The segment closed at `at`.
    pub closed: Segment,
    /// The segment opened at `at`.
    pub opened: Segment,
}

/// Bounds applied when the timeline is compacted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineLimits {
    /// Compaction runs once the timeline holds more segments than this.
    pub compaction_trigger: usize,
    pub max_age: Option<TimeDelta>,
    pub max_count: usize,
}

impl TimelineLimits {
    pub fn from_config(cfg: &ExecutionConfig) -> Self {
        Self {
            compaction_trigger: cfg.compaction_trigger().max(1),
            max_age: to_delta(cfg.max_output_days_to_keep.as_duration()),
            max_count: cfg.max_output_values_to_keep.max(1),
        }
    }
}

/// Run-length encoded output history.
///
/// Segments are ordered by start, never overlap, and only the last one may
/// be open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTimeline {
    segments: Vec<Segment>,
}

impl OutputTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the output computed at `at`.
    ///
    /// The first record opens the timeline without a transition. An
    /// unchanged status leaves the open segment as is. A change closes the
    /// open segment at `at` and opens a new one there. Records at or before
    /// the open segment's start are ignored.
    pub fn record(&mut self, at: DateTime<Utc>, status: OutputStatus) -> Option<Transition> {
        let Some(last) = self.segments.last_mut() else {
            self.segments.push(Segment {
                start: at,
                end: None,
                status,
            });
            return None;
        };
        if at <= last.start {
            log::warn!(
                "timeline record at {} not after open segment start {}; ignored",
                at.to_rfc3339(),
                last.start.to_rfc3339()
            );
            return None;
        }
        if last.status == status {
            return None;
        }
        last.end = Some(at);
        let closed = last.clone();
        let opened = Segment {
            start: at,
            end: None,
            status,
        };
        self.segments.push(opened.clone());
        Some(Transition { at, closed, opened })
    }

    /// Merge equal neighbours, then drop closed segments that ended before
    /// `now - max_age` and the oldest closed segments beyond `max_count`.
    /// The open segment is never dropped. Returns the number removed.
    pub fn compact(&mut self, now: DateTime<Utc>, limits: &TimelineLimits) -> usize {
        let before = self.segments.len();

        let mut merged: Vec<Segment> = Vec::with_capacity(self.segments.len());
        for seg in self.segments.drain(..) {
            match merged.last_mut() {
                Some(prev) if prev.status == seg.status => prev.end = seg.end,
                _ => merged.push(seg),
            }
        }
        self.segments = merged;

        if let Some(max_age) = limits.max_age {
            let cutoff = now - max_age;
            self.segments
                .retain(|s| s.end.is_none_or(|end| end >= cutoff));
        }
        if self.segments.len() > limits.max_count {
            let excess = self.segments.len() - limits.max_count;
            let closed = self.segments.iter().filter(|s| s.end.is_some()).count();
            self.segments.drain(..excess.min(closed));
        }

        before - self.segments.len()
    }

    /// Compact only once the trigger size is exceeded.
    pub fn maybe_compact(&mut self, now: DateTime<Utc>, limits: &TimelineLimits) -> usize {
        if self.segments.len() > limits.compaction_trigger {
            self.compact(now, limits)
        } else {
            0
        }
    }

    /// Drop everything that starts after `t` and reopen the segment
    /// covering `t`.
    pub fn remove_after(&mut self, t: DateTime<Utc>) {
        self.segments.retain(|s| s.start <= t);
        if let Some(last) = self.segments.last_mut() {
            last.end = None;
        }
    }

    /// True when some segment starts before its predecessor ends, starts
    /// out of order, or an open segment is not last.
    pub fn has_overlaps(&self) -> bool {
        self.segments.windows(2).any(|w| match w[0].end {
            None => true,
            Some(end) => w[0].start >= w[1].start || end > w[1].start,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn current(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
