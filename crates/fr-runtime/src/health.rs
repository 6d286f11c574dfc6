use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum HealthState {
    Starting,
    Healthy,
    NoRuleInstances,
    /// A dependency exhausted its retries; cleared by the next success.
    Degraded(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub rules: usize,
    pub rule_instances: usize,
    pub actors: usize,
    pub points: usize,
    pub watermark: Option<DateTime<Utc>>,
}

/// Tracks degradation per dependency so that one recovering does not mask
/// another still failing.
#[derive(Debug)]
pub(crate) struct HealthTracker {
    inner: RwLock<TrackerState>,
}

#[derive(Debug)]
struct TrackerState {
    started: bool,
    degraded: Vec<(&'static str, String)>,
}

impl HealthTracker {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(TrackerState {
                started: false,
                degraded: Vec::new(),
            }),
        }
    }

    pub(crate) fn mark_started(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .started = true;
    }

    pub(crate) fn degrade(&self, dependency: &'static str, reason: impl Into<String>) {
        let reason = reason.into();
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match state.degraded.iter_mut().find(|(d, _)| *d == dependency) {
            Some(entry) => entry.1 = reason,
            None => state.degraded.push((dependency, reason)),
        }
    }

    pub(crate) fn recover(&self, dependency: &'static str) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .degraded
            .retain(|(d, _)| *d != dependency);
    }

    pub(crate) fn state(&self, rule_instances: usize) -> HealthState {
        let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if let Some((dependency, reason)) = state.degraded.first() {
            return HealthState::Degraded(format!("{dependency}: {reason}"));
        }
        if !state.started {
            HealthState::Starting
        } else if rule_instances == 0 {
            HealthState::NoRuleInstances
        } else {
            HealthState::Healthy
        }
    }
}
