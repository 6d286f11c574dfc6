use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fr_config::ExecutionConfig;
use serde::{Deserialize, Serialize};

use crate::model::{Rule, RuleInstance, TelemetryPoint};
use crate::rule::{EvalLimits, PointInput, evaluate};
use crate::timeseries::buffer::to_delta;
use crate::timeseries::{AppendOutcome, BufferLimits, TimeSeriesBuffer};

use super::timeline::{OutputTimeline, TimelineLimits, Transition};

/// Limits an actor applies while advancing.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorSettings {
    pub eval: EvalLimits,
    pub buffer: BufferLimits,
    pub timeline: TimelineLimits,
}

impl ActorSettings {
    pub fn from_config(cfg: &ExecutionConfig) -> Self {
        Self {
            eval: EvalLimits {
                min_points: cfg.min_points.max(1),
                stale_after: to_delta(cfg.stale_after.as_duration()),
            },
            buffer: BufferLimits::from_config(cfg),
            timeline: TimelineLimits::from_config(cfg),
        }
    }
}

impl Default for ActorSettings {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

/// Result of feeding one point to an actor.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub appended: AppendOutcome,
    /// Set when settling the previous instant changed the output.
    pub transition: Option<Transition>,
}

/// Execution state of one rule instance.
///
/// Evaluation is settled per instant: a point at `t` first evaluates the
/// pending instant `p < t`, then is appended and marks `t` pending. Points
/// sharing a timestamp are therefore seen by one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorState {
    pub id: String,
    pub rule_id: String,
    pub equipment_id: String,
    pub earliest_seen: Option<DateTime<Utc>>,
    pub last_evaluated: Option<DateTime<Utc>>,
    pub pending: Option<DateTime<Utc>>,
    pub last_changed: Option<DateTime<Utc>>,
    /// point id → private working buffer
    pub buffers: BTreeMap<String, TimeSeriesBuffer>,
    pub timeline: OutputTimeline,
    /// Number of times the actor entered an active fault.
    pub trigger_count: u64,
}

impl ActorState {
    pub fn new(instance: &RuleInstance) -> Self {
        let mut actor = Self {
            id: instance.id.clone(),
            rule_id: instance.rule_id.clone(),
            equipment_id: instance.equipment_id.clone(),
            earliest_seen: None,
            last_evaluated: None,
            pending: None,
            last_changed: None,
            buffers: BTreeMap::new(),
            timeline: OutputTimeline::new(),
            trigger_count: 0,
        };
        actor.sync_bindings(instance);
        actor
    }

    /// Align buffers with the instance's current bindings after a rebuild.
    pub fn sync_bindings(&mut self, instance: &RuleInstance) {
        let bound = instance.point_ids();
        self.buffers.retain(|id, _| bound.contains(id.as_str()));
        for id in bound {
            self.buffers.entry(id.to_string()).or_default();
        }
    }

    /// Feed one point. `None` when the point is not bound to this actor.
    pub fn apply_point(
        &mut self,
        rule: &Rule,
        instance: &RuleInstance,
        point: &TelemetryPoint,
        settings: &ActorSettings,
    ) -> Option<Step> {
        if !self.buffers.contains_key(&point.point_id) {
            return None;
        }

        let mut transition = None;
        if let Some(p) = self.pending {
            if point.timestamp > p {
                self.pending = None;
                transition = self.evaluate_at(p, rule, instance, settings);
            }
        }

        let buffer = self.buffers.get_mut(&point.point_id)?;
        let appended = buffer.append(point.timed_value());
        if appended.is_appended() {
            buffer.apply_limits(point.timestamp, &settings.buffer);
            self.earliest_seen = Some(
                self.earliest_seen
                    .map_or(point.timestamp, |e| e.min(point.timestamp)),
            );
            let after_last_eval = self.last_evaluated.is_none_or(|le| point.timestamp > le);
            let not_before_pending = self.pending.is_none_or(|p| point.timestamp >= p);
            if after_last_eval && not_before_pending {
                self.pending = Some(point.timestamp);
            }
        }

        Some(Step {
            appended,
            transition,
        })
    }

    /// Settle the last pending instant and apply limits at the actor's
    /// newest instant.
    pub fn finish_pass(
        &mut self,
        rule: &Rule,
        instance: &RuleInstance,
        settings: &ActorSettings,
    ) -> Option<Transition> {
        let transition = self
            .pending
            .take()
            .and_then(|p| self.evaluate_at(p, rule, instance, settings));
        if let Some(now) = self.latest_instant() {
            for buffer in self.buffers.values_mut() {
                buffer.apply_limits(now, &settings.buffer);
            }
            self.timeline.maybe_compact(now, &settings.timeline);
        }
        transition
    }

    fn evaluate_at(
        &mut self,
        at: DateTime<Utc>,
        rule: &Rule,
        instance: &RuleInstance,
        settings: &ActorSettings,
    ) -> Option<Transition> {
        // Values older than the retention window never count, whether or not
        // eviction has run yet.
        let window_start = settings.buffer.max_age.map(|age| at - age);
        let inputs: BTreeMap<&str, Vec<PointInput<'_>>> = instance
            .bindings
            .iter()
            .map(|(param, ids)| {
                let points = ids
                    .iter()
                    .map(|id| {
                        let buffer = self.buffers.get(id);
                        PointInput {
                            point_id: id.as_str(),
                            count: buffer.map_or(0, |b| b.count_between(window_start, at)),
                            latest: buffer
                                .and_then(|b| b.value_at(at))
                                .filter(|tv| window_start.is_none_or(|w| tv.timestamp > w)),
                        }
                    })
                    .collect();
                (param.as_str(), points)
            })
            .collect();
        let status = evaluate(rule, &inputs, at, &settings.eval);

        self.last_evaluated = Some(at);
        let transition = self.timeline.record(at, status);
        if let Some(t) = &transition {
            self.last_changed = Some(at);
            if t.opened.status.is_active_fault() {
                self.trigger_count += 1;
            }
        }
        self.timeline.maybe_compact(at, &settings.timeline);
        transition
    }

    /// Newest timestamp across the actor's buffers.
    pub fn latest_instant(&self) -> Option<DateTime<Utc>> {
        self.buffers
            .values()
            .filter_map(|b| b.latest().map(|v| v.timestamp))
            .max()
    }

    /// Forget everything after `t`: buffered values, timeline segments and
    /// any pending evaluation. The segment covering `t` is reopened.
    pub fn remove_after(&mut self, t: DateTime<Utc>) {
        for buffer in self.buffers.values_mut() {
            buffer.remove_after(t);
        }
        self.timeline.remove_after(t);
        if self.pending.is_some_and(|p| p > t) {
            self.pending = None;
        }
        if self.last_evaluated.is_some_and(|le| le > t) {
            self.last_evaluated = Some(t);
        }
        if self.last_changed.is_some_and(|c| c > t) {
            self.last_changed = self.timeline.current().map(|s| s.start);
        }
        if self.earliest_seen.is_some_and(|e| e > t) {
            self.earliest_seen = None;
        }
    }
}
