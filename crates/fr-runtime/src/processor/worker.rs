use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use fr_core::actor::{ActorSettings, ActorState, Transition};
use fr_core::insight::{Command, Insight};
use fr_core::model::{Rule, RuleInstance, TelemetryPoint};
use fr_core::ports::{EngineEvent, EventEmitter};
use fr_core::timeseries::AppendOutcome;

use crate::sink_task::SinkQueue;

/// Per-pass counters, summed over workers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub points: u64,
    pub appended: u64,
    pub dropped_late: u64,
    pub malformed: u64,
    pub transitions: u64,
    pub faults_entered: u64,
    pub insights: u64,
    pub commands: u64,
}

impl WorkerStats {
    pub fn absorb(&mut self, other: &WorkerStats) {
        self.points += other.points;
        self.appended += other.appended;
        self.dropped_late += other.dropped_late;
        self.malformed += other.malformed;
        self.transitions += other.transitions;
        self.faults_entered += other.faults_entered;
        self.insights += other.insights;
        self.commands += other.commands;
    }
}

/// Everything a worker shares with the rest of the pass.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub rules: Arc<HashMap<String, Arc<Rule>>>,
    pub settings: ActorSettings,
    pub insights: SinkQueue<Insight>,
    pub commands: SinkQueue<Command>,
    pub events: Arc<dyn EventEmitter>,
    pub permits: Arc<Semaphore>,
    pub cancel: CancellationToken,
}

pub(crate) struct WorkerOutcome {
    pub actors: BTreeMap<String, ActorState>,
    pub stats: WorkerStats,
    pub cancelled: bool,
}

#[derive(Default)]
struct Outputs {
    insights: Vec<Insight>,
    commands: Vec<Command>,
}

/// Sole writer of its actors for the duration of a pass.
pub(crate) struct Worker {
    id: usize,
    ctx: WorkerContext,
    instances: HashMap<String, Arc<RuleInstance>>,
    actors: BTreeMap<String, ActorState>,
    /// point id → ids of the actors it feeds
    by_point: HashMap<String, Vec<String>>,
    stats: WorkerStats,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        ctx: WorkerContext,
        instances: Vec<Arc<RuleInstance>>,
        actors: BTreeMap<String, ActorState>,
    ) -> Self {
        let mut by_point: HashMap<String, Vec<String>> = HashMap::new();
        for inst in &instances {
            for point in inst.point_ids() {
                by_point
                    .entry(point.to_string())
                    .or_default()
                    .push(inst.id.clone());
            }
        }
        Self {
            id,
            ctx,
            instances: instances.into_iter().map(|i| (i.id.clone(), i)).collect(),
            actors,
            by_point,
            stats: WorkerStats::default(),
        }
    }

    /// Consume point chunks until the channel closes or the pass is
    /// cancelled. The last pending instant is settled only when the input
    /// ran to completion, so a cancelled pass resumes cleanly.
    #[tracing::instrument(name = "worker", skip_all, fields(worker = self.id))]
    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<Vec<TelemetryPoint>>) -> WorkerOutcome {
        let mut cancelled = false;
        while let Some(chunk) = rx.recv().await {
            let permit = Arc::clone(&self.ctx.permits).acquire_owned().await.ok();
            let mut out = Outputs::default();
            for point in &chunk {
                if self.ctx.cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                self.apply(point, &mut out);
            }
            drop(permit);
            self.publish(out).await;
            if cancelled {
                break;
            }
        }

        if !cancelled {
            let mut out = Outputs::default();
            self.finish(&mut out);
            self.publish(out).await;
        }
        WorkerOutcome {
            actors: self.actors,
            stats: self.stats,
            cancelled,
        }
    }

    fn apply(&mut self, point: &TelemetryPoint, out: &mut Outputs) {
        let Some(actor_ids) = self.by_point.get(&point.point_id) else {
            return;
        };
        self.stats.points += 1;
        for actor_id in actor_ids {
            let (Some(actor), Some(inst)) =
                (self.actors.get_mut(actor_id), self.instances.get(actor_id))
            else {
                continue;
            };
            let Some(rule) = self.ctx.rules.get(&inst.rule_id) else {
                continue;
            };
            let Some(step) = actor.apply_point(rule, inst, point, &self.ctx.settings) else {
                continue;
            };
            match step.appended {
                AppendOutcome::Appended => self.stats.appended += 1,
                AppendOutcome::DroppedLate { last } => {
                    self.stats.dropped_late += 1;
                    fr_debug!(pipe,
                        actor = %actor.id,
                        point = %point.point_id,
                        ts = %point.timestamp,
                        last = %last,
                        "out-of-order point dropped"
                    );
                }
                AppendOutcome::DroppedMalformed => {
                    self.stats.malformed += 1;
                    fr_warn!(pipe,
                        actor = %actor.id,
                        point = %point.point_id,
                        value = %point.value,
                        "malformed value dropped"
                    );
                }
            }
            if let Some(t) = step.transition {
                record_transition(rule, actor, &t, out, &mut self.stats, self.ctx.events.as_ref());
            }
        }
    }

    fn finish(&mut self, out: &mut Outputs) {
        for (id, actor) in self.actors.iter_mut() {
            let Some(inst) = self.instances.get(id) else {
                continue;
            };
            let Some(rule) = self.ctx.rules.get(&inst.rule_id) else {
                continue;
            };
            if let Some(t) = actor.finish_pass(rule, inst, &self.ctx.settings) {
                record_transition(rule, actor, &t, out, &mut self.stats, self.ctx.events.as_ref());
            }
        }
    }

    async fn publish(&mut self, out: Outputs) {
        if let Err(e) = self.ctx.insights.send_all(out.insights).await {
            fr_warn!(pipe, worker = self.id, error = %e, "insights not queued");
        }
        if let Err(e) = self.ctx.commands.send_all(out.commands).await {
            fr_warn!(pipe, worker = self.id, error = %e, "commands not queued");
        }
    }
}

fn record_transition(
    rule: &Rule,
    actor: &ActorState,
    t: &Transition,
    out: &mut Outputs,
    stats: &mut WorkerStats,
    events: &dyn EventEmitter,
) {
    stats.transitions += 1;
    if t.opened.status.is_active_fault() {
        stats.faults_entered += 1;
    }
    events.emit(EngineEvent::StateChanged {
        rule_instance_id: actor.id.clone(),
        at: t.at,
        is_valid: t.opened.status.is_valid,
        is_faulted: t.opened.status.is_faulted,
    });
    out.insights.push(Insight::from_transition(actor, t));
    stats.insights += 1;
    if let Some(cmd) = Command::from_transition(rule, actor, t) {
        out.commands.push(cmd);
        stats.commands += 1;
    }
}
