//! Execution Processor: advances the actors of a pass point by point.
//!
//! A pass leases its actors, splits them into partitions that share no
//! point id, and hands each partition to one worker task. The feed (a
//! historical pull or a live stream) is routed point by point, so every
//! actor has exactly one writer and sees its points in timestamp order.

mod feed;
mod partition;
mod worker;


use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};
use orion_error::prelude::*;
use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fr_config::EngineConfig;
use fr_core::actor::{ActorSettings, ActorState};
use fr_core::error::CoreError;
use fr_core::insight::{Command, Insight};
use fr_core::model::{Rule, RuleInstance, TelemetryPoint};
use fr_core::ports::{
    ActorRepository, EngineEvent, EventEmitter, PassMode, TelemetrySource, TimeSeriesRepository,
};
use fr_core::retry::{RetryPolicy, retry};
use fr_core::timeseries::TimeSeriesStore;

use crate::actor_store::{ActorLease, ActorStore};
use crate::error::RuntimeResult;
use crate::health::HealthTracker;
use crate::metrics::RuntimeMetrics;
use crate::sink_task::SinkQueue;

use feed::{BatchFeed, Feed, StreamFeed};
use worker::{Worker, WorkerContext, WorkerOutcome};

pub use worker::WorkerStats;

pub(crate) const SOURCE_DEPENDENCY: &str = "telemetry source";
pub(crate) const STATE_DEPENDENCY: &str = "state store";

/// How a pass treats its actors before advancing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reset {
    /// Forget everything at or after the instant, then replay.
    From(DateTime<Utc>),
    /// Start over from fresh actors.
    All,
}

pub(crate) enum PassInput {
    Range {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Stream(mpsc::Receiver<TelemetryPoint>),
}

pub(crate) struct PassPlan {
    pub request_id: String,
    pub mode: PassMode,
    pub instances: Vec<Arc<RuleInstance>>,
    pub rules: Arc<HashMap<String, Arc<Rule>>>,
    pub reset: Option<Reset>,
    pub input: PassInput,
}

/// Outcome of one execution pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub request_id: String,
    pub mode: PassMode,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub actors: usize,
    pub stats: WorkerStats,
    /// The pass stopped early; unfinished instants resume next time.
    pub cancelled: bool,
    /// Identifiers skipped after the source kept failing for them.
    pub failed_ids: Vec<String>,
    pub elapsed_ms: u64,
}

impl PassReport {
    fn empty(request_id: String, mode: PassMode) -> Self {
        Self {
            request_id,
            mode,
            start: None,
            end: None,
            actors: 0,
            stats: WorkerStats::default(),
            cancelled: false,
            failed_ids: Vec::new(),
            elapsed_ms: 0,
        }
    }
}

/// Collaborators the processor drives.
pub(crate) struct ProcessorDeps {
    pub actors: Arc<ActorStore>,
    pub series: Arc<TimeSeriesStore>,
    pub source: Arc<dyn TelemetrySource>,
    pub actor_repo: Arc<dyn ActorRepository>,
    pub series_repo: Arc<dyn TimeSeriesRepository>,
    pub events: Arc<dyn EventEmitter>,
    pub insights: SinkQueue<Insight>,
    pub commands: SinkQueue<Command>,
    pub metrics: Option<Arc<RuntimeMetrics>>,
    pub health: Arc<HealthTracker>,
}

pub(crate) struct ExecutionProcessor {
    deps: ProcessorDeps,
    settings: ActorSettings,
    parallelism: usize,
    point_capacity: usize,
    query_window: TimeDelta,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
}

impl ExecutionProcessor {
    pub(crate) fn new(deps: ProcessorDeps, config: &EngineConfig) -> Self {
        let window = config.runtime.query_window.as_duration();
        Self {
            deps,
            settings: ActorSettings::from_config(&config.execution),
            parallelism: config.runtime.parallelism.max(1),
            point_capacity: config.runtime.point_channel_capacity.max(1),
            query_window: TimeDelta::from_std(window).unwrap_or(TimeDelta::days(1)),
            retry: RetryPolicy::from_config(&config.retry),
            permits: Arc::new(Semaphore::new(
                config.runtime.max_concurrent_operations.max(1),
            )),
        }
    }

    pub(crate) fn actors(&self) -> &Arc<ActorStore> {
        &self.deps.actors
    }

    pub(crate) fn series(&self) -> &Arc<TimeSeriesStore> {
        &self.deps.series
    }

    pub(crate) fn insights(&self) -> &SinkQueue<Insight> {
        &self.deps.insights
    }

    pub(crate) fn commands(&self) -> &SinkQueue<Command> {
        &self.deps.commands
    }

    /// Run one pass to completion or cancellation.
    ///
    /// The lease is held until outputs are flushed and state is persisted,
    /// so a later pass over the same actors never persists under this one.
    #[tracing::instrument(
        name = "pass",
        skip_all,
        fields(request = %plan.request_id, mode = ?plan.mode, instances = plan.instances.len())
    )]
    pub(crate) async fn run_pass(&self, plan: PassPlan, cancel: CancellationToken) -> PassReport {
        let started = Instant::now();
        let PassPlan {
            request_id,
            mode,
            instances,
            rules,
            reset,
            input,
        } = plan;

        if instances.is_empty() {
            fr_debug!(pipe, request = %request_id, "no rule instances in scope, pass skipped");
            return PassReport::empty(request_id, mode);
        }

        let Some(mut lease) = self.deps.actors.lease_or_cancel(&instances, &cancel).await else {
            fr_info!(pipe, request = %request_id, "pass cancelled while waiting for its actors");
            let mut report = PassReport::empty(request_id, mode);
            report.cancelled = true;
            return report;
        };
        if let Some(reset) = reset {
            self.apply_reset(&mut lease, &instances, &rules, reset).await;
        }

        let partition = partition::plan(&instances, self.parallelism);
        let mut point_ids: Vec<String> = partition.routes.keys().cloned().collect();
        point_ids.sort();

        let ctx = WorkerContext {
            rules,
            settings: self.settings.clone(),
            insights: self.deps.insights.clone(),
            commands: self.deps.commands.clone(),
            events: Arc::clone(&self.deps.events),
            permits: Arc::clone(&self.permits),
            cancel: cancel.clone(),
        };

        let mut pool = lease.take_all();
        let mut senders = Vec::with_capacity(partition.workers.len());
        let mut handles: Vec<(Vec<String>, JoinHandle<WorkerOutcome>)> = Vec::new();
        for (id, group) in partition.workers.iter().enumerate() {
            let actors = group
                .iter()
                .filter_map(|i| pool.remove(&i.id).map(|a| (i.id.clone(), a)))
                .collect();
            let (tx, rx) = mpsc::channel(self.point_capacity);
            let worker = Worker::new(id, ctx.clone(), group.clone(), actors);
            let ids = group.iter().map(|i| i.id.clone()).collect();
            handles.push((ids, tokio::spawn(worker.run(rx))));
            senders.push(tx);
        }
        lease.put_back(pool.into_values());
        drop(ctx);

        let (start, end, mut feed) = match input {
            PassInput::Range { start, end } => (
                Some(start),
                Some(end),
                Feed::Batch(BatchFeed::new(
                    Arc::clone(&self.deps.source),
                    point_ids.clone(),
                    start,
                    end,
                    self.query_window,
                    self.retry.clone(),
                )),
            ),
            PassInput::Stream(rx) => (None, None, Feed::Stream(StreamFeed::new(rx, cancel.clone()))),
        };

        self.route(&mut feed, &partition, &senders, &cancel).await;
        drop(senders);

        let mut stats = WorkerStats::default();
        let mut cancelled = cancel.is_cancelled();
        for (ids, handle) in handles {
            match handle.await {
                Ok(outcome) => {
                    stats.absorb(&outcome.stats);
                    cancelled |= outcome.cancelled;
                    lease.put_back(outcome.actors.into_values());
                }
                Err(e) => {
                    fr_error!(pipe,
                        request = %request_id,
                        actors = ids.len(),
                        error = %e,
                        "worker failed, reloading its actors from the repository"
                    );
                    self.reload_actors(&mut lease, &ids).await;
                }
            }
        }

        let failed_ids = match &feed {
            Feed::Batch(batch) => {
                self.note_source_health(batch);
                batch.failed.iter().cloned().collect()
            }
            Feed::Stream(_) => Vec::new(),
        };

        self.flush_sinks().await;
        let actors: Vec<ActorState> = lease.actors().cloned().collect();
        if let Err(e) = self.persist(&actors, Some(&point_ids)).await {
            fr_warn!(pipe, request = %request_id, error = %e, "pass state not persisted");
        }
        lease.release();

        let elapsed = started.elapsed();
        if let Some(m) = &self.deps.metrics {
            m.add_points(stats.points, stats.dropped_late, stats.malformed);
            m.add_transitions(stats.transitions, stats.faults_entered);
            m.observe_pass(mode, elapsed);
            for _ in &failed_ids {
                m.inc_source_query_failed();
            }
        }
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.deps.events.emit(EngineEvent::PassCompleted {
            request_id: request_id.clone(),
            mode,
            actors: actors.len(),
            points: stats.points,
            transitions: stats.transitions,
            elapsed_ms,
        });
        if cancelled {
            fr_info!(pipe, request = %request_id, points = stats.points, "pass cancelled");
        }

        PassReport {
            request_id,
            mode,
            start,
            end,
            actors: actors.len(),
            stats,
            cancelled,
            failed_ids,
            elapsed_ms,
        }
    }

    /// Append every routed point to the shared store and hand it to the
    /// worker owning its partition.
    async fn route(
        &self,
        feed: &mut Feed,
        partition: &partition::PartitionPlan,
        senders: &[mpsc::Sender<Vec<TelemetryPoint>>],
        cancel: &CancellationToken,
    ) {
        let mut unrouted = 0u64;
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                chunk = feed.next_chunk() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let mut per_worker: Vec<Vec<TelemetryPoint>> = vec![Vec::new(); senders.len()];
            for point in chunk {
                let Some(w) = partition.route(&point.point_id) else {
                    unrouted += 1;
                    continue;
                };
                self.deps.series.append(&point);
                per_worker[w].push(point);
            }
            for (w, points) in per_worker.into_iter().enumerate() {
                if points.is_empty() {
                    continue;
                }
                if senders[w].send(points).await.is_err() {
                    fr_warn!(pipe, worker = w, "worker stopped early, chunk dropped");
                }
            }
        }
        if unrouted > 0 {
            fr_debug!(pipe, unrouted, "points without a bound actor ignored");
        }
    }

    /// Rewind the leased actors and queue the corrections that take back
    /// what they reported after the rewind point.
    async fn apply_reset(
        &self,
        lease: &mut ActorLease,
        instances: &[Arc<RuleInstance>],
        rules: &HashMap<String, Arc<Rule>>,
        reset: Reset,
    ) {
        let mut insights = Vec::new();
        let mut commands = Vec::new();
        for inst in instances {
            let Some(actor) = lease.get_mut(&inst.id) else {
                if reset == Reset::All {
                    lease.reset(inst);
                }
                continue;
            };
            let before = actor.timeline.segments().to_vec();
            let cut = match reset {
                Reset::From(start) => start - TimeDelta::nanoseconds(1),
                Reset::All => match before.first() {
                    Some(first) => first.start - TimeDelta::nanoseconds(1),
                    None => {
                        lease.reset(inst);
                        continue;
                    }
                },
            };
            match reset {
                Reset::From(_) => {
                    actor.remove_after(cut);
                    for point in inst.point_ids() {
                        self.deps.series.remove_after(point, cut);
                    }
                }
                Reset::All => lease.reset(inst),
            }
            let Some(actor) = lease.get_mut(&inst.id) else {
                continue;
            };
            insights.extend(Insight::rewound(actor, &before, cut));
            if let Some(rule) = rules.get(&inst.rule_id) {
                commands.extend(Command::rewound(rule, actor, &before, cut));
            }
        }
        fr_info!(pipe,
            actors = instances.len(),
            insights = insights.len(),
            commands = commands.len(),
            reset = ?reset,
            "actors reset"
        );
        if let Err(e) = self.deps.insights.send_all(insights).await {
            fr_warn!(pipe, error = %e, "reset corrections for insights not queued");
        }
        if let Err(e) = self.deps.commands.send_all(commands).await {
            fr_warn!(pipe, error = %e, "reset corrections for commands not queued");
        }
    }

    async fn reload_actors(&self, lease: &mut ActorLease, ids: &[String]) {
        for id in ids {
            match self.deps.actor_repo.get_actor(id).await {
                Ok(Some(actor)) => lease.put_back([actor]),
                Ok(None) => {}
                Err(e) => fr_warn!(conn, actor = %id, error = %e, "actor reload failed"),
            }
        }
    }

    fn note_source_health(&self, batch: &BatchFeed) {
        if batch.failed.is_empty() {
            self.deps.health.recover(SOURCE_DEPENDENCY);
            return;
        }
        let reason = batch
            .last_error
            .clone()
            .unwrap_or_else(|| "query failed".to_string());
        fr_warn!(conn, skipped = batch.failed.len(), error = %reason, "identifiers skipped this pass");
        self.deps
            .health
            .degrade(SOURCE_DEPENDENCY, format!("{} identifier(s) skipped: {reason}", batch.failed.len()));
    }

    pub(crate) async fn flush_sinks(&self) {
        if let Err(e) = self.deps.insights.flush().await {
            fr_warn!(pipe, error = %e, "insight flush failed");
        }
        if let Err(e) = self.deps.commands.flush().await {
            fr_warn!(pipe, error = %e, "command flush failed");
        }
    }

    /// Upsert `actors` and the buffers of `point_ids` (all when `None`).
    /// Returns the number of records written.
    pub(crate) async fn persist(
        &self,
        actors: &[ActorState],
        point_ids: Option<&[String]>,
    ) -> RuntimeResult<usize> {
        let buffers = self.deps.series.snapshot(point_ids);
        let outcome: Result<(), CoreError> = async {
            if !actors.is_empty() {
                retry(&self.retry, "actor upsert", || {
                    self.deps.actor_repo.upsert_actors(actors)
                })
                .await?;
            }
            if !buffers.is_empty() {
                retry(&self.retry, "buffer upsert", || {
                    self.deps.series_repo.upsert_buffers(&buffers)
                })
                .await?;
            }
            Ok(())
        }
        .await;

        match &outcome {
            Ok(()) => self.deps.health.recover(STATE_DEPENDENCY),
            Err(e) => self.deps.health.degrade(STATE_DEPENDENCY, e.to_string()),
        }
        outcome.err_conv()?;
        fr_debug!(res, actors = actors.len(), buffers = buffers.len(), "state persisted");
        Ok(actors.len() + buffers.len())
    }
}
