//! The engine's exposed operations.
//!
//! [`RulesService`] owns the instance registry, the actor arena and the
//! shared time-series store, and drives the Execution Processor. The host
//! wraps it in the orchestrator and the maintenance tasks; tests call it
//! directly.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use orion_error::prelude::*;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fr_config::EngineConfig;
use fr_core::binding::{InstanceRegistry, OntologyGraph, OntologySnapshot, RuleInstanceBuilder};
use fr_core::cache::{Cache, MemoryCache, get_json, set_json};
use fr_core::insight::{Command, Insight};
use fr_core::memory::{MemoryOntology, MemoryOutputs, MemoryStore};
use fr_core::model::{ExecutionRequest, RequestCommand, Rule, RuleInstance, TelemetryPoint};
use fr_core::ports::{
    ActorRepository, CommandRepository, EngineEvent, EventEmitter, InsightRepository,
    OntologyService, PassMode, RuleInstanceRepository, RuleRepository, TelemetrySource,
    TimeSeriesRepository,
};
use fr_core::retry::{RetryPolicy, retry};
use fr_core::timeseries::{
    BufferLimits, EvictReport, Evictor, PointHealth, PointStatus, TimeSeriesStore,
};

use crate::actor_store::ActorStore;
use crate::emitter::TracingEmitter;
use crate::error::{RuntimeReason, RuntimeResult};
use crate::health::{HealthReport, HealthTracker};
use crate::metrics::RuntimeMetrics;
use crate::orchestrator::ExecutionOutcome;
use crate::processor::{
    ExecutionProcessor, PassInput, PassPlan, PassReport, ProcessorDeps, Reset,
};
use crate::sink_task::SinkQueue;

const ONTOLOGY_KEY: &str = "ontology:graph";
const ONTOLOGY_DEPENDENCY: &str = "ontology";

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// External services the engine consumes.
#[derive(Clone)]
pub struct Collaborators {
    pub ontology: Arc<dyn OntologyService>,
    pub telemetry: Arc<dyn TelemetrySource>,
    pub rules: Arc<dyn RuleRepository>,
    pub instances: Arc<dyn RuleInstanceRepository>,
    pub actors: Arc<dyn ActorRepository>,
    pub buffers: Arc<dyn TimeSeriesRepository>,
    pub insights: Arc<dyn InsightRepository>,
    pub commands: Arc<dyn CommandRepository>,
    pub cache: Arc<dyn Cache>,
    pub events: Arc<dyn EventEmitter>,
}

impl Collaborators {
    /// Everything in process: one [`MemoryStore`] for state and one
    /// [`MemoryOutputs`] for insights and commands.
    pub fn in_memory(
        telemetry: Arc<dyn TelemetrySource>,
        ontology: OntologySnapshot,
        store: Arc<MemoryStore>,
        outputs: Arc<MemoryOutputs>,
    ) -> Self {
        Self {
            ontology: Arc::new(MemoryOntology::new(ontology)),
            telemetry,
            rules: store.clone(),
            instances: store.clone(),
            actors: store.clone(),
            buffers: store,
            insights: outputs.clone(),
            commands: outputs,
            cache: Arc::new(MemoryCache::new()),
            events: Arc::new(TracingEmitter),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    pub rules: usize,
    /// Instances now registered for the rebuilt rules.
    pub instances: usize,
    pub added: usize,
    pub changed: usize,
    /// Equipment/parameter pairs that could not be bound, plus rules that
    /// failed validation.
    pub failures: usize,
    pub removed_actors: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub rules: usize,
    pub instances: usize,
    pub actors: usize,
    pub buffers: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub online: usize,
    pub offline: usize,
    pub unknown: usize,
    pub values_evicted: usize,
    pub points_emptied: usize,
}

/// Instances a live stream feeds. Empty fields do not narrow the scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamScope {
    pub rule_id: Option<String>,
    pub equipment_ids: Vec<String>,
}

impl StreamScope {
    /// Every registered instance.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn rule(rule_id: impl Into<String>) -> Self {
        Self {
            rule_id: Some(rule_id.into()),
            ..Self::default()
        }
    }

    pub fn equipment<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rule_id: None,
            equipment_ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// RulesService
// ---------------------------------------------------------------------------

pub struct RulesService {
    collab: Collaborators,
    processor: ExecutionProcessor,
    registry: InstanceRegistry,
    rules: RwLock<HashMap<String, Arc<Rule>>>,
    evictor: Evictor,
    health: Arc<HealthTracker>,
    metrics: Option<Arc<RuntimeMetrics>>,
    retry: RetryPolicy,
    lookback: TimeDelta,
    offline_after: TimeDelta,
    ontology_ttl: Duration,
    max_binding_depth: usize,
}

impl RulesService {
    /// Build the service around already running sink queues.
    pub fn new(
        collab: Collaborators,
        config: &EngineConfig,
        insights: SinkQueue<Insight>,
        commands: SinkQueue<Command>,
        metrics: Option<Arc<RuntimeMetrics>>,
    ) -> Self {
        let health = Arc::new(HealthTracker::new());
        let deps = ProcessorDeps {
            actors: Arc::new(ActorStore::new()),
            series: Arc::new(TimeSeriesStore::new()),
            source: Arc::clone(&collab.telemetry),
            actor_repo: Arc::clone(&collab.actors),
            series_repo: Arc::clone(&collab.buffers),
            events: Arc::clone(&collab.events),
            insights,
            commands,
            metrics: metrics.clone(),
            health: Arc::clone(&health),
        };
        Self {
            processor: ExecutionProcessor::new(deps, config),
            registry: InstanceRegistry::new(),
            rules: RwLock::new(HashMap::new()),
            evictor: Evictor::new(BufferLimits::from_config(&config.execution)),
            health,
            metrics,
            retry: RetryPolicy::from_config(&config.retry),
            lookback: delta(config.runtime.lookback.as_duration(), TimeDelta::days(15)),
            offline_after: delta(config.maintenance.offline_after.as_duration(), TimeDelta::hours(1)),
            ontology_ttl: config.cache.ontology_ttl.as_duration(),
            max_binding_depth: config.execution.max_binding_depth,
            collab,
        }
    }

    pub(crate) fn mark_started(&self) {
        self.health.mark_started();
    }

    pub(crate) fn insights(&self) -> &SinkQueue<Insight> {
        self.processor.insights()
    }

    pub(crate) fn commands(&self) -> &SinkQueue<Command> {
        self.processor.commands()
    }

    fn rule_map(&self) -> Arc<HashMap<String, Arc<Rule>>> {
        Arc::new(
            self.rules
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        )
    }

    pub fn rule(&self, id: &str) -> Option<Arc<Rule>> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn instances(&self) -> Vec<Arc<RuleInstance>> {
        self.registry.all()
    }

    /// Current state of one actor, when idle.
    pub fn actor(&self, id: &str) -> Option<fr_core::actor::ActorState> {
        self.processor.actors().get(id)
    }

    // -- rules ----------------------------------------------------------------

    /// Publish rules: validate, upsert into the repository, and keep them
    /// for the next rebuild. Invalid rules are logged and skipped.
    pub async fn load_rules(&self, rules: Vec<Rule>) -> RuntimeResult<usize> {
        let mut accepted = 0;
        for rule in rules {
            if let Err(e) = rule.validate() {
                fr_warn!(conf, rule = %rule.id, error = %e, "rule rejected");
                continue;
            }
            retry(&self.retry, "rule upsert", || self.collab.rules.upsert_rule(&rule))
                .await
                .err_conv()?;
            self.rules
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(rule.id.clone(), Arc::new(rule));
            accepted += 1;
        }
        fr_info!(conf, rules = accepted, "rules loaded");
        Ok(accepted)
    }

    /// Load rules, instances, actors and buffers persisted by an earlier
    /// run.
    pub async fn restore(&self) -> RuntimeResult<RestoreSummary> {
        let rules = retry(&self.retry, "rule list", || self.collab.rules.list_rules())
            .await
            .err_conv()?;
        let instances = retry(&self.retry, "instance list", || {
            self.collab.instances.list_instances()
        })
        .await
        .err_conv()?;
        let actors = retry(&self.retry, "actor list", || self.collab.actors.list_actors())
            .await
            .err_conv()?;
        let buffers = retry(&self.retry, "buffer list", || self.collab.buffers.list_buffers())
            .await
            .err_conv()?;

        let summary = RestoreSummary {
            rules: rules.len(),
            instances: instances.len(),
            actors: actors.len(),
            buffers: buffers.len(),
        };
        {
            let mut map = self.rules.write().unwrap_or_else(PoisonError::into_inner);
            for rule in rules {
                map.insert(rule.id.clone(), Arc::new(rule));
            }
        }
        let mut by_rule: HashMap<String, Vec<RuleInstance>> = HashMap::new();
        for inst in instances {
            by_rule.entry(inst.rule_id.clone()).or_default().push(inst);
        }
        for (rule_id, group) in by_rule {
            self.registry.replace(&rule_id, group);
        }
        self.processor.actors().restore(actors);
        for (point_id, buffer) in buffers {
            self.processor.series().restore(point_id, buffer);
        }
        self.update_sizes();
        fr_info!(sys,
            rules = summary.rules,
            instances = summary.instances,
            actors = summary.actors,
            buffers = summary.buffers,
            "state restored"
        );
        Ok(summary)
    }

    async fn ontology_snapshot(&self) -> RuntimeResult<OntologySnapshot> {
        let cache = self.collab.cache.as_ref();
        match get_json::<OntologySnapshot>(cache, ONTOLOGY_KEY).await {
            Ok(Some(snapshot)) => return Ok(snapshot),
            Ok(None) => {}
            Err(e) => fr_warn!(conn, error = %e, "ontology cache read failed"),
        }

        let fetched = retry(&self.retry, "ontology fetch", || {
            self.collab.ontology.equipment_graph()
        })
        .await;
        match fetched {
            Ok(snapshot) => {
                self.health.recover(ONTOLOGY_DEPENDENCY);
                if let Err(e) = set_json(cache, ONTOLOGY_KEY, &snapshot, self.ontology_ttl).await {
                    fr_warn!(conn, error = %e, "ontology cache write failed");
                }
                Ok(snapshot)
            }
            Err(e) => {
                self.health.degrade(ONTOLOGY_DEPENDENCY, e.to_string());
                Err::<OntologySnapshot, _>(e).err_conv()
            }
        }
    }

    /// Forget the cached graph so the next rebuild fetches it again.
    pub async fn invalidate_ontology(&self) -> RuntimeResult<()> {
        self.collab.cache.remove(ONTOLOGY_KEY).await.err_conv()
    }

    /// Rebuild the instances of one rule, or of every rule, from the
    /// ontology graph. Actors of instances that disappeared are removed
    /// together with their persisted state.
    #[tracing::instrument(name = "rebuild", skip_all, fields(request = %request.id))]
    pub async fn rebuild_rules(&self, request: &ExecutionRequest) -> RuntimeResult<BuildSummary> {
        let targets: Vec<Arc<Rule>> = match &request.rule_id {
            Some(id) => match self.rule(id) {
                Some(rule) => vec![rule],
                None => {
                    return Err(StructError::from(RuntimeReason::Execution)
                        .with_detail(format!("unknown rule {id:?}")));
                }
            },
            None => {
                let mut all: Vec<Arc<Rule>> = self
                    .rules
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .values()
                    .cloned()
                    .collect();
                all.sort_by(|a, b| a.id.cmp(&b.id));
                all
            }
        };

        let snapshot = self.ontology_snapshot().await?;
        let graph = OntologyGraph::build(&snapshot);
        let builder = RuleInstanceBuilder::new(&graph, self.max_binding_depth);

        let mut summary = BuildSummary::default();
        let mut stale: Vec<Arc<RuleInstance>> = Vec::new();
        for rule in targets {
            let report = match builder.build(&rule) {
                Ok(report) => report,
                Err(e) => {
                    fr_warn!(conf, rule = %rule.id, error = %e, "rule not bound");
                    summary.failures += 1;
                    continue;
                }
            };
            for f in &report.failures {
                fr_debug!(conf,
                    rule = %f.rule_id,
                    equipment = %f.equipment_id,
                    parameter = %f.parameter,
                    reason = %f.reason,
                    "parameter unresolved"
                );
            }

            let previous = self.registry.for_rule(&rule.id);
            let outcome = self.registry.replace(&rule.id, report.instances.clone());
            stale.extend(
                previous
                    .into_iter()
                    .filter(|i| outcome.removed.contains(&i.id)),
            );
            retry(&self.retry, "instance replace", || {
                self.collab.instances.replace_instances(&rule.id, &report.instances)
            })
            .await
            .err_conv()?;

            self.collab.events.emit(EngineEvent::RulesRebuilt {
                rule_id: rule.id.clone(),
                instances: report.instances.len(),
                failures: report.failures.len(),
            });
            summary.rules += 1;
            summary.instances += report.instances.len();
            summary.added += outcome.added.len();
            summary.changed += outcome.changed.len();
            summary.failures += report.failures.len();
        }

        summary.removed_actors += self.drop_actors(&stale).await?;
        if request.rule_id.is_none() {
            // Actors left over from rules or equipment that no longer exist.
            let keep: HashSet<String> = self.registry.all().iter().map(|i| i.id.clone()).collect();
            let orphans = self.processor.actors().retain(&keep);
            if !orphans.is_empty() {
                self.remove_persisted(&orphans).await?;
                summary.removed_actors += orphans.len();
            }
        }
        self.update_sizes();
        fr_info!(conf,
            rules = summary.rules,
            instances = summary.instances,
            failures = summary.failures,
            removed_actors = summary.removed_actors,
            "rebuild complete"
        );
        Ok(summary)
    }

    async fn drop_actors(&self, instances: &[Arc<RuleInstance>]) -> RuntimeResult<usize> {
        if instances.is_empty() {
            return Ok(0);
        }
        self.processor.actors().remove(instances).await;
        let ids: Vec<String> = instances.iter().map(|i| i.id.clone()).collect();
        self.remove_persisted(&ids).await?;
        Ok(ids.len())
    }

    async fn remove_persisted(&self, ids: &[String]) -> RuntimeResult<()> {
        retry(&self.retry, "actor removal", || self.collab.actors.remove_actors(ids))
            .await
            .err_conv()
    }

    /// Drop every instance and actor bound to `equipment_id`. Returns the
    /// number of instances removed.
    pub async fn remove_equipment(&self, equipment_id: &str) -> RuntimeResult<usize> {
        let removed = self.registry.remove_equipment(equipment_id);
        if removed.is_empty() {
            return Ok(0);
        }
        let rule_ids: BTreeSet<String> = removed.iter().map(|i| i.rule_id.clone()).collect();
        for rule_id in &rule_ids {
            let remaining: Vec<RuleInstance> = self
                .registry
                .for_rule(rule_id)
                .iter()
                .map(|i| (**i).clone())
                .collect();
            retry(&self.retry, "instance replace", || {
                self.collab.instances.replace_instances(rule_id, &remaining)
            })
            .await
            .err_conv()?;
        }
        let count = self.drop_actors(&removed).await?;
        self.update_sizes();
        fr_info!(conf, equipment = %equipment_id, instances = count, "equipment removed");
        Ok(count)
    }

    // -- execution ------------------------------------------------------------

    fn scope(
        &self,
        rule_id: Option<&str>,
        equipment_ids: &[String],
    ) -> RuntimeResult<Vec<Arc<RuleInstance>>> {
        let mut instances = match rule_id {
            Some(id) => {
                if self.rule(id).is_none() {
                    return Err(StructError::from(RuntimeReason::Execution)
                        .with_detail(format!("unknown rule {id:?}")));
                }
                self.registry.for_rule(id)
            }
            None => self.registry.all(),
        };
        if !equipment_ids.is_empty() {
            instances.retain(|inst| equipment_ids.contains(&inst.equipment_id));
        }
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances)
    }

    /// Newest instant evaluated by any idle actor.
    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.processor.actors().watermark()
    }

    /// Process a date range. A realtime request without an explicit range
    /// runs from the watermark (or `now - lookback`) up to now.
    #[tracing::instrument(name = "execute", skip_all, fields(request = %request.id, realtime = is_realtime))]
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
        is_realtime: bool,
        cancel: CancellationToken,
    ) -> RuntimeResult<PassReport> {
        if request.command != RequestCommand::ProcessDateRange {
            return Err(StructError::from(RuntimeReason::Execution)
                .with_detail(format!("request {} is not a date-range request", request.id)));
        }
        let instances = self.scope(request.rule_id.as_deref(), &request.equipment_ids)?;
        let (start, end) = match (request.start, request.end) {
            (Some(start), Some(end)) => (start, end),
            _ if is_realtime => {
                let end = request.end.unwrap_or_else(Utc::now);
                let start = request
                    .start
                    .or_else(|| self.watermark())
                    .unwrap_or(end - self.lookback);
                (start, end)
            }
            _ => {
                return Err(StructError::from(RuntimeReason::Execution).with_detail(format!(
                    "batch request {} needs both start and end",
                    request.id
                )));
            }
        };
        if start > end {
            return Err(StructError::from(RuntimeReason::Execution)
                .with_detail(format!("request {}: start {start} is after end {end}", request.id)));
        }
        let reset = request.reset.then(|| match request.start {
            Some(s) => Reset::From(s),
            None => Reset::All,
        });

        let plan = PassPlan {
            request_id: request.id.clone(),
            mode: if is_realtime {
                PassMode::Realtime
            } else {
                PassMode::Batch
            },
            instances,
            rules: self.rule_map(),
            reset,
            input: PassInput::Range { start, end },
        };
        let report = self.processor.run_pass(plan, cancel).await;
        self.update_sizes();
        Ok(report)
    }

    /// Feed live points from `rx` to the instances in `scope` until the
    /// sender side closes or `cancel` fires. Only those actors are leased,
    /// so batch passes over other equipment run alongside the stream.
    pub async fn run_stream(
        &self,
        scope: &StreamScope,
        rx: mpsc::Receiver<TelemetryPoint>,
        cancel: CancellationToken,
    ) -> RuntimeResult<PassReport> {
        let instances = self.scope(scope.rule_id.as_deref(), &scope.equipment_ids)?;
        let plan = PassPlan {
            request_id: format!("stream-{}", Utc::now().timestamp_millis()),
            mode: PassMode::Stream,
            instances,
            rules: self.rule_map(),
            reset: None,
            input: PassInput::Stream(rx),
        };
        let report = self.processor.run_pass(plan, cancel).await;
        self.update_sizes();
        Ok(report)
    }

    /// Dispatch any request kind.
    pub async fn handle(
        &self,
        request: &ExecutionRequest,
        is_realtime: bool,
        cancel: CancellationToken,
    ) -> RuntimeResult<ExecutionOutcome> {
        match request.command {
            RequestCommand::BuildRule => self.rebuild_rules(request).await.map(ExecutionOutcome::Built),
            RequestCommand::ProcessDateRange => self
                .execute(request, is_realtime, cancel)
                .await
                .map(ExecutionOutcome::Pass),
        }
    }

    // -- maintenance ----------------------------------------------------------

    /// Point health of `ids`; every bound point when `ids` is empty.
    pub fn check_status(&self, ids: &[String]) -> Vec<PointStatus> {
        self.check_status_at(ids, Utc::now())
    }

    pub fn check_status_at(&self, ids: &[String], now: DateTime<Utc>) -> Vec<PointStatus> {
        let ids: Vec<String> = if ids.is_empty() {
            self.bound_points()
        } else {
            ids.to_vec()
        };
        self.processor
            .series()
            .check_status(&ids, now, self.offline_after)
    }

    fn bound_points(&self) -> Vec<String> {
        let points: BTreeSet<String> = self
            .registry
            .all()
            .iter()
            .flat_map(|i| i.point_ids().into_iter().map(str::to_string).collect::<Vec<_>>())
            .collect();
        points.into_iter().collect()
    }

    /// Status sweep plus buffer eviction over the shared store. Eviction
    /// runs against the newest data instant so replayed history is not
    /// evicted wholesale.
    pub fn sweep(&self) -> SweepReport {
        let statuses = self.check_status(&[]);
        let mut report = SweepReport::default();
        for s in &statuses {
            match s.health {
                PointHealth::Online => report.online += 1,
                PointHealth::Offline => report.offline += 1,
                PointHealth::Unknown => report.unknown += 1,
            }
        }
        let series = self.processor.series();
        let now = series.latest_timestamp().unwrap_or_else(Utc::now);
        let evicted: EvictReport = self.evictor.run_once(series, now);
        report.values_evicted = evicted.values_evicted;
        report.points_emptied = evicted.points_emptied;
        if let Some(m) = &self.metrics {
            m.add_evict_report(&evicted);
        }
        self.update_sizes();
        report
    }

    /// Persist idle actors among `ids` (all when `None`) and the buffers
    /// they are bound to. Returns the number of records written.
    pub async fn persist_to_database(&self, ids: Option<&[String]>) -> RuntimeResult<usize> {
        let actors = self.processor.actors().snapshot(ids);
        let points: Option<Vec<String>> = ids.map(|ids| {
            let set: BTreeSet<String> = ids
                .iter()
                .filter_map(|id| self.registry.get(id))
                .flat_map(|i| i.point_ids().into_iter().map(str::to_string).collect::<Vec<_>>())
                .collect();
            set.into_iter().collect()
        });
        self.processor.persist(&actors, points.as_deref()).await
    }

    /// Flush both sink queues.
    pub async fn flush(&self) {
        self.processor.flush_sinks().await;
    }

    pub fn health(&self) -> HealthReport {
        let rule_instances = self.registry.len();
        HealthReport {
            state: self.health.state(rule_instances),
            rules: self.rules.read().unwrap_or_else(PoisonError::into_inner).len(),
            rule_instances,
            actors: self.processor.actors().len(),
            points: self.processor.series().len(),
            watermark: self.watermark(),
        }
    }

    fn update_sizes(&self) {
        if let Some(m) = &self.metrics {
            m.set_sizes(
                self.registry.len(),
                self.processor.actors().len(),
                self.processor.series().len(),
            );
        }
    }
}

fn delta(d: Duration, fallback: TimeDelta) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(fallback)
}
