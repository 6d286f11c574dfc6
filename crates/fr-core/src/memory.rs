//! In-process implementations of the collaborator ports, used by tests and
//! by the simulator.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::actor::ActorState;
use crate::binding::{ModelDef, OntologySnapshot};
use crate::error::CoreResult;
use crate::insight::{Coalesce, Command, Insight};
use crate::model::{Rule, RuleInstance, TelemetryPoint};
use crate::ports::{
    ActorRepository, CommandRepository, InsightRepository, OntologyService, RuleInstanceRepository,
    RuleRepository, TelemetrySource, TimeSeriesRepository,
};
use crate::timeseries::TimeSeriesBuffer;

// ---------------------------------------------------------------------------
// MemoryTelemetry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryTelemetry {
    points: RwLock<Vec<TelemetryPoint>>,
}

impl MemoryTelemetry {
    pub fn new(points: Vec<TelemetryPoint>) -> Self {
        Self {
            points: RwLock::new(points),
        }
    }

    pub fn extend(&self, points: impl IntoIterator<Item = TelemetryPoint>) {
        self.points
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(points);
    }

    /// Swap the whole history, e.g. after upstream corrections.
    pub fn replace(&self, points: Vec<TelemetryPoint>) {
        *self.points.write().unwrap_or_else(PoisonError::into_inner) = points;
    }
}

#[async_trait]
impl TelemetrySource for MemoryTelemetry {
    async fn query(
        &self,
        ids: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<TelemetryPoint>> {
        let points = self.points.read().unwrap_or_else(PoisonError::into_inner);
        Ok(points
            .iter()
            .filter(|p| p.timestamp >= start && p.timestamp < end)
            .filter(|p| ids.iter().any(|id| *id == p.point_id))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryOntology
// ---------------------------------------------------------------------------

pub struct MemoryOntology {
    snapshot: RwLock<OntologySnapshot>,
}

impl MemoryOntology {
    pub fn new(snapshot: OntologySnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    pub fn replace(&self, snapshot: OntologySnapshot) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

#[async_trait]
impl OntologyService for MemoryOntology {
    async fn equipment_graph(&self) -> CoreResult<OntologySnapshot> {
        Ok(self
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn model(&self, id: &str) -> CoreResult<Option<ModelDef>> {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        Ok(snapshot.models.iter().find(|m| m.id == id).cloned())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Rules, instances, actors and buffers keyed by id.
#[derive(Default)]
pub struct MemoryStore {
    rules: Mutex<BTreeMap<String, Rule>>,
    instances: Mutex<BTreeMap<String, Vec<RuleInstance>>>,
    actors: Mutex<BTreeMap<String, ActorState>>,
    buffers: Mutex<BTreeMap<String, TimeSeriesBuffer>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actor_count(&self) -> usize {
        self.actors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl RuleRepository for MemoryStore {
    async fn upsert_rule(&self, rule: &Rule) -> CoreResult<()> {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn get_rule(&self, id: &str) -> CoreResult<Option<Rule>> {
        Ok(self
            .rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    async fn list_rules(&self) -> CoreResult<Vec<Rule>> {
        Ok(self
            .rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RuleInstanceRepository for MemoryStore {
    async fn replace_instances(&self, rule_id: &str, instances: &[RuleInstance]) -> CoreResult<()> {
        self.instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(rule_id.to_string(), instances.to_vec());
        Ok(())
    }

    async fn list_instances(&self) -> CoreResult<Vec<RuleInstance>> {
        Ok(self
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .flatten()
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ActorRepository for MemoryStore {
    async fn upsert_actors(&self, actors: &[ActorState]) -> CoreResult<()> {
        let mut map = self.actors.lock().unwrap_or_else(PoisonError::into_inner);
        for actor in actors {
            map.insert(actor.id.clone(), actor.clone());
        }
        Ok(())
    }

    async fn get_actor(&self, id: &str) -> CoreResult<Option<ActorState>> {
        Ok(self
            .actors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    async fn list_actors(&self) -> CoreResult<Vec<ActorState>> {
        Ok(self
            .actors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    async fn remove_actors(&self, ids: &[String]) -> CoreResult<()> {
        let mut map = self.actors.lock().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            map.remove(id);
        }
        Ok(())
    }
}

#[async_trait]
impl TimeSeriesRepository for MemoryStore {
    async fn upsert_buffers(&self, buffers: &[(String, TimeSeriesBuffer)]) -> CoreResult<()> {
        let mut map = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        for (id, buffer) in buffers {
            map.insert(id.clone(), buffer.clone());
        }
        Ok(())
    }

    async fn list_buffers(&self) -> CoreResult<Vec<(String, TimeSeriesBuffer)>> {
        Ok(self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, b)| (id.clone(), b.clone()))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryOutputs
// ---------------------------------------------------------------------------

/// Collects insights and commands, merging redelivered records by id.
#[derive(Default)]
pub struct MemoryOutputs {
    insights: Mutex<BTreeMap<String, Insight>>,
    commands: Mutex<BTreeMap<String, Command>>,
    batches: Mutex<usize>,
}

impl MemoryOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insights(&self) -> Vec<Insight> {
        self.insights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn insight_for(&self, rule_instance_id: &str) -> Option<Insight> {
        self.insights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|i| i.rule_instance_id == rule_instance_id)
            .cloned()
    }

    pub fn commands(&self) -> Vec<Command> {
        let mut out: Vec<Command> = self
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.rule_instance_id
                .cmp(&b.rule_instance_id)
                .then(a.started.cmp(&b.started))
        });
        out
    }

    /// Number of write calls received.
    pub fn batches(&self) -> usize {
        *self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn count_batch(&self) {
        *self.batches.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }
}

fn upsert<T: Coalesce + Clone>(map: &mut BTreeMap<String, T>, items: &[T]) {
    for item in items {
        match map.get_mut(item.key()) {
            Some(existing) => existing.absorb(item.clone()),
            None => {
                map.insert(item.key().to_string(), item.clone());
            }
        }
    }
}

#[async_trait]
impl InsightRepository for MemoryOutputs {
    async fn append_insights(&self, insights: &[Insight]) -> CoreResult<()> {
        self.count_batch();
        upsert(
            &mut self.insights.lock().unwrap_or_else(PoisonError::into_inner),
            insights,
        );
        Ok(())
    }
}

#[async_trait]
impl CommandRepository for MemoryOutputs {
    async fn append_commands(&self, commands: &[Command]) -> CoreResult<()> {
        self.count_batch();
        upsert(
            &mut self.commands.lock().unwrap_or_else(PoisonError::into_inner),
            commands,
        );
        Ok(())
    }
}
