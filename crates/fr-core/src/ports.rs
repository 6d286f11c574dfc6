//! Collaborator interfaces the engine consumes.
//!
//! Implementations live in [`crate::memory`] (in-process) and in the runtime
//! crate (file-backed). Repositories are expected to tolerate at-least-once
//! delivery: writes are upserts keyed by id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::actor::ActorState;
use crate::binding::{ModelDef, OntologySnapshot};
use crate::error::CoreResult;
use crate::insight::{Command, Insight};
use crate::model::{Rule, RuleInstance, TelemetryPoint};
use crate::timeseries::TimeSeriesBuffer;

/// Historical / replayed telemetry.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Points of `ids` within `[start, end)`, in any order.
    async fn query(
        &self,
        ids: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<TelemetryPoint>>;
}

#[async_trait]
pub trait OntologyService: Send + Sync {
    async fn equipment_graph(&self) -> CoreResult<OntologySnapshot>;
    async fn model(&self, id: &str) -> CoreResult<Option<ModelDef>>;
}

#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn upsert_rule(&self, rule: &Rule) -> CoreResult<()>;
    async fn get_rule(&self, id: &str) -> CoreResult<Option<Rule>>;
    async fn list_rules(&self) -> CoreResult<Vec<Rule>>;
}

#[async_trait]
pub trait RuleInstanceRepository: Send + Sync {
    /// Replace every stored instance of `rule_id` with `instances`.
    async fn replace_instances(&self, rule_id: &str, instances: &[RuleInstance]) -> CoreResult<()>;
    async fn list_instances(&self) -> CoreResult<Vec<RuleInstance>>;
}

#[async_trait]
pub trait ActorRepository: Send + Sync {
    async fn upsert_actors(&self, actors: &[ActorState]) -> CoreResult<()>;
    async fn get_actor(&self, id: &str) -> CoreResult<Option<ActorState>>;
    async fn list_actors(&self) -> CoreResult<Vec<ActorState>>;
    async fn remove_actors(&self, ids: &[String]) -> CoreResult<()>;
}

#[async_trait]
pub trait TimeSeriesRepository: Send + Sync {
    async fn upsert_buffers(&self, buffers: &[(String, TimeSeriesBuffer)]) -> CoreResult<()>;
    async fn list_buffers(&self) -> CoreResult<Vec<(String, TimeSeriesBuffer)>>;
}

#[async_trait]
pub trait InsightRepository: Send + Sync {
    async fn append_insights(&self, insights: &[Insight]) -> CoreResult<()>;
}

#[async_trait]
pub trait CommandRepository: Send + Sync {
    async fn append_commands(&self, commands: &[Command]) -> CoreResult<()>;
}

/// Execution mode of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassMode {
    Realtime,
    Batch,
    Stream,
}

/// Fire-and-continue notifications about engine activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    PassCompleted {
        request_id: String,
        mode: PassMode,
        actors: usize,
        points: u64,
        transitions: u64,
        elapsed_ms: u64,
    },
    StateChanged {
        rule_instance_id: String,
        at: DateTime<Utc>,
        is_valid: bool,
        is_faulted: bool,
    },
    RulesRebuilt {
        rule_id: String,
        instances: usize,
        failures: usize,
    },
}

/// Never blocks and never fails the caller.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: EngineEvent);
}
