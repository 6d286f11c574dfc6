mod bootstrap;
mod signal;
mod spawn;
mod types;


use std::path::Path;
use std::sync::Arc;

use orion_error::op_context;
use orion_error::prelude::*;
use tokio_util::sync::CancellationToken;

use fr_config::EngineConfig;
use fr_core::model::{ExecutionRequest, Rule};

use crate::error::RuntimeResult;
use crate::metrics::maybe_build_metrics;
use crate::orchestrator::OrchestratorHandle;
use crate::service::{Collaborators, RulesService};

// Re-export public API
pub use signal::wait_for_signal;

use bootstrap::load_sources;
use spawn::{
    spawn_maintenance_task, spawn_metrics_task, spawn_orchestrator_task, spawn_sink_tasks,
    spawn_ticker_task,
};
use types::TaskGroup;

// ---------------------------------------------------------------------------
// RulesHost: the top-level lifecycle handle
// ---------------------------------------------------------------------------

/// Runs the rules engine: bootstrap, run, and graceful shutdown.
///
/// Task groups are stored in start order and joined in reverse (LIFO)
/// during [`wait`](Self::wait): the ticker stops producing first, then the
/// orchestrator finishes its last pass, state is persisted, and finally
/// the sink queues are completed and drained.
pub struct RulesHost {
    cancel: CancellationToken,
    /// Cancelled only after the orchestrator has stopped, so maintenance
    /// and the metrics exporter outlive the last pass.
    drain_cancel: CancellationToken,
    groups: Vec<TaskGroup>,
    service: Arc<RulesService>,
    handle: OrchestratorHandle,
}

impl RulesHost {
    /// Bootstrap from a [`EngineConfig`] whose relative paths resolve
    /// against `base_dir`.
    pub async fn start(config: EngineConfig, base_dir: &Path) -> RuntimeResult<Self> {
        let data = load_sources(&config, base_dir).await?;
        Self::start_with(config, data.collab, data.rules).await
    }

    /// Bootstrap around caller-provided collaborators.
    #[tracing::instrument(name = "host.start", skip_all, fields(rules = rules.len()))]
    pub async fn start_with(
        config: EngineConfig,
        collab: Collaborators,
        rules: Vec<Rule>,
    ) -> RuntimeResult<Self> {
        let mut op = op_context!("host-bootstrap").with_auto_log();
        op.record("rules", rules.len().to_string().as_str());
        op.record("parallelism", config.runtime.parallelism.to_string().as_str());

        let cancel = CancellationToken::new();
        let drain_cancel = CancellationToken::new();
        let metrics = maybe_build_metrics(&config.metrics);

        // Spawn task groups (start order: sinks → maintenance → metrics →
        // orchestrator → ticker)
        let mut groups: Vec<TaskGroup> = Vec::with_capacity(5);

        let (insights, commands, sink_group) = spawn_sink_tasks(
            &config,
            Arc::clone(&collab.insights),
            Arc::clone(&collab.commands),
            metrics.clone(),
        );
        groups.push(sink_group);

        let service = Arc::new(RulesService::new(
            collab,
            &config,
            insights,
            commands,
            metrics.clone(),
        ));

        // Restore persisted state, publish rules, bind instances
        let restored = service.restore().await?;
        service.load_rules(rules).await?;
        if let Err(e) = service
            .rebuild_rules(&ExecutionRequest::build_rules(None))
            .await
        {
            // health reports the degraded dependency; a later BuildRule
            // request retries
            fr_warn!(sys, error = %e, "initial rebuild failed");
        }
        service.mark_started();

        groups.push(spawn_maintenance_task(
            &config,
            &service,
            drain_cancel.child_token(),
        ));
        if let Some(m) = metrics {
            groups.push(spawn_metrics_task(&config, m, drain_cancel.child_token()).await?);
        }
        let (handle, orchestrator_group) =
            spawn_orchestrator_task(&config, &service, cancel.child_token());
        groups.push(orchestrator_group);
        if let Some(ticker) = spawn_ticker_task(&config, &handle, cancel.child_token()) {
            groups.push(ticker);
        }

        let health = service.health();
        fr_info!(
            sys,
            restored_actors = restored.actors,
            rules = health.rules,
            instances = health.rule_instances,
            "rules host started"
        );
        op.mark_suc();
        Ok(Self {
            cancel,
            drain_cancel,
            groups,
            service,
            handle,
        })
    }

    /// Submission handle of the orchestrator.
    pub fn handle(&self) -> OrchestratorHandle {
        self.handle.clone()
    }

    pub fn service(&self) -> Arc<RulesService> {
        Arc::clone(&self.service)
    }

    /// Request graceful shutdown of all tasks.
    pub fn shutdown(&self) {
        fr_info!(sys, "initiating graceful shutdown");
        self.cancel.cancel();
    }

    /// Wait for all task groups to complete after shutdown.
    ///
    /// Once the orchestrator group has finished, the final state is
    /// persisted and both sink queues are completed; maintenance and
    /// metrics are cancelled at the same point.
    pub async fn wait(mut self) -> RuntimeResult<()> {
        while let Some(group) = self.groups.pop() {
            let name = group.name;
            fr_debug!(sys, task_group = name, "waiting for task group to finish");
            group.wait().await?;
            fr_debug!(sys, task_group = name, "task group finished");

            if name == "orchestrator" {
                self.drain_cancel.cancel();
                match self.service.persist_to_database(None).await {
                    Ok(written) => fr_info!(sys, records = written, "final state persisted"),
                    Err(e) => fr_error!(sys, error = %e, "final persist failed"),
                }
                self.service.flush().await;
                self.service.insights().complete();
                self.service.commands().complete();
            }
        }
        fr_info!(sys, "rules host stopped");
        Ok(())
    }

    /// Returns a clone of the root cancellation token (for signal integration).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
