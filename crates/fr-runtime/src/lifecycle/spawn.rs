use std::sync::Arc;
use std::time::Duration;

use orion_error::compat_prelude::*;
use tokio::net::TcpListener;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use fr_config::EngineConfig;
use fr_core::insight::{Command, Insight};
use fr_core::model::ExecutionRequest;
use fr_core::ports::{CommandRepository, InsightRepository};
use fr_core::retry::RetryPolicy;

use crate::error::RuntimeResult;
use crate::maintenance_task;
use crate::metrics::{self, RuntimeMetrics, SinkKind};
use crate::orchestrator::{Orchestrator, OrchestratorHandle};
use crate::service::RulesService;
use crate::sink_task::{SinkOptions, SinkQueue, run_sink_consumer};

use super::types::TaskGroup;

// ---------------------------------------------------------------------------
// Phase 2: spawn helpers, one channel and one task each
// ---------------------------------------------------------------------------

/// Spawn the insight and command consumers. Returns both producer queues.
pub(super) fn spawn_sink_tasks(
    config: &EngineConfig,
    insight_writer: Arc<dyn InsightRepository>,
    command_writer: Arc<dyn CommandRepository>,
    metrics: Option<Arc<RuntimeMetrics>>,
) -> (SinkQueue<Insight>, SinkQueue<Command>, TaskGroup) {
    let opts = SinkOptions::from_config(&config.sink, RetryPolicy::from_config(&config.retry));
    let (insights, insight_intake) =
        SinkQueue::<Insight>::channel(SinkKind::Insights, config.sink.insight_capacity);
    let (commands, command_intake) =
        SinkQueue::<Command>::channel(SinkKind::Commands, config.sink.command_capacity);

    let mut group = TaskGroup::new("sinks");
    let insight_opts = opts.clone();
    let insight_metrics = metrics.clone();
    group.push(tokio::spawn(async move {
        run_sink_consumer(insight_intake, insight_writer, insight_opts, insight_metrics).await;
        Ok(())
    }));
    group.push(tokio::spawn(async move {
        run_sink_consumer(command_intake, command_writer, opts, metrics).await;
        Ok(())
    }));
    (insights, commands, group)
}

/// Spawn the periodic status sweep / persistence task.
pub(super) fn spawn_maintenance_task(
    config: &EngineConfig,
    service: &Arc<RulesService>,
    cancel: CancellationToken,
) -> TaskGroup {
    let status_interval = config.maintenance.status_interval.as_duration();
    let persist_interval = config.maintenance.persist_interval.as_duration();
    let service = Arc::clone(service);
    let mut group = TaskGroup::new("maintenance");
    group.push(tokio::spawn(async move {
        maintenance_task::run_maintenance(service, status_interval, persist_interval, cancel)
            .await;
        Ok(())
    }));
    group
}

/// Bind the Prometheus listener and spawn the exporter.
pub(super) async fn spawn_metrics_task(
    config: &EngineConfig,
    metrics: Arc<RuntimeMetrics>,
    cancel: CancellationToken,
) -> RuntimeResult<TaskGroup> {
    let listener = TcpListener::bind(&config.metrics.prometheus_listen)
        .await
        .owe_sys()?;
    let metrics_config = config.metrics.clone();
    let mut group = TaskGroup::new("metrics");
    group.push(tokio::spawn(async move {
        metrics::run_metrics_task(metrics, metrics_config, listener, cancel).await
    }));
    Ok(group)
}

/// Spawn the orchestrator loop. Returns its submission handle.
pub(super) fn spawn_orchestrator_task(
    config: &EngineConfig,
    service: &Arc<RulesService>,
    cancel: CancellationToken,
) -> (OrchestratorHandle, TaskGroup) {
    let (orchestrator, handle) = Orchestrator::new(
        Arc::clone(service),
        config.runtime.realtime_channel_capacity,
        config.runtime.batch_channel_capacity,
        cancel,
    );
    let mut group = TaskGroup::new("orchestrator");
    group.push(tokio::spawn(orchestrator.run()));
    (handle, group)
}

/// Spawn the live ticker: one realtime request per `realtime_interval`.
/// Returns `None` when the interval is zero.
pub(super) fn spawn_ticker_task(
    config: &EngineConfig,
    handle: &OrchestratorHandle,
    cancel: CancellationToken,
) -> Option<TaskGroup> {
    let period = config.runtime.realtime_interval.as_duration();
    if period.is_zero() {
        fr_info!(sys, "realtime ticker disabled");
        return None;
    }
    let handle = handle.clone();
    let mut group = TaskGroup::new("ticker");
    group.push(tokio::spawn(async move {
        run_ticker(handle, period, cancel).await;
        Ok(())
    }));
    Some(group)
}

#[tracing::instrument(name = "ticker", skip_all)]
async fn run_ticker(handle: OrchestratorHandle, period: Duration, cancel: CancellationToken) {
    let mut tick = interval_at(Instant::now(), period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = handle.enqueue(ExecutionRequest::realtime(), true) => {
                        if let Err(e) = sent {
                            fr_debug!(pipe, error = %e, "realtime tick not accepted");
                            break;
                        }
                    }
                }
            }
        }
    }
}
