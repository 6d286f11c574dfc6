use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::service::RulesService;

/// Run the point status sweep and the state persistence job on their own
/// intervals until cancelled.
///
/// Each tick runs in its own task so a panicking job is logged and the
/// next tick still fires.
#[tracing::instrument(name = "maintenance", skip_all)]
pub async fn run_maintenance(
    service: Arc<RulesService>,
    status_interval: Duration,
    persist_interval: Duration,
    cancel: CancellationToken,
) {
    let mut status = interval_at(Instant::now() + status_interval, status_interval);
    status.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut persist = interval_at(Instant::now() + persist_interval, persist_interval);
    persist.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = status.tick() => {
                let svc = Arc::clone(&service);
                match tokio::task::spawn_blocking(move || svc.sweep()).await {
                    Ok(report) => fr_debug!(res,
                        online = report.online,
                        offline = report.offline,
                        unknown = report.unknown,
                        evicted = report.values_evicted,
                        emptied = report.points_emptied,
                        "status sweep"
                    ),
                    Err(e) => fr_error!(res, error = %e, "status sweep aborted"),
                }
            }
            _ = persist.tick() => {
                let svc = Arc::clone(&service);
                match tokio::spawn(async move { svc.persist_to_database(None).await }).await {
                    Ok(Ok(written)) => fr_debug!(res, records = written, "state persisted"),
                    Ok(Err(e)) => fr_warn!(conn, error = %e, "periodic persist failed"),
                    Err(e) => fr_error!(res, error = %e, "periodic persist aborted"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};

    use fr_config::EngineConfig;
    use fr_core::binding::OntologySnapshot;
    use fr_core::insight::{Command, Insight};
    use fr_core::memory::{MemoryOutputs, MemoryStore, MemoryTelemetry};
    use fr_core::model::TelemetryPoint;

    use crate::metrics::SinkKind;
    use crate::service::Collaborators;
    use crate::sink_task::SinkQueue;

    #[tokio::test(start_paused = true)]
    async fn ticks_until_cancelled() {
        let store = Arc::new(MemoryStore::new());
        let collab = Collaborators::in_memory(
            Arc::new(MemoryTelemetry::new(Vec::<TelemetryPoint>::new())),
            OntologySnapshot::default(),
            Arc::clone(&store),
            Arc::new(MemoryOutputs::new()),
        );
        let (insights, _) = SinkQueue::<Insight>::channel(SinkKind::Insights, 8);
        let (commands, _) = SinkQueue::<Command>::channel(SinkKind::Commands, 8);
        let svc = Arc::new(RulesService::new(
            collab,
            &EngineConfig::default(),
            insights,
            commands,
            None,
        ));
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(svc.check_status_at(&["p".to_string()], at).len(), 1);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_maintenance(
            Arc::clone(&svc),
            Duration::from_secs(1),
            Duration::from_secs(2),
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!task.is_finished());

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(store.actor_count(), 0);
    }
}
