//! Rule Orchestrator: one execution context fed by a realtime channel and a
//! batch channel.
//!
//! Realtime requests run inline and take priority. At most one batch
//! request is in flight, as a spawned task, so a long backfill never
//! starves live work. Closing the realtime channel finishes the in-flight
//! batch and stops; cancellation stops accepting work, cancels the batch
//! and drains queued realtime requests.

use std::sync::Arc;

use orion_error::prelude::*;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fr_core::model::ExecutionRequest;

use crate::error::{RuntimeReason, RuntimeResult};
use crate::processor::PassReport;
use crate::service::{BuildSummary, RulesService};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Built(BuildSummary),
    Pass(PassReport),
}

type Reply = oneshot::Sender<RuntimeResult<ExecutionOutcome>>;

pub(crate) struct Submission {
    request: ExecutionRequest,
    reply: Option<Reply>,
}

impl Submission {
    fn answer(self, result: RuntimeResult<ExecutionOutcome>) {
        if let Some(reply) = self.reply {
            // the submitter may have stopped waiting
            let _ = reply.send(result);
        }
    }

    fn reject(self, why: &str) {
        let detail = format!("request {} {why}", self.request.id);
        self.answer(Err(StructError::from(RuntimeReason::Shutdown).with_detail(detail)));
    }
}

// ---------------------------------------------------------------------------
// OrchestratorHandle
// ---------------------------------------------------------------------------

/// Cloneable submission side of the orchestrator.
#[derive(Clone)]
pub struct OrchestratorHandle {
    realtime: mpsc::Sender<Submission>,
    batch: mpsc::Sender<Submission>,
}

impl OrchestratorHandle {
    fn closed(request: &ExecutionRequest) -> crate::error::RuntimeError {
        StructError::from(RuntimeReason::Shutdown)
            .with_detail(format!("orchestrator closed, request {} not accepted", request.id))
    }

    async fn send(&self, submission: Submission, is_realtime: bool) -> RuntimeResult<()> {
        let channel = if is_realtime { &self.realtime } else { &self.batch };
        channel.send(submission).await.map_err(|e| Self::closed(&e.0.request))
    }

    /// Queue `request` and return a receiver for its outcome.
    pub async fn submit(
        &self,
        request: ExecutionRequest,
        is_realtime: bool,
    ) -> RuntimeResult<oneshot::Receiver<RuntimeResult<ExecutionOutcome>>> {
        let (reply, outcome) = oneshot::channel();
        self.send(
            Submission {
                request,
                reply: Some(reply),
            },
            is_realtime,
        )
        .await?;
        Ok(outcome)
    }

    /// Queue `request` without waiting for it.
    pub async fn enqueue(&self, request: ExecutionRequest, is_realtime: bool) -> RuntimeResult<()> {
        self.send(
            Submission {
                request,
                reply: None,
            },
            is_realtime,
        )
        .await
    }

    /// Queue `request` and wait for its outcome.
    pub async fn execute(
        &self,
        request: ExecutionRequest,
        is_realtime: bool,
    ) -> RuntimeResult<ExecutionOutcome> {
        let id = request.id.clone();
        let outcome = self.submit(request, is_realtime).await?;
        outcome.await.map_err(|_| {
            StructError::from(RuntimeReason::Shutdown)
                .with_detail(format!("request {id} dropped before completion"))
        })?
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct InFlight {
    request_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub(crate) struct Orchestrator {
    service: Arc<RulesService>,
    realtime_rx: mpsc::Receiver<Submission>,
    batch_rx: mpsc::Receiver<Submission>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub(crate) fn new(
        service: Arc<RulesService>,
        realtime_capacity: usize,
        batch_capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, OrchestratorHandle) {
        let (realtime, realtime_rx) = mpsc::channel(realtime_capacity.max(1));
        let (batch, batch_rx) = mpsc::channel(batch_capacity.max(1));
        (
            Self {
                service,
                realtime_rx,
                batch_rx,
                cancel,
            },
            OrchestratorHandle { realtime, batch },
        )
    }

    /// Serve requests until every realtime sender is gone or the token is
    /// cancelled.
    #[tracing::instrument(name = "orchestrator", skip_all)]
    pub(crate) async fn run(mut self) -> anyhow::Result<()> {
        let mut in_flight: Option<InFlight> = None;
        let mut batch_open = true;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.stop(in_flight.take()).await;
                    break;
                }
                msg = self.realtime_rx.recv() => match msg {
                    Some(sub) => self.run_inline(sub, self.cancel.child_token()).await,
                    None => {
                        fr_info!(pipe, "realtime channel closed, draining");
                        self.drain(in_flight.take()).await;
                        break;
                    }
                },
                _ = join_in_flight(&mut in_flight) => {
                    in_flight = None;
                }
                msg = self.batch_rx.recv(), if batch_open && in_flight.is_none() => match msg {
                    Some(sub) => in_flight = Some(self.spawn_batch(sub)),
                    None => batch_open = false,
                },
            }
        }
        fr_info!(pipe, "orchestrator stopped");
        Ok(())
    }

    /// Run a realtime request. A cancelled pass, even one still waiting for
    /// its actors, returns early and leaves them resumable.
    async fn run_inline(&self, sub: Submission, cancel: CancellationToken) {
        let result = self.service.handle(&sub.request, true, cancel).await;
        log_result(&sub.request, &result);
        sub.answer(result);
    }

    fn spawn_batch(&self, sub: Submission) -> InFlight {
        let cancel = self.cancel.child_token();
        let service = Arc::clone(&self.service);
        let token = cancel.clone();
        let request_id = sub.request.id.clone();
        fr_debug!(pipe, request = %request_id, "batch request started");
        let handle = tokio::spawn(async move {
            let result = service.handle(&sub.request, false, token).await;
            log_result(&sub.request, &result);
            sub.answer(result);
        });
        InFlight {
            request_id,
            cancel,
            handle,
        }
    }

    /// Graceful end: finish the batch in flight, refuse what is queued.
    async fn drain(&mut self, in_flight: Option<InFlight>) {
        self.batch_rx.close();
        if let Some(job) = in_flight {
            finish(job).await;
        }
        while let Ok(sub) = self.batch_rx.try_recv() {
            fr_warn!(pipe, request = %sub.request.id, "queued batch request refused on drain");
            sub.reject("refused: orchestrator draining");
        }
    }

    /// Cancellation: stop intake, drop queued batches, cancel the batch in
    /// flight, then run whatever realtime work was already queued.
    async fn stop(&mut self, in_flight: Option<InFlight>) {
        self.realtime_rx.close();
        self.batch_rx.close();
        while let Ok(sub) = self.batch_rx.try_recv() {
            fr_warn!(pipe, request = %sub.request.id, "queued batch request dropped on shutdown");
            sub.reject("dropped: orchestrator shutting down");
        }
        if let Some(job) = in_flight {
            fr_info!(pipe, request = %job.request_id, "cancelling batch in flight");
            job.cancel.cancel();
            finish(job).await;
        }
        // the batch is done, so queued realtime work runs to completion
        while let Ok(sub) = self.realtime_rx.try_recv() {
            self.run_inline(sub, CancellationToken::new()).await;
        }
    }
}

/// Resolves when the batch in flight finishes; never when there is none.
async fn join_in_flight(slot: &mut Option<InFlight>) {
    match slot {
        Some(job) => {
            if let Err(e) = (&mut job.handle).await {
                fr_error!(pipe, request = %job.request_id, error = %e, "batch task failed");
            }
        }
        None => std::future::pending().await,
    }
}

async fn finish(job: InFlight) {
    if let Err(e) = job.handle.await {
        fr_error!(pipe, request = %job.request_id, error = %e, "batch task failed");
    }
}

fn log_result(request: &ExecutionRequest, result: &RuntimeResult<ExecutionOutcome>) {
    match result {
        Ok(ExecutionOutcome::Pass(report)) if report.cancelled => {
            fr_info!(pipe, request = %request.id, "request cancelled")
        }
        Ok(_) => fr_debug!(pipe, request = %request.id, "request completed"),
        Err(e) => fr_error!(pipe, request = %request.id, error = %e, "request failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};

    use fr_config::EngineConfig;
    use fr_core::binding::{EdgeDef, ModelDef, NodeDef, OntologySnapshot};
    use fr_core::insight::{Command, Insight};
    use fr_core::memory::{MemoryOutputs, MemoryStore, MemoryTelemetry};
    use fr_core::model::{Rule, RuleCategory, RuleParameter, TelemetryPoint};
    use fr_core::rule::Condition;

    use super::*;
    use crate::metrics::SinkKind;
    use crate::service::{Collaborators, StreamScope};
    use crate::sink_task::SinkQueue;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn graph() -> OntologySnapshot {
        OntologySnapshot {
            models: vec![
                ModelDef {
                    id: "AHU".into(),
                    extends: vec![],
                },
                ModelDef {
                    id: "FanAlarm".into(),
                    extends: vec![],
                },
            ],
            nodes: vec![
                NodeDef {
                    id: "ahu-1".into(),
                    model: "AHU".into(),
                },
                NodeDef {
                    id: "ahu-1.alarm".into(),
                    model: "FanAlarm".into(),
                },
            ],
            edges: vec![EdgeDef {
                source: "ahu-1".into(),
                target: "ahu-1.alarm".into(),
                relationship: "hasCapability".into(),
            }],
        }
    }

    fn rule() -> Rule {
        Rule {
            id: "fan-fault".into(),
            name: String::new(),
            equipment_model: "AHU".into(),
            category: RuleCategory::Fault,
            command: None,
            parameters: vec![RuleParameter {
                name: "alarm".into(),
                model: "FanAlarm".into(),
                role: Default::default(),
                multiplicity: Default::default(),
            }],
            condition: Condition::IsTrue {
                param: "alarm".into(),
            },
            fault_text: "Fan alarm active".into(),
            min_points: None,
        }
    }

    async fn service() -> Arc<RulesService> {
        let points: Vec<TelemetryPoint> = (0..20)
            .map(|t| TelemetryPoint::new("ahu-1.alarm", ts(t), t % 4 == 0))
            .collect();
        let collab = Collaborators::in_memory(
            Arc::new(MemoryTelemetry::new(points)),
            graph(),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryOutputs::new()),
        );
        // Intakes dropped: records and flushes fail fast and are only logged.
        let (insights, _) = SinkQueue::<Insight>::channel(SinkKind::Insights, 1024);
        let (commands, _) = SinkQueue::<Command>::channel(SinkKind::Commands, 1024);
        let svc = Arc::new(RulesService::new(
            collab,
            &EngineConfig::default(),
            insights,
            commands,
            None,
        ));
        svc.load_rules(vec![rule()]).await.unwrap();
        svc
    }

    #[tokio::test]
    async fn build_then_batch_through_handle() {
        let svc = service().await;
        let cancel = CancellationToken::new();
        let (orch, handle) = Orchestrator::new(svc, 4, 4, cancel.clone());
        let task = tokio::spawn(orch.run());

        let built = handle
            .execute(ExecutionRequest::build_rules(None), false)
            .await
            .unwrap();
        assert!(matches!(built, ExecutionOutcome::Built(ref s) if s.instances == 1));

        let pass = handle
            .execute(ExecutionRequest::process_range(ts(0), ts(20)), false)
            .await
            .unwrap();
        let ExecutionOutcome::Pass(report) = pass else {
            panic!("expected a pass report");
        };
        assert_eq!(report.stats.points, 20);
        // true every 4th second; the opening fault at t=0 is the first
        // segment, not a transition
        assert_eq!(report.stats.faults_entered, 4);
        assert_eq!(report.stats.transitions, 9);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn realtime_close_drains_and_refuses_queued_batches() {
        let svc = service().await;
        let (orch, handle) = Orchestrator::new(svc, 4, 4, CancellationToken::new());

        // queued before the loop starts: realtime wins, then the channel
        // is closed and the batch is refused
        let batch = handle
            .submit(ExecutionRequest::build_rules(None), false)
            .await
            .unwrap();
        let OrchestratorHandle { realtime, batch: batch_tx } = handle;
        drop(realtime);

        tokio::time::timeout(Duration::from_secs(5), orch.run())
            .await
            .unwrap()
            .unwrap();
        drop(batch_tx);
        let err = batch.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("draining"), "{err}");
    }

    #[tokio::test]
    async fn cancel_refuses_new_submissions() {
        let svc = service().await;
        let cancel = CancellationToken::new();
        let (orch, handle) = Orchestrator::new(svc, 4, 4, cancel.clone());
        cancel.cancel();
        orch.run().await.unwrap();

        let err = handle
            .execute(ExecutionRequest::build_rules(None), true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not accepted"), "{err}");
    }

    #[tokio::test]
    async fn shutdown_ends_realtime_waiting_behind_a_stream() {
        let svc = service().await;
        svc.rebuild_rules(&ExecutionRequest::build_rules(None))
            .await
            .unwrap();
        let (tx, rx) = mpsc::channel(1);
        let stream = tokio::spawn({
            let svc = Arc::clone(&svc);
            async move {
                svc.run_stream(&StreamScope::all(), rx, CancellationToken::new())
                    .await
            }
        });
        // the second send lands only once the stream holds its lease
        tx.send(TelemetryPoint::new("ahu-1.alarm", ts(0), false)).await.unwrap();
        tx.send(TelemetryPoint::new("ahu-1.alarm", ts(1), false)).await.unwrap();

        let cancel = CancellationToken::new();
        let (orch, handle) = Orchestrator::new(Arc::clone(&svc), 4, 4, cancel.clone());
        let task = tokio::spawn(orch.run());
        let reply = handle
            .submit(ExecutionRequest::realtime(), true)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("orchestrator hung on a held lease")
            .unwrap()
            .unwrap();
        let Ok(ExecutionOutcome::Pass(report)) = reply.await.unwrap() else {
            panic!("expected a pass report");
        };
        assert!(report.cancelled);

        drop(tx);
        assert!(!stream.await.unwrap().unwrap().cancelled);
    }
}
