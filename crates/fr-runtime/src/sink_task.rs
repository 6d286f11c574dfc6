use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use orion_error::prelude::*;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use fr_config::SinkConfig;
use fr_core::error::CoreResult;
use fr_core::insight::{Coalesce, Command, Insight, coalesce};
use fr_core::ports::{CommandRepository, InsightRepository};
use fr_core::retry::{RetryPolicy, retry};

use crate::error::{RuntimeReason, RuntimeResult};
use crate::metrics::{RuntimeMetrics, SinkKind};

pub(crate) enum SinkMsg<T> {
    Record(T),
    /// Write everything queued so far, then acknowledge.
    Flush(oneshot::Sender<()>),
}

// ---------------------------------------------------------------------------
// SinkQueue: producer side
// ---------------------------------------------------------------------------

/// Bounded producer handle of a sink. Senders wait while the queue is full,
/// which is the only way persistence latency reaches the execution path.
pub struct SinkQueue<T> {
    kind: SinkKind,
    tx: mpsc::Sender<SinkMsg<T>>,
    closed: CancellationToken,
}

impl<T> Clone for SinkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            tx: self.tx.clone(),
            closed: self.closed.clone(),
        }
    }
}

/// Consumer side of a [`SinkQueue`].
pub struct SinkIntake<T> {
    kind: SinkKind,
    rx: mpsc::Receiver<SinkMsg<T>>,
    closed: CancellationToken,
}

impl<T: Send + 'static> SinkQueue<T> {
    pub fn channel(kind: SinkKind, capacity: usize) -> (Self, SinkIntake<T>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();
        (
            Self {
                kind,
                tx,
                closed: closed.clone(),
            },
            SinkIntake { kind, rx, closed },
        )
    }

    fn closed_error(&self) -> crate::error::RuntimeError {
        StructError::from(RuntimeReason::Shutdown)
            .with_detail(format!("{} queue is complete", self.kind.label()))
    }

    pub async fn send(&self, record: T) -> RuntimeResult<()> {
        if self.closed.is_cancelled() {
            return Err(self.closed_error());
        }
        self.tx
            .send(SinkMsg::Record(record))
            .await
            .map_err(|_| self.closed_error())
    }

    pub async fn send_all(&self, records: Vec<T>) -> RuntimeResult<()> {
        for record in records {
            self.send(record).await?;
        }
        Ok(())
    }

    /// Resolve once every record sent before this call has been written (or
    /// dropped after exhausting retries).
    pub async fn flush(&self) -> RuntimeResult<()> {
        if self.closed.is_cancelled() {
            return Err(self.closed_error());
        }
        let (ack, done) = oneshot::channel();
        self.tx
            .send(SinkMsg::Flush(ack))
            .await
            .map_err(|_| self.closed_error())?;
        done.await.map_err(|_| self.closed_error())
    }

    /// No more input: the consumer drains what is queued and exits.
    pub fn complete(&self) {
        self.closed.cancel();
    }

    pub fn is_complete(&self) -> bool {
        self.closed.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// RecordWriter: persistence seam
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RecordWriter<T>: Send + Sync {
    async fn write(&self, batch: &[T]) -> CoreResult<()>;
}

#[async_trait]
impl RecordWriter<Insight> for Arc<dyn InsightRepository> {
    async fn write(&self, batch: &[Insight]) -> CoreResult<()> {
        self.append_insights(batch).await
    }
}

#[async_trait]
impl RecordWriter<Command> for Arc<dyn CommandRepository> {
    async fn write(&self, batch: &[Command]) -> CoreResult<()> {
        self.append_commands(batch).await
    }
}

// ---------------------------------------------------------------------------
// Consumer task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SinkOptions {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub retry: RetryPolicy,
}

impl SinkOptions {
    pub fn from_config(cfg: &SinkConfig, retry: RetryPolicy) -> Self {
        Self {
            batch_size: cfg.batch_size.max(1),
            flush_interval: cfg.flush_interval.as_duration(),
            retry,
        }
    }
}

struct Consumer<T, W> {
    kind: SinkKind,
    writer: W,
    opts: SinkOptions,
    metrics: Option<Arc<RuntimeMetrics>>,
    pending: Vec<T>,
}

impl<T, W> Consumer<T, W>
where
    T: Coalesce + Send + Sync,
    W: RecordWriter<T>,
{
    async fn handle(&mut self, msg: SinkMsg<T>) {
        match msg {
            SinkMsg::Record(record) => {
                self.pending.push(record);
                if self.pending.len() >= self.opts.batch_size {
                    self.write_pending().await;
                }
            }
            SinkMsg::Flush(ack) => {
                self.write_pending().await;
                let _ = ack.send(());
            }
        }
    }

    async fn write_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = coalesce(std::mem::take(&mut self.pending));
        let op = format!("{} write", self.kind.label());
        let started = Instant::now();
        match retry(&self.opts.retry, &op, || self.writer.write(&batch)).await {
            Ok(()) => {
                if let Some(m) = &self.metrics {
                    m.add_sink_batch(self.kind, batch.len());
                }
                fr_debug!(res,
                    sink = self.kind.label(),
                    records = batch.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "sink batch written"
                );
            }
            Err(e) => {
                if let Some(m) = &self.metrics {
                    m.inc_sink_write_failed(self.kind);
                }
                fr_error!(conn,
                    sink = self.kind.label(),
                    records = batch.len(),
                    error = %e,
                    "sink write failed after retries, batch dropped"
                );
            }
        }
    }
}

/// Batch records from `intake` into `writer` until the queue completes or
/// every producer is gone.
///
/// Records sharing an id within a batch are coalesced first. A batch that
/// still fails after retries is logged and dropped; the consumer keeps
/// going.
#[tracing::instrument(name = "sink", skip_all, fields(sink = intake.kind.label()))]
pub async fn run_sink_consumer<T, W>(
    intake: SinkIntake<T>,
    writer: W,
    opts: SinkOptions,
    metrics: Option<Arc<RuntimeMetrics>>,
) where
    T: Coalesce + Send + Sync,
    W: RecordWriter<T>,
{
    let SinkIntake {
        kind,
        mut rx,
        closed,
    } = intake;
    let period = opts.flush_interval.max(Duration::from_millis(1));
    let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut consumer = Consumer {
        kind,
        writer,
        opts,
        metrics,
        pending: Vec::new(),
    };

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => consumer.handle(msg).await,
                None => break,
            },
            _ = tick.tick() => consumer.write_pending().await,
            _ = closed.cancelled() => {
                rx.close();
                while let Some(msg) = rx.recv().await {
                    consumer.handle(msg).await;
                }
                break;
            }
        }
    }
    consumer.write_pending().await;
    fr_debug!(sys, sink = kind.label(), "sink consumer finished");
}
