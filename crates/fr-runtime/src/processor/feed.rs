use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fr_core::model::TelemetryPoint;
use fr_core::ports::TelemetrySource;
use fr_core::retry::{RetryPolicy, retry};

/// Points handed to the workers in one step.
pub(crate) type Chunk = Vec<TelemetryPoint>;

const STREAM_CHUNK: usize = 256;

/// Historical pull over `[start, end)`, one query window at a time.
pub(crate) struct BatchFeed {
    source: Arc<dyn TelemetrySource>,
    ids: Vec<String>,
    cursor: DateTime<Utc>,
    end: DateTime<Utc>,
    window: TimeDelta,
    retry: RetryPolicy,
    /// Identifiers skipped because even a per-id query kept failing. They
    /// stay out of every later window of the pass.
    pub failed: BTreeSet<String>,
    pub last_error: Option<String>,
}

impl BatchFeed {
    pub(crate) fn new(
        source: Arc<dyn TelemetrySource>,
        ids: Vec<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        window: TimeDelta,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source,
            ids,
            cursor: start,
            end,
            window: window.max(TimeDelta::seconds(1)),
            retry,
            failed: BTreeSet::new(),
            last_error: None,
        }
    }

    /// Next window of points sorted by `(timestamp, point_id)`, or `None`
    /// once the range is exhausted.
    pub(crate) async fn next_chunk(&mut self) -> Option<Chunk> {
        if self.cursor >= self.end || self.ids.is_empty() {
            return None;
        }
        let start = self.cursor;
        let end = (start + self.window).min(self.end);
        self.cursor = end;

        let mut points = match retry(&self.retry, "telemetry query", || {
            self.source.query(&self.ids, start, end)
        })
        .await
        {
            Ok(points) => points,
            Err(e) => {
                fr_warn!(conn,
                    ids = self.ids.len(),
                    start = %start,
                    end = %end,
                    error = %e,
                    "telemetry window query failed, falling back to per-id queries"
                );
                self.last_error = Some(e.to_string());
                self.query_each(start, end).await
            }
        };

        let failed = &self.failed;
        points.retain(|p| p.timestamp >= start && p.timestamp < end && !failed.contains(&p.point_id));
        points.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.point_id.cmp(&b.point_id))
        });
        Some(points)
    }

    async fn query_each(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<TelemetryPoint> {
        let mut points = Vec::new();
        for id in &self.ids {
            let one = std::slice::from_ref(id);
            match retry(&self.retry, "telemetry query", || self.source.query(one, start, end)).await {
                Ok(mut p) => points.append(&mut p),
                Err(e) => {
                    fr_warn!(conn, point = %id, error = %e, "telemetry query failed, identifier skipped");
                    self.failed.insert(id.clone());
                }
            }
        }
        // a later window would resume the identifier with a silent gap
        let failed = &self.failed;
        self.ids.retain(|id| !failed.contains(id));
        points
    }
}

/// Live input: whatever the caller pushes, in arrival order.
pub(crate) struct StreamFeed {
    rx: mpsc::Receiver<TelemetryPoint>,
    cancel: CancellationToken,
}

impl StreamFeed {
    pub(crate) fn new(rx: mpsc::Receiver<TelemetryPoint>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Up to `STREAM_CHUNK` buffered points. `None` when the sender side is
    /// gone or the pass is cancelled.
    pub(crate) async fn next_chunk(&mut self) -> Option<Chunk> {
        let mut chunk = Vec::with_capacity(STREAM_CHUNK);
        tokio::select! {
            n = self.rx.recv_many(&mut chunk, STREAM_CHUNK) => (n > 0).then_some(chunk),
            _ = self.cancel.cancelled() => None,
        }
    }
}

pub(crate) enum Feed {
    Batch(BatchFeed),
    Stream(StreamFeed),
}

impl Feed {
    pub(crate) async fn next_chunk(&mut self) -> Option<Chunk> {
        match self {
            Feed::Batch(f) => f.next_chunk().await,
            Feed::Stream(f) => f.next_chunk().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use fr_core::error::{CoreReason, CoreResult};
    use fr_core::memory::MemoryTelemetry;
    use orion_error::StructError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ts(s: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + s, 0).unwrap()
    }

    #[tokio::test]
    async fn windows_cover_range_and_sort() {
        let src = Arc::new(MemoryTelemetry::new(vec![
            TelemetryPoint::new("b", ts(1), 1.0),
            TelemetryPoint::new("a", ts(1), 1.0),
            TelemetryPoint::new("a", ts(0), 0.0),
            TelemetryPoint::new("a", ts(15), 2.0),
            TelemetryPoint::new("a", ts(20), 3.0),
        ]));
        let mut feed = BatchFeed::new(
            src,
            vec!["a".into(), "b".into()],
            ts(0),
            ts(20),
            TimeDelta::seconds(10),
            RetryPolicy::none(),
        );
        let first = feed.next_chunk().await.unwrap();
        let order: Vec<(&str, DateTime<Utc>)> =
            first.iter().map(|p| (p.point_id.as_str(), p.timestamp)).collect();
        assert_eq!(order, vec![("a", ts(0)), ("a", ts(1)), ("b", ts(1))]);
        assert_eq!(feed.next_chunk().await.unwrap().len(), 1);
        assert!(feed.next_chunk().await.is_none(), "end is exclusive");
    }

    /// Fails any query naming `bad`.
    struct Partial {
        inner: MemoryTelemetry,
        calls: AtomicU32,
    }

    #[async_trait]
    impl TelemetrySource for Partial {
        async fn query(
            &self,
            ids: &[String],
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> CoreResult<Vec<TelemetryPoint>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if ids.iter().any(|id| id == "bad") {
                return Err(StructError::from(CoreReason::Dependency)
                    .with_detail("partition offline".to_string()));
            }
            self.inner.query(ids, start, end).await
        }
    }

    #[tokio::test]
    async fn failing_identifier_is_skipped_only() {
        let src = Arc::new(Partial {
            inner: MemoryTelemetry::new(vec![TelemetryPoint::new("good", ts(1), 1.0)]),
            calls: AtomicU32::new(0),
        });
        let mut feed = BatchFeed::new(
            src.clone(),
            vec!["bad".into(), "good".into()],
            ts(0),
            ts(10),
            TimeDelta::seconds(10),
            RetryPolicy::none(),
        );
        let chunk = feed.next_chunk().await.unwrap();
        assert_eq!(chunk.len(), 1);
        assert_eq!(feed.failed.iter().collect::<Vec<_>>(), vec!["bad"]);
        assert!(feed.last_error.is_some());
        // one window query plus one per id
        assert_eq!(src.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_identifier_stays_out_of_later_windows() {
        let src = Arc::new(Partial {
            inner: MemoryTelemetry::new(vec![
                TelemetryPoint::new("good", ts(1), 1.0),
                TelemetryPoint::new("good", ts(11), 2.0),
            ]),
            calls: AtomicU32::new(0),
        });
        let mut feed = BatchFeed::new(
            src.clone(),
            vec!["bad".into(), "good".into()],
            ts(0),
            ts(20),
            TimeDelta::seconds(10),
            RetryPolicy::none(),
        );
        assert_eq!(feed.next_chunk().await.unwrap().len(), 1);
        assert_eq!(src.calls.load(Ordering::SeqCst), 3);

        let second = feed.next_chunk().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].point_id, "good");
        // a single window query over the remaining id
        assert_eq!(src.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn stream_ends_when_sender_drops() {
        let (tx, rx) = mpsc::channel(8);
        let mut feed = StreamFeed::new(rx, CancellationToken::new());
        tx.send(TelemetryPoint::new("a", ts(0), true)).await.unwrap();
        tx.send(TelemetryPoint::new("a", ts(1), false)).await.unwrap();
        drop(tx);
        assert_eq!(feed.next_chunk().await.unwrap().len(), 2);
        assert!(feed.next_chunk().await.is_none());
    }
}
