use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use fr_config::MetricsConfig;
use fr_core::ports::PassMode;
use fr_core::timeseries::EvictReport;

const DEFAULT_HISTOGRAM_BUCKETS_SECONDS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

const MODES: [PassMode; 3] = [PassMode::Realtime, PassMode::Batch, PassMode::Stream];

pub(crate) fn mode_label(mode: PassMode) -> &'static str {
    match mode {
        PassMode::Realtime => "realtime",
        PassMode::Batch => "batch",
        PassMode::Stream => "stream",
    }
}

/// Which sink queue a counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Insights,
    Commands,
}

impl SinkKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Insights => "insights",
            Self::Commands => "commands",
        }
    }
}

/// Fixed-bucket histogram; each observation lands in exactly one bucket.
struct Histogram {
    upper_bounds_nanos: Vec<u64>,
    bucket_counts: Vec<AtomicU64>,
    sum_nanos: AtomicU64,
}

impl Histogram {
    fn from_seconds_bounds(bounds: &[f64]) -> Self {
        let upper_bounds_nanos: Vec<u64> = bounds
            .iter()
            .map(|sec| (*sec * 1_000_000_000.0) as u64)
            .collect();
        let bucket_counts = (0..=upper_bounds_nanos.len())
            .map(|_| AtomicU64::new(0))
            .collect();
        Self {
            upper_bounds_nanos,
            bucket_counts,
            sum_nanos: AtomicU64::new(0),
        }
    }

    fn observe(&self, elapsed: Duration) {
        let nanos = elapsed.as_nanos().min(u64::MAX as u128) as u64;
        self.sum_nanos.fetch_add(nanos, Ordering::Relaxed);
        let idx = self
            .upper_bounds_nanos
            .iter()
            .position(|bound| nanos <= *bound)
            .unwrap_or(self.upper_bounds_nanos.len());
        self.bucket_counts[idx].fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct SinkCounters {
    records: AtomicU64,
    batches: AtomicU64,
    write_failed: AtomicU64,
}

/// Shared runtime metrics.
///
/// Counters are atomics; label sets (pass mode, sink) are fixed at
/// construction so the hot path never allocates.
pub struct RuntimeMetrics {
    points_ingested_total: AtomicU64,
    points_dropped_late_total: AtomicU64,
    points_malformed_total: AtomicU64,
    transitions_total: AtomicU64,
    faults_entered_total: AtomicU64,
    source_query_failed_total: AtomicU64,

    passes_total: BTreeMap<&'static str, AtomicU64>,
    pass_seconds: BTreeMap<&'static str, Histogram>,

    sinks: BTreeMap<&'static str, SinkCounters>,

    evictor_sweeps_total: AtomicU64,
    evictor_values_evicted_total: AtomicU64,

    rule_instances: AtomicU64,
    actors: AtomicU64,
    points_tracked: AtomicU64,
}

impl Default for RuntimeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self {
            points_ingested_total: AtomicU64::new(0),
            points_dropped_late_total: AtomicU64::new(0),
            points_malformed_total: AtomicU64::new(0),
            transitions_total: AtomicU64::new(0),
            faults_entered_total: AtomicU64::new(0),
            source_query_failed_total: AtomicU64::new(0),
            passes_total: MODES
                .iter()
                .map(|m| (mode_label(*m), AtomicU64::new(0)))
                .collect(),
            pass_seconds: MODES
                .iter()
                .map(|m| {
                    (
                        mode_label(*m),
                        Histogram::from_seconds_bounds(DEFAULT_HISTOGRAM_BUCKETS_SECONDS),
                    )
                })
                .collect(),
            sinks: [SinkKind::Insights, SinkKind::Commands]
                .iter()
                .map(|k| (k.label(), SinkCounters::default()))
                .collect(),
            evictor_sweeps_total: AtomicU64::new(0),
            evictor_values_evicted_total: AtomicU64::new(0),
            rule_instances: AtomicU64::new(0),
            actors: AtomicU64::new(0),
            points_tracked: AtomicU64::new(0),
        }
    }

    pub fn add_points(&self, ingested: u64, dropped_late: u64, malformed: u64) {
        self.points_ingested_total
            .fetch_add(ingested, Ordering::Relaxed);
        self.points_dropped_late_total
            .fetch_add(dropped_late, Ordering::Relaxed);
        self.points_malformed_total
            .fetch_add(malformed, Ordering::Relaxed);
    }

    pub fn add_transitions(&self, transitions: u64, faults_entered: u64) {
        self.transitions_total
            .fetch_add(transitions, Ordering::Relaxed);
        self.faults_entered_total
            .fetch_add(faults_entered, Ordering::Relaxed);
    }

    pub fn inc_source_query_failed(&self) {
        self.source_query_failed_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_pass(&self, mode: PassMode, elapsed: Duration) {
        let label = mode_label(mode);
        if let Some(v) = self.passes_total.get(label) {
            v.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(h) = self.pass_seconds.get(label) {
            h.observe(elapsed);
        }
    }

    pub fn add_sink_batch(&self, sink: SinkKind, records: usize) {
        if let Some(c) = self.sinks.get(sink.label()) {
            c.batches.fetch_add(1, Ordering::Relaxed);
            c.records.fetch_add(records as u64, Ordering::Relaxed);
        }
    }

    pub fn inc_sink_write_failed(&self, sink: SinkKind) {
        if let Some(c) = self.sinks.get(sink.label()) {
            c.write_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn add_evict_report(&self, report: &EvictReport) {
        self.evictor_sweeps_total.fetch_add(1, Ordering::Relaxed);
        self.evictor_values_evicted_total
            .fetch_add(report.values_evicted as u64, Ordering::Relaxed);
    }

    /// Gauges sampled by the maintenance sweep, off the hot path.
    pub fn set_sizes(&self, rule_instances: usize, actors: usize, points: usize) {
        self.rule_instances
            .store(rule_instances as u64, Ordering::Relaxed);
        self.actors.store(actors as u64, Ordering::Relaxed);
        self.points_tracked.store(points as u64, Ordering::Relaxed);
    }

    pub(crate) fn render_prometheus(&self) -> String {
        let mut out = String::with_capacity(8 * 1024);
        let mut types = BTreeSet::new();
        let load = |v: &AtomicU64| v.load(Ordering::Relaxed);

        for (name, value) in [
            ("fr_points_ingested_total", &self.points_ingested_total),
            ("fr_points_dropped_late_total", &self.points_dropped_late_total),
            ("fr_points_malformed_total", &self.points_malformed_total),
            ("fr_transitions_total", &self.transitions_total),
            ("fr_faults_entered_total", &self.faults_entered_total),
            ("fr_source_query_failed_total", &self.source_query_failed_total),
            ("fr_evictor_sweeps_total", &self.evictor_sweeps_total),
            ("fr_evictor_values_evicted_total", &self.evictor_values_evicted_total),
        ] {
            render_sample(&mut out, &mut types, name, "counter", &[], load(value));
        }

        for (mode, value) in &self.passes_total {
            render_sample(
                &mut out,
                &mut types,
                "fr_passes_total",
                "counter",
                &[("mode", *mode)],
                load(value),
            );
        }
        for (mode, hist) in &self.pass_seconds {
            render_histogram(&mut out, &mut types, "fr_pass_seconds", &[("mode", *mode)], hist);
        }

        for (sink, c) in &self.sinks {
            let labels = [("sink", *sink)];
            for (name, value) in [
                ("fr_sink_records_total", &c.records),
                ("fr_sink_batches_total", &c.batches),
                ("fr_sink_write_failed_total", &c.write_failed),
            ] {
                render_sample(&mut out, &mut types, name, "counter", &labels, load(value));
            }
        }

        for (name, value) in [
            ("fr_rule_instances", &self.rule_instances),
            ("fr_actors", &self.actors),
            ("fr_points_tracked", &self.points_tracked),
        ] {
            render_sample(&mut out, &mut types, name, "gauge", &[], load(value));
        }
        out
    }

    pub(crate) fn summary_line(&self) -> String {
        let sink_records = |kind: SinkKind| {
            self.sinks
                .get(kind.label())
                .map_or(0, |c| c.records.load(Ordering::Relaxed))
        };
        format!(
            "points={} dropped_late={} transitions={} insights={} commands={} actors={} passes={}",
            self.points_ingested_total.load(Ordering::Relaxed),
            self.points_dropped_late_total.load(Ordering::Relaxed),
            self.transitions_total.load(Ordering::Relaxed),
            sink_records(SinkKind::Insights),
            sink_records(SinkKind::Commands),
            self.actors.load(Ordering::Relaxed),
            self.passes_total
                .values()
                .map(|v| v.load(Ordering::Relaxed))
                .sum::<u64>(),
        )
    }
}

fn render_type_once(out: &mut String, types: &mut BTreeSet<String>, name: &str, kind: &str) {
    if types.insert(name.to_string()) {
        let _ = writeln!(out, "# TYPE {name} {kind}");
    }
}

fn render_sample(
    out: &mut String,
    types: &mut BTreeSet<String>,
    name: &str,
    kind: &str,
    labels: &[(&str, &str)],
    value: u64,
) {
    render_type_once(out, types, name, kind);
    let _ = writeln!(out, "{name}{} {value}", format_labels(labels));
}

fn render_histogram(
    out: &mut String,
    types: &mut BTreeSet<String>,
    name: &str,
    labels: &[(&str, &str)],
    histogram: &Histogram,
) {
    render_type_once(out, types, name, "histogram");
    let mut cumulative = 0u64;
    for (idx, bound) in histogram.upper_bounds_nanos.iter().enumerate() {
        cumulative =
            cumulative.saturating_add(histogram.bucket_counts[idx].load(Ordering::Relaxed));
        let le = format!("{:.6}", *bound as f64 / 1_000_000_000.0);
        let mut all = labels.to_vec();
        all.push(("le", le.as_str()));
        let _ = writeln!(out, "{name}_bucket{} {cumulative}", format_labels(&all));
    }
    // +Inf bucket is the last slot
    if let Some(last) = histogram.bucket_counts.last() {
        cumulative = cumulative.saturating_add(last.load(Ordering::Relaxed));
    }
    let mut all = labels.to_vec();
    all.push(("le", "+Inf"));
    let _ = writeln!(out, "{name}_bucket{} {cumulative}", format_labels(&all));
    let sum = histogram.sum_nanos.load(Ordering::Relaxed) as f64 / 1_000_000_000.0;
    let _ = writeln!(out, "{name}_sum{} {sum}", format_labels(labels));
    let _ = writeln!(out, "{name}_count{} {cumulative}", format_labels(labels));
}

fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let mut out = String::from("{");
    for (idx, (key, value)) in labels.iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        out.push_str(key);
        out.push_str("=\"");
        for ch in value.chars() {
            match ch {
                '\\' => out.push_str("\\\\"),
                '"' => out.push_str("\\\""),
                '\n' => out.push_str("\\n"),
                _ => out.push(ch),
            }
        }
        out.push('"');
    }
    out.push('}');
    out
}

// ---------------------------------------------------------------------------
// Exporter task
// ---------------------------------------------------------------------------

/// Serve `GET /metrics` and log a summary line every `report_interval`.
#[tracing::instrument(name = "metrics", skip_all)]
pub async fn run_metrics_task(
    metrics: Arc<RuntimeMetrics>,
    config: MetricsConfig,
    listener: TcpListener,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    fr_info!(
        sys,
        listen = %config.prometheus_listen,
        interval = %config.report_interval,
        "metrics exporter started"
    );

    let mut tick = tokio::time::interval(config.report_interval.as_duration());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                fr_info!(res, summary = %metrics.summary_line(), "metrics snapshot");
            }
            result = listener.accept() => {
                let (stream, _) = result?;
                let metrics = Arc::clone(&metrics);
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, metrics).await {
                        fr_debug!(sys, error = %e, "metrics connection handling failed");
                    }
                });
            }
        }
    }
    Ok(())
}

async fn serve_connection(mut stream: TcpStream, metrics: Arc<RuntimeMetrics>) -> anyhow::Result<()> {
    let mut req_buf = [0u8; 512];
    let n = match timeout(Duration::from_secs(2), stream.read(&mut req_buf)).await {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Ok(()),
    };
    let is_metrics = std::str::from_utf8(&req_buf[..n])
        .map(|req| req.starts_with("GET /metrics"))
        .unwrap_or(false);

    let response = if is_metrics {
        let body = metrics.render_prometheus();
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    } else {
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
    };
    timeout(Duration::from_secs(2), stream.write_all(response.as_bytes())).await??;
    let _ = timeout(Duration::from_secs(1), stream.shutdown()).await;
    Ok(())
}

pub fn maybe_build_metrics(config: &MetricsConfig) -> Option<Arc<RuntimeMetrics>> {
    config.enabled.then(|| Arc::new(RuntimeMetrics::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_line_rendered_once_per_family() {
        let metrics = RuntimeMetrics::new();
        let text = metrics.render_prometheus();
        assert_eq!(text.matches("# TYPE fr_passes_total counter").count(), 1);
        assert_eq!(text.matches("# TYPE fr_sink_records_total counter").count(), 1);
        assert_eq!(text.matches("# TYPE fr_pass_seconds histogram").count(), 1);
        assert!(text.contains("fr_passes_total{mode=\"batch\"} 0"));
    }

    #[test]
    fn histogram_count_matches_inf_bucket() {
        let metrics = RuntimeMetrics::new();
        metrics.observe_pass(PassMode::Batch, Duration::from_millis(3));
        metrics.observe_pass(PassMode::Batch, Duration::from_secs(120));
        let text = metrics.render_prometheus();
        assert!(text.contains("fr_pass_seconds_bucket{mode=\"batch\",le=\"+Inf\"} 2"));
        assert!(text.contains("fr_pass_seconds_count{mode=\"batch\"} 2"));
        assert!(text.contains("fr_passes_total{mode=\"batch\"} 2"));
    }

    #[test]
    fn sink_counters_and_summary() {
        let metrics = RuntimeMetrics::new();
        metrics.add_sink_batch(SinkKind::Insights, 5);
        metrics.inc_sink_write_failed(SinkKind::Commands);
        metrics.add_points(10, 2, 1);
        let text = metrics.render_prometheus();
        assert!(text.contains("fr_sink_records_total{sink=\"insights\"} 5"));
        assert!(text.contains("fr_sink_write_failed_total{sink=\"commands\"} 1"));
        assert!(metrics.summary_line().starts_with("points=10 dropped_late=2"));
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(format_labels(&[("k", "a\"b")]), "{k=\"a\\\"b\"}");
    }
}
