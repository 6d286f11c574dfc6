use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;

use fr_core::insight::{Insight, Occurrence};
use fr_core::model::TelemetryPoint;

use crate::oracle::Timelines;

/// One line of an expected-timelines file.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TimelineRecord {
    pub rule_instance_id: String,
    pub occurrences: Vec<Occurrence>,
}

fn write_lines<T: Serialize>(items: impl IntoIterator<Item = T>, output_path: &Path) -> anyhow::Result<usize> {
    // Create parent directories if needed
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(output_path)?;
    let mut writer = BufWriter::new(file);
    let mut written = 0usize;
    for item in items {
        let line = serde_json::to_string(&item)?;
        writeln!(writer, "{}", line)?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

fn read_lines<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut out = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(&line)
            .with_context(|| format!("{} line {}", path.display(), idx + 1))?;
        out.push(item);
    }
    Ok(out)
}

/// Write telemetry as JSONL, one point per line.
pub fn write_points_jsonl(points: &[TelemetryPoint], output_path: &Path) -> anyhow::Result<usize> {
    write_lines(points, output_path)
}

pub fn read_points_jsonl(path: &Path) -> anyhow::Result<Vec<TelemetryPoint>> {
    read_lines(path)
}

/// Write expected timelines, one instance per line.
pub fn write_timelines_jsonl(timelines: &Timelines, output_path: &Path) -> anyhow::Result<usize> {
    write_lines(
        timelines.iter().map(|(id, occurrences)| TimelineRecord {
            rule_instance_id: id.clone(),
            occurrences: occurrences.clone(),
        }),
        output_path,
    )
}

pub fn read_timelines_jsonl(path: &Path) -> anyhow::Result<Timelines> {
    let records: Vec<TimelineRecord> = read_lines(path)?;
    Ok(records
        .into_iter()
        .map(|r| (r.rule_instance_id, r.occurrences))
        .collect())
}

/// Read an insight output file as written by the runtime's JSONL sink.
pub fn read_insights_jsonl(path: &Path) -> anyhow::Result<Vec<Insight>> {
    read_lines(path)
}
