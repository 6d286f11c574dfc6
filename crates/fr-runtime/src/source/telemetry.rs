use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray,
    TimestampMillisecondArray, TimestampNanosecondArray,
};
use arrow::datatypes::{DataType, TimeUnit};
use arrow::ipc::reader::FileReader;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orion_error::prelude::*;

use fr_core::error::{CoreReason, CoreResult};
use fr_core::model::{TelemetryPoint, Value};
use fr_core::ports::TelemetrySource;

fn format_error(path: &Path, what: impl std::fmt::Display) -> StructError<CoreReason> {
    StructError::from(CoreReason::DataFormat).with_detail(format!("{}: {what}", path.display()))
}

fn io_error(path: &Path, e: std::io::Error) -> StructError<CoreReason> {
    StructError::from(CoreReason::Dependency).with_detail(format!("{}: {e}", path.display()))
}

// ---------------------------------------------------------------------------
// JSON Lines
// ---------------------------------------------------------------------------

/// One `{"point_id", "timestamp", "value"}` object per line. Blank lines
/// are skipped.
pub fn read_jsonl(path: &Path) -> CoreResult<Vec<TelemetryPoint>> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    let mut points = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| io_error(path, e))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let point: TelemetryPoint = serde_json::from_str(line)
            .map_err(|e| format_error(path, format!("line {}: {e}", idx + 1)))?;
        points.push(point);
    }
    Ok(points)
}

// ---------------------------------------------------------------------------
// Arrow IPC
// ---------------------------------------------------------------------------

/// Arrow IPC file with columns `point_id` (Utf8), `timestamp` (timestamp in
/// ns or ms, or RFC 3339 Utf8) and `value` (Float64, Int64, Boolean or
/// Utf8). Rows with a null in any of the three columns are skipped.
pub fn read_arrow_ipc(path: &Path) -> CoreResult<Vec<TelemetryPoint>> {
    let file = File::open(path).map_err(|e| io_error(path, e))?;
    let reader = FileReader::try_new(file, None).map_err(|e| format_error(path, e))?;
    let mut points = Vec::new();
    let mut skipped = 0usize;
    for batch in reader {
        let batch = batch.map_err(|e| format_error(path, e))?;
        skipped += decode_batch(&batch, &mut points).map_err(|e| format_error(path, e))?;
    }
    if skipped > 0 {
        fr_warn!(conn, file = %path.display(), rows = skipped, "null telemetry rows skipped");
    }
    Ok(points)
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef, String> {
    batch
        .column_by_name(name)
        .ok_or_else(|| format!("missing column {name:?}"))
}

fn downcast<'a, T: 'static>(col: &'a ArrayRef, name: &str) -> Result<&'a T, String> {
    col.as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| format!("column {name:?} has unexpected type {}", col.data_type()))
}

fn decode_batch(batch: &RecordBatch, out: &mut Vec<TelemetryPoint>) -> Result<usize, String> {
    let ids: &StringArray = downcast(column(batch, "point_id")?, "point_id")?;
    let timestamps = column(batch, "timestamp")?;
    let values = column(batch, "value")?;

    let mut skipped = 0;
    for row in 0..batch.num_rows() {
        if ids.is_null(row) || timestamps.is_null(row) || values.is_null(row) {
            skipped += 1;
            continue;
        }
        out.push(TelemetryPoint {
            point_id: ids.value(row).to_string(),
            timestamp: timestamp_at(timestamps, row)?,
            value: value_at(values, row)?,
        });
    }
    Ok(skipped)
}

fn timestamp_at(col: &ArrayRef, row: usize) -> Result<DateTime<Utc>, String> {
    match col.data_type() {
        DataType::Timestamp(TimeUnit::Nanosecond, _) => {
            let a: &TimestampNanosecondArray = downcast(col, "timestamp")?;
            Ok(DateTime::from_timestamp_nanos(a.value(row)))
        }
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            let a: &TimestampMillisecondArray = downcast(col, "timestamp")?;
            DateTime::from_timestamp_millis(a.value(row))
                .ok_or_else(|| format!("row {row}: timestamp out of range"))
        }
        DataType::Utf8 => {
            let a: &StringArray = downcast(col, "timestamp")?;
            DateTime::parse_from_rfc3339(a.value(row))
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| format!("row {row}: {e}"))
        }
        other => Err(format!("unsupported timestamp column type {other}")),
    }
}

fn value_at(col: &ArrayRef, row: usize) -> Result<Value, String> {
    match col.data_type() {
        DataType::Float64 => Ok(Value::Double(downcast::<Float64Array>(col, "value")?.value(row))),
        DataType::Int64 => Ok(Value::Double(downcast::<Int64Array>(col, "value")?.value(row) as f64)),
        DataType::Boolean => Ok(Value::Bool(downcast::<BooleanArray>(col, "value")?.value(row))),
        DataType::Utf8 => {
            let raw = downcast::<StringArray>(col, "value")?.value(row);
            // JSON-encoded scalars first, the raw text otherwise
            Ok(serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::Text(raw.to_string())))
        }
        other => Err(format!("unsupported value column type {other}")),
    }
}

/// Pick the reader by extension: `.jsonl`/`.ndjson`/`.json` or
/// `.arrow`/`.ipc`.
pub fn read_telemetry_file(path: &Path) -> CoreResult<Vec<TelemetryPoint>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("jsonl" | "ndjson" | "json") => read_jsonl(path),
        Some("arrow" | "ipc") => read_arrow_ipc(path),
        _ => Err(format_error(path, "unknown telemetry file extension")),
    }
}

// ---------------------------------------------------------------------------
// FileTelemetry
// ---------------------------------------------------------------------------

/// Telemetry replayed from files, indexed by point and sorted by time.
#[derive(Debug, Default)]
pub struct FileTelemetry {
    series: HashMap<String, Vec<TelemetryPoint>>,
    total: usize,
}

impl FileTelemetry {
    pub fn load(paths: &[PathBuf]) -> CoreResult<Self> {
        let mut points = Vec::new();
        for path in paths {
            let before = points.len();
            points.extend(read_telemetry_file(path)?);
            fr_debug!(conn, file = %path.display(), points = points.len() - before, "telemetry file read");
        }
        Ok(Self::from_points(points))
    }

    pub fn from_points(points: Vec<TelemetryPoint>) -> Self {
        let total = points.len();
        let mut series: HashMap<String, Vec<TelemetryPoint>> = HashMap::new();
        for p in points {
            series.entry(p.point_id.clone()).or_default().push(p);
        }
        for list in series.values_mut() {
            list.sort_by_key(|p| p.timestamp);
        }
        Self { series, total }
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Earliest and latest timestamp held.
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.series.values().filter_map(|s| s.first()).map(|p| p.timestamp).min()?;
        let last = self.series.values().filter_map(|s| s.last()).map(|p| p.timestamp).max()?;
        Some((first, last))
    }
}

#[async_trait]
impl TelemetrySource for FileTelemetry {
    async fn query(
        &self,
        ids: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<TelemetryPoint>> {
        let mut out = Vec::new();
        for id in ids {
            let Some(list) = self.series.get(id) else {
                continue;
            };
            let lo = list.partition_point(|p| p.timestamp < start);
            let hi = list.partition_point(|p| p.timestamp < end);
            out.extend_from_slice(&list[lo..hi.max(lo)]);
        }
        Ok(out)
    }
}
