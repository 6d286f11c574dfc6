use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::writer::FileWriter;

use fr_core::model::TelemetryPoint;

/// Write telemetry as an Arrow IPC file.
///
/// Columns are `point_id`, `timestamp` (RFC 3339) and `value`
/// (JSON-encoded), all UTF-8, which the runtime's replay reader accepts.
pub fn write_points_arrow(points: &[TelemetryPoint], output_path: &Path) -> anyhow::Result<usize> {
    if points.is_empty() {
        anyhow::bail!("no points to write");
    }

    // Create parent directories if needed
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let schema = Arc::new(Schema::new(vec![
        Field::new("point_id", DataType::Utf8, false),
        Field::new("timestamp", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, false),
    ]));

    let ids = StringArray::from_iter_values(points.iter().map(|p| p.point_id.as_str()));
    let timestamps = StringArray::from_iter_values(points.iter().map(|p| p.timestamp.to_rfc3339()));
    let values = points
        .iter()
        .map(|p| serde_json::to_string(&p.value))
        .collect::<Result<Vec<_>, _>>()?;
    let columns: Vec<ArrayRef> = vec![
        Arc::new(ids),
        Arc::new(timestamps),
        Arc::new(StringArray::from(values)),
    ];

    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    let file = File::create(output_path)?;
    let mut writer = FileWriter::try_new(file, &schema)?;
    writer.write(&batch)?;
    writer.finish()?;

    Ok(points.len())
}
