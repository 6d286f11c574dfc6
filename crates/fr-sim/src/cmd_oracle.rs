use std::path::PathBuf;

use fr_core::actor::ActorSettings;
use fr_sim::oracle::{SimWindow, bind, simulate};
use fr_sim::output::jsonl::{read_points_jsonl, write_timelines_jsonl};

use crate::cmd_helpers::{load_config, load_ontology, load_rules, parse_time};

#[allow(clippy::too_many_arguments)]
pub(crate) fn run(
    ontology: PathBuf,
    rules: Vec<PathBuf>,
    telemetry: Vec<PathBuf>,
    config: Option<PathBuf>,
    start: String,
    end: String,
    all: bool,
    out: PathBuf,
) -> anyhow::Result<()> {
    let window = SimWindow::new(parse_time(&start, "--start")?, parse_time(&end, "--end")?);
    if window.start >= window.end {
        anyhow::bail!("--start must be before --end");
    }

    let config = load_config(config.as_deref())?;
    let snapshot = load_ontology(&ontology)?;
    let rules = load_rules(&rules)?;
    let (instances, failures) = bind(&snapshot, &rules, config.execution.max_binding_depth);
    if !failures.is_empty() {
        eprintln!("{} equipment could not be bound", failures.len());
    }

    let mut points = Vec::new();
    for path in &telemetry {
        points.extend(read_points_jsonl(path)?);
    }

    let settings = ActorSettings::from_config(&config.execution);
    let result = simulate(&rules, &instances, &points, window, &settings);
    let timelines = if all { result.timelines.clone() } else { result.reported() };
    let written = write_timelines_jsonl(&timelines, &out)?;
    println!(
        "Replayed {} points over {} instances: {} timelines, {} insights, {} commands -> {}",
        result.points_applied,
        instances.len(),
        written,
        result.insights.len(),
        result.commands.len(),
        out.display()
    );
    Ok(())
}
