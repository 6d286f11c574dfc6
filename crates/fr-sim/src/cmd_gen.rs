use std::path::PathBuf;

use anyhow::Context;
use chrono::TimeDelta;

use fr_config::HumanDuration;
use fr_sim::datagen::{GenOptions, generate, signals_for};
use fr_sim::oracle::bind;
use fr_sim::output::arrow_ipc::write_points_arrow;
use fr_sim::output::jsonl::write_points_jsonl;

use crate::cmd_helpers::{load_config, load_ontology, load_rules, parse_time};

pub(crate) struct GenArgs {
    pub ontology: PathBuf,
    pub rules: Vec<PathBuf>,
    pub config: Option<PathBuf>,
    pub seed: u64,
    pub start: String,
    pub interval: String,
    pub samples: usize,
    pub gap_ratio: f64,
    pub jitter: f64,
    pub format: String,
    pub out: PathBuf,
}

pub(crate) fn run(args: GenArgs) -> anyhow::Result<()> {
    let normalized_format = match args.format.as_str() {
        "jsonl" => "jsonl",
        "arrow" | "arrow-ipc" | "ipc" => "arrow",
        _ => anyhow::bail!(
            "unsupported format: '{}'. Supported: 'jsonl', 'arrow' ('arrow-ipc' alias).",
            args.format
        ),
    };

    let config = load_config(args.config.as_deref())?;
    let snapshot = load_ontology(&args.ontology)?;
    let rules = load_rules(&args.rules)?;
    let (instances, failures) = bind(&snapshot, &rules, config.execution.max_binding_depth);
    for f in &failures {
        eprintln!(
            "bind failure: rule {} equipment {} parameter {}: {}",
            f.rule_id, f.equipment_id, f.parameter, f.reason
        );
    }
    let signals = signals_for(&rules, &instances);
    if signals.is_empty() {
        anyhow::bail!("no bound points to generate telemetry for");
    }

    let interval: HumanDuration = args.interval.parse().context("parsing --interval")?;
    let opts = GenOptions {
        seed: args.seed,
        start: parse_time(&args.start, "--start")?,
        interval: TimeDelta::from_std(interval.as_duration()).context("--interval out of range")?,
        samples: args.samples,
        gap_ratio: args.gap_ratio,
        jitter: args.jitter,
    };
    let result = generate(&signals, &opts)?;

    let output_file = match normalized_format {
        "arrow" => {
            let path = args.out.join("telemetry.arrow");
            write_points_arrow(&result.points, &path)?;
            path
        }
        _ => {
            let path = args.out.join("telemetry.jsonl");
            write_points_jsonl(&result.points, &path)?;
            path
        }
    };
    println!(
        "Generated {} points for {} signals ({} gaps, {} .. {}) -> {}",
        result.points.len(),
        signals.len(),
        result.gaps,
        opts.start.to_rfc3339(),
        opts.end().to_rfc3339(),
        output_file.display()
    );
    Ok(())
}
