use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod cmd_gen;
mod cmd_helpers;
mod cmd_oracle;
mod cmd_verify;

#[derive(Parser)]
#[command(name = "fr-sim", about = "Fault reactor simulation oracle and data generator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate seeded telemetry for every point the rules bind
    Gen {
        /// Ontology snapshot (JSON)
        #[arg(long)]
        ontology: PathBuf,

        /// Rule definition files (JSON, one rule or an array)
        #[arg(long, required = true)]
        rules: Vec<PathBuf>,

        /// Engine config supplying `execution.max_binding_depth`
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// First sample time (RFC 3339)
        #[arg(long)]
        start: String,

        /// Sample spacing, e.g. "30s", "1m"
        #[arg(long, default_value = "1m")]
        interval: String,

        /// Samples per point
        #[arg(long, default_value_t = 60)]
        samples: usize,

        /// Probability that a sample is skipped
        #[arg(long, default_value_t = 0.0)]
        gap_ratio: f64,

        /// Largest in-slot offset as a fraction of the interval
        #[arg(long, default_value_t = 0.0)]
        jitter: f64,

        /// Output format: "jsonl" or "arrow" ("arrow-ipc"/"ipc" aliases)
        #[arg(long, default_value = "jsonl")]
        format: String,

        /// Output directory
        #[arg(long)]
        out: PathBuf,
    },
    /// Replay telemetry on reference actors and write expected timelines
    Oracle {
        /// Ontology snapshot (JSON)
        #[arg(long)]
        ontology: PathBuf,

        /// Rule definition files (JSON, one rule or an array)
        #[arg(long, required = true)]
        rules: Vec<PathBuf>,

        /// Telemetry files (JSONL)
        #[arg(long, required = true)]
        telemetry: Vec<PathBuf>,

        /// Engine config supplying the execution limits
        #[arg(long)]
        config: Option<PathBuf>,

        /// Window start, inclusive (RFC 3339)
        #[arg(long)]
        start: String,

        /// Window end, exclusive (RFC 3339)
        #[arg(long)]
        end: String,

        /// Include instances that never changed output
        #[arg(long)]
        all: bool,

        /// Expected timelines file (JSONL)
        #[arg(long)]
        out: PathBuf,
    },
    /// Verify insight output against oracle expectations
    Verify {
        /// Expected timelines file written by `oracle`
        #[arg(long)]
        expected: PathBuf,

        /// Insights JSONL file written by the engine
        #[arg(long)]
        actual: PathBuf,

        /// Output format: "json" or "markdown" (default: json)
        #[arg(long, default_value = "json")]
        format: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Gen {
            ontology,
            rules,
            config,
            seed,
            start,
            interval,
            samples,
            gap_ratio,
            jitter,
            format,
            out,
        } => cmd_gen::run(cmd_gen::GenArgs {
            ontology,
            rules,
            config,
            seed,
            start,
            interval,
            samples,
            gap_ratio,
            jitter,
            format,
            out,
        }),
        Commands::Oracle {
            ontology,
            rules,
            telemetry,
            config,
            start,
            end,
            all,
            out,
        } => cmd_oracle::run(ontology, rules, telemetry, config, start, end, all, out),
        Commands::Verify {
            expected,
            actual,
            format,
        } => cmd_verify::run(expected, actual, format),
    }
}
