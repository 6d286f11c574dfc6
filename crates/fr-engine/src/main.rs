use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use fr_config::{EngineConfig, HumanDuration};
use fr_core::model::ExecutionRequest;
use fr_runtime::lifecycle::{RulesHost, wait_for_signal};
use fr_runtime::tracing_init::init_tracing;

#[derive(Parser)]
#[command(name = "fault-reactor", about = "Fault detection rules engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine and run until interrupted
    Run {
        /// Path to fault-reactor.toml config file
        #[arg(short, long)]
        config: PathBuf,
        /// Enable runtime metrics and periodic snapshot output
        #[arg(long)]
        metrics: bool,
        /// Override metrics report interval (e.g. "2s", "30s", "1m")
        #[arg(long)]
        metrics_interval: Option<String>,
        /// Override metrics listen address for /metrics endpoint
        #[arg(long)]
        metrics_listen: Option<String>,
    },
    /// Rebind rule instances against the ontology and persist the result
    Rebuild {
        /// Path to fault-reactor.toml config file
        #[arg(short, long)]
        config: PathBuf,
        /// Rebuild one rule only
        #[arg(long)]
        rule: Option<String>,
    },
    /// Process a historical date range, then persist state and exit
    Backfill {
        /// Path to fault-reactor.toml config file
        #[arg(short, long)]
        config: PathBuf,
        /// Range start, inclusive (RFC 3339)
        #[arg(long)]
        start: String,
        /// Range end, exclusive (RFC 3339)
        #[arg(long)]
        end: String,
        /// Limit the pass to one rule's instances
        #[arg(long)]
        rule: Option<String>,
        /// Regenerate output from `start` instead of continuing
        #[arg(long)]
        reset: bool,
    },
    /// Print point health from the persisted buffers
    Status {
        /// Path to fault-reactor.toml config file
        #[arg(short, long)]
        config: PathBuf,
        /// Point ids to report; every bound point when omitted
        #[arg(long)]
        point: Vec<String>,
    },
}

/// Load the config and resolve the directory its relative paths hang off.
fn load_config(config: &Path) -> Result<(EngineConfig, PathBuf)> {
    let config_path = config
        .canonicalize()
        .map_err(|e| anyhow::anyhow!("config path '{}': {e}", config.display()))?;
    let engine_config = EngineConfig::load(&config_path)?;
    let base_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow::anyhow!("config path '{}' has no parent", config_path.display()))?;
    Ok((engine_config, base_dir))
}

fn parse_time(s: &str, flag: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| anyhow::anyhow!("invalid {flag} '{s}': {e}"))
}

/// One-shot commands run without the live ticker and the exporter.
fn one_shot(mut config: EngineConfig) -> EngineConfig {
    config.runtime.realtime_interval = HumanDuration::from(Duration::ZERO);
    config.metrics.enabled = false;
    config
}

async fn start(config: EngineConfig, base_dir: &Path) -> Result<RulesHost> {
    RulesHost::start(config, base_dir)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))
}

/// Shut down and wait; the host persists state on the way out.
async fn stop(host: RulesHost) -> Result<()> {
    host.shutdown();
    host.wait().await.map_err(|e| anyhow::anyhow!("{e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            metrics,
            metrics_interval,
            metrics_listen,
        } => {
            let (mut engine_config, base_dir) = load_config(&config)?;
            if metrics || metrics_interval.is_some() || metrics_listen.is_some() {
                engine_config.metrics.enabled = true;
            }
            if let Some(interval) = metrics_interval {
                engine_config.metrics.report_interval = HumanDuration::from_str(&interval)
                    .map_err(|e| anyhow::anyhow!("invalid --metrics-interval '{interval}': {e}"))?;
            }
            if let Some(listen) = metrics_listen {
                engine_config.metrics.prometheus_listen = listen;
            }
            let metrics_enabled = engine_config.metrics.enabled;
            let metrics_interval = engine_config.metrics.report_interval;
            let metrics_listen = engine_config.metrics.prometheus_listen.clone();

            let _guard = init_tracing(&engine_config.logging, &base_dir)?;

            let host = start(engine_config, &base_dir).await?;
            let health = host.service().health();
            tracing::info!(
                domain = "sys",
                rules = health.rules,
                instances = health.rule_instances,
                "fault reactor started"
            );
            if metrics_enabled {
                tracing::info!(
                    domain = "res",
                    interval = %metrics_interval,
                    listen = %metrics_listen,
                    "runtime metrics enabled"
                );
            }

            wait_for_signal(host.cancel_token()).await;
            stop(host).await?;
        }
        Commands::Rebuild { config, rule } => {
            let (engine_config, base_dir) = load_config(&config)?;
            let _guard = init_tracing(&engine_config.logging, &base_dir)?;

            let host = start(one_shot(engine_config), &base_dir).await?;
            let outcome = host
                .handle()
                .execute(ExecutionRequest::build_rules(rule), false)
                .await;
            stop(host).await?;
            let outcome = outcome.map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Backfill {
            config,
            start: range_start,
            end: range_end,
            rule,
            reset,
        } => {
            let range_start = parse_time(&range_start, "--start")?;
            let range_end = parse_time(&range_end, "--end")?;
            if range_start >= range_end {
                anyhow::bail!("--start must be before --end");
            }
            let (engine_config, base_dir) = load_config(&config)?;
            let _guard = init_tracing(&engine_config.logging, &base_dir)?;

            let mut request = ExecutionRequest::process_range(range_start, range_end);
            if let Some(rule) = rule {
                request = request.with_rule(rule);
            }
            if reset {
                request = request.with_reset();
            }

            let host = start(one_shot(engine_config), &base_dir).await?;
            let outcome = host.handle().execute(request, false).await;
            stop(host).await?;
            let outcome = outcome.map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Status { config, point } => {
            let (engine_config, base_dir) = load_config(&config)?;
            let _guard = init_tracing(&engine_config.logging, &base_dir)?;

            let host = start(one_shot(engine_config), &base_dir).await?;
            let service = host.service();
            let report = serde_json::json!({
                "health": serde_json::to_value(service.health())?,
                "points": serde_json::to_value(service.check_status(&point))?,
            });
            stop(host).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
