use std::net::SocketAddr;

use crate::engine::EngineConfig;

/// Internal validation, called automatically during `EngineConfig::from_str` / `load`.
pub(crate) fn validate(config: &EngineConfig) -> anyhow::Result<()> {
    let rt = &config.runtime;
    for (name, value) in [
        ("runtime.parallelism", rt.parallelism),
        ("runtime.max_concurrent_operations", rt.max_concurrent_operations),
        ("runtime.realtime_channel_capacity", rt.realtime_channel_capacity),
        ("runtime.batch_channel_capacity", rt.batch_channel_capacity),
        ("runtime.point_channel_capacity", rt.point_channel_capacity),
        ("execution.min_points", config.execution.min_points),
        ("execution.compaction_threshold", config.execution.compaction_threshold),
        ("execution.compaction_ratio", config.execution.compaction_ratio),
        ("execution.max_points_to_keep", config.execution.max_points_to_keep),
        (
            "execution.max_output_values_to_keep",
            config.execution.max_output_values_to_keep,
        ),
        ("sink.insight_capacity", config.sink.insight_capacity),
        ("sink.command_capacity", config.sink.command_capacity),
        ("sink.batch_size", config.sink.batch_size),
    ] {
        if value == 0 {
            anyhow::bail!("{name} must be > 0");
        }
    }

    if rt.query_window.is_zero() {
        anyhow::bail!("runtime.query_window must be > 0s");
    }
    if config.sink.flush_interval.is_zero() {
        anyhow::bail!("sink.flush_interval must be > 0s");
    }

    // Timeline cap must leave room for the compaction trigger to fire.
    if config.execution.max_output_values_to_keep < 2 {
        anyhow::bail!("execution.max_output_values_to_keep must be >= 2");
    }

    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be > 0");
    }
    if config.retry.initial_backoff > config.retry.max_backoff {
        anyhow::bail!(
            "retry.initial_backoff ({}) exceeds retry.max_backoff ({})",
            config.retry.initial_backoff,
            config.retry.max_backoff,
        );
    }

    if config.maintenance.status_interval.is_zero()
        || config.maintenance.persist_interval.is_zero()
    {
        anyhow::bail!("maintenance intervals must be > 0s");
    }

    if config.metrics.enabled {
        if config.metrics.report_interval.is_zero() {
            anyhow::bail!("metrics.report_interval must be > 0s");
        }
        config
            .metrics
            .prometheus_listen
            .parse::<SocketAddr>()
            .map_err(|e| {
                anyhow::anyhow!(
                    "metrics.prometheus_listen {:?} is not a socket address: {e}",
                    config.metrics.prometheus_listen,
                )
            })?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HumanDuration;
    use std::time::Duration;

    #[test]
    fn defaults_are_valid() {
        assert!(validate(&EngineConfig::default()).is_ok());
    }

    #[test]
    fn reject_inverted_backoff() {
        let mut cfg = EngineConfig::default();
        cfg.retry.initial_backoff = HumanDuration::from(Duration::from_secs(60));
        cfg.retry.max_backoff = HumanDuration::from(Duration::from_secs(1));
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("retry.initial_backoff"));
    }

    #[test]
    fn reject_zero_batch_size() {
        let mut cfg = EngineConfig::default();
        cfg.sink.batch_size = 0;
        assert!(validate(&cfg).unwrap_err().to_string().contains("sink.batch_size"));
    }

    #[test]
    fn metrics_listen_checked_only_when_enabled() {
        let mut cfg = EngineConfig::default();
        cfg.metrics.prometheus_listen = "not-an-addr".into();
        assert!(validate(&cfg).is_ok());
        cfg.metrics.enabled = true;
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("prometheus_listen"));
    }
}
