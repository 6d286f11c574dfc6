use serde::Deserialize;

use crate::types::HumanDuration;

/// `[metrics]`: pass/point/sink counters exposed as a Prometheus text page.
///
/// Disabled means no counters are kept and nothing listens.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// How often the summary line is logged.
    #[serde(default = "default_report_interval")]
    pub report_interval: HumanDuration,
    #[serde(default = "default_prometheus_listen")]
    pub prometheus_listen: String,
}

fn default_report_interval() -> HumanDuration {
    HumanDuration::from(std::time::Duration::from_secs(30))
}

fn default_prometheus_listen() -> String {
    "127.0.0.1:9911".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            report_interval: default_report_interval(),
            prometheus_listen: default_prometheus_listen(),
        }
    }
}
