use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::record::RecordKind;

/// Top-level configuration for the agentscope daemon and library.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Local mirroring of recorded log entries.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Ring buffer capacities.
    #[serde(default)]
    pub buffers: BufferConfig,

    /// Windowing and export configuration.
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Alert thresholds and sweep interval.
    #[serde(default)]
    pub alerts: AlertThresholds,

    /// External log/metrics sink configuration.
    #[serde(default)]
    pub sinks: SinksConfig,

    /// Health metrics and dashboard server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Local mirroring of recorded log entries.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Re-emit every recorded log entry through `tracing`. Default: true.
    #[serde(default = "default_true")]
    pub mirror_entries: bool,
}

/// Ring buffer capacities.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    /// Maximum metric samples kept in memory. Default: 10000.
    #[serde(default = "default_metrics_capacity")]
    pub metrics_capacity: usize,

    /// Maximum log entries kept in memory. Default: 5000.
    #[serde(default = "default_logs_capacity")]
    pub logs_capacity: usize,
}

/// Windowing and export configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    /// Window used when analytics are requested without one. Default: 1h.
    #[serde(default = "default_analytics_window", with = "humantime_serde")]
    pub default_window: Duration,

    /// Window the alert rules are evaluated over. Default: 5m.
    #[serde(default = "default_alert_window", with = "humantime_serde")]
    pub alert_window: Duration,

    /// Log entries included in the JSON export. Default: 100.
    #[serde(default = "default_recent_logs")]
    pub recent_logs: usize,

    /// Raw samples included in the CSV export. Default: 1000.
    #[serde(default = "default_csv_rows")]
    pub csv_rows: usize,

    /// Prefix for exported metric names. Default: none.
    #[serde(default)]
    pub namespace: String,
}

/// Alert rule thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertThresholds {
    /// Success rate below which a critical alert fires. Default: 0.8.
    #[serde(default = "default_ratio")]
    pub min_success_rate: f64,

    /// Operations required before the success-rate rule applies. Default: 10.
    #[serde(default = "default_min_operations_for_success_rate")]
    pub min_operations_for_success_rate: u64,

    /// Mean duration above which a critical alert fires. Default: 30000.
    #[serde(default = "default_max_avg_duration_ms")]
    pub max_avg_duration_ms: f64,

    /// Per-category error count above which a warning fires. Default: 5.
    #[serde(default = "default_max_errors_per_category")]
    pub max_errors_per_category: u64,

    /// Single-actor share of operations above which a warning fires. Default: 0.8.
    #[serde(default = "default_ratio")]
    pub actor_dominance_ratio: f64,

    /// Operations required before the dominance rule applies. Default: 20.
    #[serde(default = "default_min_operations_for_dominance")]
    pub min_operations_for_dominance: u64,

    /// How often the daemon evaluates alerts. Default: 1m.
    #[serde(default = "default_alert_check_interval", with = "humantime_serde")]
    pub check_interval: Duration,
}

/// External log/metrics sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SinksConfig {
    /// Endpoint receiving log entries. Empty disables log forwarding.
    #[serde(default)]
    pub log_url: String,

    /// Endpoint receiving metric samples. Empty disables metric forwarding.
    #[serde(default)]
    pub metrics_url: String,

    /// Additional HTTP headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Request body compression (none, gzip, zstd). Default: none.
    #[serde(default)]
    pub compression: SinkCompression,

    /// Maximum duration of a single delivery. Default: 10s.
    #[serde(default = "default_export_timeout", with = "humantime_serde")]
    pub export_timeout: Duration,

    /// Maximum records to queue (dropped if full). Default: 4096.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Maximum concurrent deliveries. Default: 4.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Enable HTTP keep-alive connections. Default: true.
    #[serde(default = "default_true")]
    pub keep_alive: bool,
}

/// Health metrics and dashboard server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Listen address. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,

    /// How often recorder counters are folded into health metrics. Default: 10s.
    #[serde(default = "default_stats_interval", with = "humantime_serde")]
    pub stats_interval: Duration,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_capacity() -> usize {
    10_000
}

fn default_logs_capacity() -> usize {
    5_000
}

fn default_analytics_window() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_alert_window() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_recent_logs() -> usize {
    100
}

fn default_csv_rows() -> usize {
    1_000
}

fn default_ratio() -> f64 {
    0.8
}

fn default_min_operations_for_success_rate() -> u64 {
    10
}

fn default_max_avg_duration_ms() -> f64 {
    30_000.0
}

fn default_max_errors_per_category() -> u64 {
    5
}

fn default_min_operations_for_dominance() -> u64 {
    20
}

fn default_alert_check_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_export_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_queue_size() -> usize {
    4096
}

fn default_workers() -> usize {
    4
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

fn default_stats_interval() -> Duration {
    Duration::from_secs(10)
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            logging: LoggingConfig::default(),
            buffers: BufferConfig::default(),
            analytics: AnalyticsConfig::default(),
            alerts: AlertThresholds::default(),
            sinks: SinksConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            mirror_entries: true,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            metrics_capacity: default_metrics_capacity(),
            logs_capacity: default_logs_capacity(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            default_window: default_analytics_window(),
            alert_window: default_alert_window(),
            recent_logs: default_recent_logs(),
            csv_rows: default_csv_rows(),
            namespace: String::new(),
        }
    }
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            min_success_rate: default_ratio(),
            min_operations_for_success_rate: default_min_operations_for_success_rate(),
            max_avg_duration_ms: default_max_avg_duration_ms(),
            max_errors_per_category: default_max_errors_per_category(),
            actor_dominance_ratio: default_ratio(),
            min_operations_for_dominance: default_min_operations_for_dominance(),
            check_interval: default_alert_check_interval(),
        }
    }
}

impl Default for SinksConfig {
    fn default() -> Self {
        Self {
            log_url: String::new(),
            metrics_url: String::new(),
            headers: HashMap::new(),
            compression: SinkCompression::None,
            export_timeout: default_export_timeout(),
            max_queue_size: default_max_queue_size(),
            workers: default_workers(),
            keep_alive: true,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            addr: default_health_addr(),
            stats_interval: default_stats_interval(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        Self::from_yaml(&data).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Parse and validate configuration from a YAML document.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data).context("decoding YAML")?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.buffers.metrics_capacity == 0 {
            bail!("buffers.metrics_capacity must be positive");
        }
        if self.buffers.logs_capacity == 0 {
            bail!("buffers.logs_capacity must be positive");
        }

        if self.analytics.default_window.is_zero() {
            bail!("analytics.default_window must be positive");
        }
        if self.analytics.alert_window.is_zero() {
            bail!("analytics.alert_window must be positive");
        }

        let alerts = &self.alerts;
        if !(0.0..=1.0).contains(&alerts.min_success_rate) {
            bail!("alerts.min_success_rate must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&alerts.actor_dominance_ratio) {
            bail!("alerts.actor_dominance_ratio must be within [0, 1]");
        }
        if !alerts.max_avg_duration_ms.is_finite() || alerts.max_avg_duration_ms < 0.0 {
            bail!("alerts.max_avg_duration_ms must be a non-negative number");
        }
        if alerts.check_interval.is_zero() {
            bail!("alerts.check_interval must be positive");
        }

        if self.health.stats_interval.is_zero() {
            bail!("health.stats_interval must be positive");
        }

        self.sinks.validate()?;

        Ok(())
    }
}

/// Body encoding applied to sink requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkCompression {
    #[default]
    None,
    Gzip,
    Zstd,
}

impl SinkCompression {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
        }
    }
}

impl fmt::Display for SinkCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SinksConfig {
    /// Returns true if at least one sink endpoint is configured.
    pub fn is_enabled(&self) -> bool {
        !self.log_url.is_empty() || !self.metrics_url.is_empty()
    }

    /// Returns the endpoint receiving records of the given kind, if any.
    pub fn url_for(&self, kind: RecordKind) -> Option<&str> {
        let url = match kind {
            RecordKind::Metric => &self.metrics_url,
            RecordKind::Log => &self.log_url,
        };
        (!url.is_empty()).then_some(url.as_str())
    }

    fn validate(&self) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        for (key, url) in [("sinks.log_url", &self.log_url), ("sinks.metrics_url", &self.metrics_url)] {
            if url.is_empty() {
                continue;
            }
            let parsed = reqwest::Url::parse(url).with_context(|| format!("invalid {key}: {url}"))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                bail!("{key} must use http or https: {url}");
            }
        }

        if self.max_queue_size == 0 {
            bail!("sinks.max_queue_size must be positive when a sink is configured");
        }
        if self.workers == 0 {
            bail!("sinks.workers must be positive when a sink is configured");
        }
        if self.export_timeout.is_zero() {
            bail!("sinks.export_timeout must be positive when a sink is configured");
        }

        Ok(())
    }
}
