//! Text, JSON and CSV views over the stored records.

pub mod health;

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use prometheus::{Encoder, Gauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::analytics::{AlertResult, WindowedAnalytics};
use crate::config::AnalyticsConfig;
use crate::record::{LogEntry, MetricSample};

/// Column header of the CSV export.
pub const CSV_HEADER: &str = "timestamp,operation,agentId,actorId,durationMs,success,error";

/// All export views, derived from a single instant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsExport {
    pub prometheus_text: String,
    pub json_snapshot: serde_json::Value,
    pub csv_text: String,
}

/// Inputs of one export, captured at the same `now`.
pub struct ExportInput<'a> {
    pub now: DateTime<Utc>,
    pub analytics: &'a WindowedAnalytics,
    pub alerts: &'a AlertResult,
    /// Most recent log entries, newest-first.
    pub recent_logs: &'a [Arc<LogEntry>],
    /// Most recent metric samples, oldest-first.
    pub samples: &'a [Arc<MetricSample>],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonSnapshot<'a> {
    timestamp: DateTime<Utc>,
    analytics: &'a WindowedAnalytics,
    recent_logs: &'a [Arc<LogEntry>],
    alerts: &'a AlertResult,
}

/// Renders [`MetricsExport`] views. Rendering never fails: a view that
/// cannot be produced is left empty and the fault is logged.
#[derive(Debug, Clone, Default)]
pub struct Exporter {
    namespace: String,
}

impl Exporter {
    pub fn new(cfg: &AnalyticsConfig) -> Self {
        Self {
            namespace: cfg.namespace.clone(),
        }
    }

    pub fn render(&self, input: &ExportInput<'_>) -> MetricsExport {
        let prometheus_text = self
            .prometheus_text(input.analytics)
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "rendering prometheus export");
                String::new()
            });

        let json_snapshot = json_snapshot(input).unwrap_or_else(|e| {
            tracing::error!(error = %e, "rendering json export");
            serde_json::Value::Object(serde_json::Map::new())
        });

        MetricsExport {
            prometheus_text,
            json_snapshot,
            csv_text: csv_text(input.samples),
        }
    }

    /// Prometheus exposition text for the windowed gauges.
    pub fn prometheus_text(&self, analytics: &WindowedAnalytics) -> Result<String> {
        let registry = Registry::new();

        let gauges = [
            (
                "operations_total",
                "Operations recorded in the current window.",
                analytics.total_operations as f64,
            ),
            (
                "success_rate",
                "Fraction of successful operations in the current window.",
                analytics.success_rate,
            ),
            (
                "avg_duration_ms",
                "Mean operation duration in milliseconds.",
                analytics.avg_duration_ms,
            ),
            (
                "throughput_ops_per_sec",
                "Operations per second over the current window.",
                analytics.throughput,
            ),
        ];

        for (name, help, value) in gauges {
            let mut opts = Opts::new(name, help);
            if !self.namespace.is_empty() {
                opts = opts.namespace(self.namespace.as_str());
            }
            let gauge = Gauge::with_opts(opts).with_context(|| format!("creating gauge {name}"))?;
            gauge.set(value);
            registry
                .register(Box::new(gauge))
                .with_context(|| format!("registering gauge {name}"))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .context("encoding metrics")?;

        String::from_utf8(buffer).context("converting metrics to string")
    }
}

fn json_snapshot(input: &ExportInput<'_>) -> Result<serde_json::Value> {
    let snapshot = JsonSnapshot {
        timestamp: input.now,
        analytics: input.analytics,
        recent_logs: input.recent_logs,
        alerts: input.alerts,
    };
    serde_json::to_value(snapshot).context("serializing snapshot")
}

/// CSV rows for the given samples, in the order given.
pub fn csv_text(samples: &[Arc<MetricSample>]) -> String {
    let mut out = String::with_capacity(CSV_HEADER.len() + 1 + samples.len() * 96);
    out.push_str(CSV_HEADER);
    out.push('\n');

    for s in samples {
        let timestamp = s.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
        // Writing to a String cannot fail.
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{}",
            timestamp,
            escape_csv(&s.operation),
            escape_csv(&s.agent_id),
            escape_csv(&s.actor_id),
            s.duration_ms,
            s.success,
            escape_csv(s.error.as_deref().unwrap_or("")),
        );
    }

    out
}

/// Quotes a field when it contains a delimiter, quote or line break.
fn escape_csv(field: &str) -> std::borrow::Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\"")).into()
    } else {
        field.into()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::record::LogLevel;

    fn analytics() -> WindowedAnalytics {
        WindowedAnalytics {
            total_operations: 12,
            success_rate: 0.5,
            avg_duration_ms: 250.0,
            throughput: 0.2,
            operation_breakdown: BTreeMap::from([("publish".to_string(), 12)]),
            actor_activity: BTreeMap::new(),
            error_summary: BTreeMap::new(),
        }
    }

    #[test]
    fn test_prometheus_text_gauges() {
        let text = Exporter::default()
            .prometheus_text(&analytics())
            .expect("render");

        assert!(text.contains("# HELP operations_total"));
        assert!(text.contains("# TYPE operations_total gauge"));
        assert!(text.contains("operations_total 12"));
        assert!(text.contains("success_rate 0.5"));
        assert!(text.contains("avg_duration_ms 250"));
        assert!(text.contains("throughput_ops_per_sec 0.2"));
    }

    #[test]
    fn test_prometheus_namespace() {
        let cfg = AnalyticsConfig {
            namespace: "agents".to_string(),
            ..Default::default()
        };
        let text = Exporter::new(&cfg)
            .prometheus_text(&analytics())
            .expect("render");

        assert!(text.contains("agents_operations_total 12"));
        assert!(text.contains("# TYPE agents_success_rate gauge"));
    }

    #[test]
    fn test_invalid_namespace_yields_empty_view() {
        let cfg = AnalyticsConfig {
            namespace: "not a valid-name".to_string(),
            ..Default::default()
        };
        let exporter = Exporter::new(&cfg);
        assert!(exporter.prometheus_text(&analytics()).is_err());

        let a = analytics();
        let alerts = AlertResult::default();
        let export = exporter.render(&ExportInput {
            now: Utc::now(),
            analytics: &a,
            alerts: &alerts,
            recent_logs: &[],
            samples: &[],
        });
        assert!(export.prometheus_text.is_empty());
        assert_eq!(export.csv_text, format!("{CSV_HEADER}\n"));
    }

    #[test]
    fn test_json_snapshot_shape() {
        let now = Utc::now();
        let a = analytics();
        let alerts = AlertResult {
            critical_alerts: vec!["Low success rate: 50.0% over 12 operations".to_string()],
            warning_alerts: Vec::new(),
        };
        let logs = vec![Arc::new(LogEntry::new(
            LogLevel::Error,
            "publish",
            "abraham",
            "trainer-A",
            now,
            "Failed publish: boom",
        ))];

        let export = Exporter::default().render(&ExportInput {
            now,
            analytics: &a,
            alerts: &alerts,
            recent_logs: &logs,
            samples: &[],
        });

        let json = &export.json_snapshot;
        assert_eq!(json["analytics"], serde_json::to_value(&a).expect("value"));
        assert_eq!(json["recentLogs"][0]["message"], "Failed publish: boom");
        assert_eq!(json["alerts"]["criticalAlerts"][0], alerts.critical_alerts[0]);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_csv_rows_and_quoting() {
        let ts = DateTime::<Utc>::UNIX_EPOCH;
        let samples = vec![
            Arc::new(MetricSample::success("publish", "abraham", "trainer-A", ts, 12)),
            Arc::new(MetricSample::failure(
                "curate",
                "abraham",
                "trainer-B",
                ts,
                40,
                "bad input, \"quoted\"\nsecond line",
            )),
        ];

        let csv = csv_text(&samples);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        assert_eq!(
            lines.next(),
            Some("1970-01-01T00:00:00.000Z,publish,abraham,trainer-A,12,true,")
        );
        assert!(csv.contains(
            "1970-01-01T00:00:00.000Z,curate,abraham,trainer-B,40,false,\"bad input, \"\"quoted\"\"\nsecond line\"\n"
        ));
    }

    #[test]
    fn test_escape_csv_passthrough() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
    }
}
