use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::analytics::AlertResult;
use crate::context::ObservabilityContext;
use crate::record::RecordKind;
use crate::store::{EventRecorder, KindCounts, LogFilter};

/// Prometheus self-metrics and the dashboard HTTP server.
///
/// All metrics use the "agentscope" namespace.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Records appended by kind.
    pub records_appended: CounterVec,
    /// Records evicted from a full buffer by kind.
    pub records_evicted: CounterVec,
    /// Records not handed to a sink by kind.
    pub records_forward_dropped: CounterVec,
    /// Successful sink deliveries by sink.
    pub sink_deliveries: CounterVec,
    /// Failed sink deliveries by sink.
    pub sink_delivery_errors: CounterVec,
    /// Records waiting in the sink queue.
    pub sink_queue_length: Gauge,
    /// Current buffer length by kind.
    pub buffer_length: GaugeVec,
    /// Buffer capacity by kind.
    pub buffer_capacity: GaugeVec,
    /// Alerts raised by the latest sweep by severity.
    pub alerts_active: GaugeVec,
    /// Alert sweeps performed.
    pub alert_sweeps: Counter,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let records_appended = CounterVec::new(
            Opts::new("records_appended_total", "Total records appended by kind.")
                .namespace("agentscope"),
            &["kind"],
        )?;
        let records_evicted = CounterVec::new(
            Opts::new(
                "records_evicted_total",
                "Total records evicted from a full buffer by kind.",
            )
            .namespace("agentscope"),
            &["kind"],
        )?;
        let records_forward_dropped = CounterVec::new(
            Opts::new(
                "records_forward_dropped_total",
                "Total records not enqueued for a sink by kind.",
            )
            .namespace("agentscope"),
            &["kind"],
        )?;
        let sink_deliveries = CounterVec::new(
            Opts::new(
                "sink_deliveries_total",
                "Total records delivered to a sink.",
            )
            .namespace("agentscope"),
            &["sink"],
        )?;
        let sink_delivery_errors = CounterVec::new(
            Opts::new(
                "sink_delivery_errors_total",
                "Total failed sink deliveries.",
            )
            .namespace("agentscope"),
            &["sink"],
        )?;
        let sink_queue_length = Gauge::with_opts(
            Opts::new(
                "sink_queue_length",
                "Current number of records waiting for delivery.",
            )
            .namespace("agentscope"),
        )?;
        let buffer_length = GaugeVec::new(
            Opts::new("buffer_length", "Current number of stored records by kind.")
                .namespace("agentscope"),
            &["kind"],
        )?;
        let buffer_capacity = GaugeVec::new(
            Opts::new("buffer_capacity", "Buffer capacity by kind.").namespace("agentscope"),
            &["kind"],
        )?;
        let alerts_active = GaugeVec::new(
            Opts::new(
                "alerts_active",
                "Alerts raised by the latest sweep by severity.",
            )
            .namespace("agentscope"),
            &["severity"],
        )?;
        let alert_sweeps = Counter::with_opts(
            Opts::new("alert_sweeps_total", "Total alert sweeps performed.")
                .namespace("agentscope"),
        )?;

        registry.register(Box::new(records_appended.clone()))?;
        registry.register(Box::new(records_evicted.clone()))?;
        registry.register(Box::new(records_forward_dropped.clone()))?;
        registry.register(Box::new(sink_deliveries.clone()))?;
        registry.register(Box::new(sink_delivery_errors.clone()))?;
        registry.register(Box::new(sink_queue_length.clone()))?;
        registry.register(Box::new(buffer_length.clone()))?;
        registry.register(Box::new(buffer_capacity.clone()))?;
        registry.register(Box::new(alerts_active.clone()))?;
        registry.register(Box::new(alert_sweeps.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            records_appended,
            records_evicted,
            records_forward_dropped,
            sink_deliveries,
            sink_delivery_errors,
            sink_queue_length,
            buffer_length,
            buffer_capacity,
            alerts_active,
            alert_sweeps,
        })
    }

    /// Folds a recorder stats snapshot into the counters.
    pub fn observe_recorder(&self, deltas: &[(RecordKind, KindCounts)]) {
        for (kind, counts) in deltas {
            let label = [kind.as_str()];
            self.records_appended
                .with_label_values(&label)
                .inc_by(counts.appended as f64);
            self.records_evicted
                .with_label_values(&label)
                .inc_by(counts.evicted as f64);
            self.records_forward_dropped
                .with_label_values(&label)
                .inc_by(counts.forward_dropped as f64);
        }
    }

    /// Folds a sink stats snapshot, as `(kind, delivered, failed)`, into the counters.
    pub fn observe_sinks(&self, deltas: &[(RecordKind, u64, u64)]) {
        for (kind, delivered, failed) in deltas {
            let label = [kind.as_str()];
            self.sink_deliveries
                .with_label_values(&label)
                .inc_by(*delivered as f64);
            self.sink_delivery_errors
                .with_label_values(&label)
                .inc_by(*failed as f64);
        }
    }

    /// Updates buffer and queue gauges.
    pub fn observe_occupancy(&self, recorder: &EventRecorder) {
        for kind in RecordKind::ALL {
            let (len, capacity) = recorder.occupancy(kind);
            self.buffer_length
                .with_label_values(&[kind.as_str()])
                .set(len as f64);
            self.buffer_capacity
                .with_label_values(&[kind.as_str()])
                .set(capacity as f64);
        }
        self.sink_queue_length
            .set(recorder.forwarder().queue_len() as f64);
    }

    /// Records the outcome of one alert sweep.
    pub fn observe_alerts(&self, alerts: &AlertResult) {
        self.alert_sweeps.inc();
        self.alerts_active
            .with_label_values(&["critical"])
            .set(alerts.critical_alerts.len() as f64);
        self.alerts_active
            .with_label_values(&["warning"])
            .set(alerts.warning_alerts.len() as f64);
    }

    /// Starts the HTTP server serving /metrics, /healthz and the dashboard API.
    ///
    /// Returns the bound address.
    pub async fn start(&self, ctx: Arc<ObservabilityContext>) -> Result<SocketAddr> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
            ctx,
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .route("/api/analytics", get(analytics_handler))
            .route("/api/logs", get(logs_handler))
            .route("/api/alerts", get(alerts_handler))
            .route("/api/export", get(export_handler))
            .route("/api/export/prometheus", get(export_prometheus_handler))
            .route("/api/export/csv", get(export_csv_handler))
            .route("/api/export/json", get(export_json_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health server started");

            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    cancel.cancelled().await;
                })
                .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health server error");
            }
        });

        Ok(local_addr)
    }

    /// Gracefully shuts down the health server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
    ctx: Arc<ObservabilityContext>,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "encoding metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "encoding error".to_string(),
        );
    }

    match String::from_utf8(buffer) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "converting metrics to string");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyticsQuery {
    window_ms: Option<u64>,
}

/// GET /api/analytics?windowMs= - Windowed analytics.
async fn analytics_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnalyticsQuery>,
) -> impl IntoResponse {
    let window = query.window_ms.map(Duration::from_millis);
    Json(state.ctx.get_analytics(window))
}

/// GET /api/logs - Filtered log entries, newest-first.
async fn logs_handler(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<LogFilter>,
) -> impl IntoResponse {
    Json(state.ctx.get_logs(&filter))
}

/// GET /api/alerts - Current alert evaluation.
async fn alerts_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.ctx.check_alerts())
}

/// GET /api/export - All export views.
async fn export_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.ctx.export_metrics())
}

/// GET /api/export/prometheus - Windowed gauges in exposition format.
async fn export_prometheus_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.ctx.export_metrics().prometheus_text,
    )
}

/// GET /api/export/csv - Recent samples as CSV.
async fn export_csv_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/csv")],
        state.ctx.export_metrics().csv_text,
    )
}

/// GET /api/export/json - Dashboard snapshot.
async fn export_json_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.ctx.export_metrics().json_snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sink::SinkForwarder;

    async fn serve() -> (HealthMetrics, Arc<ObservabilityContext>, String) {
        let ctx = Arc::new(ObservabilityContext::new(
            &Config::default(),
            SinkForwarder::disabled(),
        ));
        let health = HealthMetrics::new("127.0.0.1:0").expect("metrics");
        let addr = health.start(Arc::clone(&ctx)).await.expect("start");
        (health, ctx, format!("http://{addr}"))
    }

    async fn fetch(url: &str) -> (StatusCode, String, String) {
        let resp = reqwest::get(url).await.expect("request");
        let status = StatusCode::from_u16(resp.status().as_u16()).expect("status");
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = resp.text().await.expect("body");
        (status, content_type, body)
    }

    fn record_traffic(ctx: &ObservabilityContext) {
        for i in 0..4 {
            let _: Result<(), String> = ctx.track_sync("publish", "abraham", "trainer-A", || {
                if i % 2 == 0 {
                    Ok(())
                } else {
                    Err("ipfs pin failed".to_string())
                }
            });
        }
    }

    #[test]
    fn test_observe_updates_metrics() {
        let health = HealthMetrics::new(":0").expect("metrics");
        health.observe_recorder(&[(
            RecordKind::Log,
            KindCounts {
                appended: 5,
                evicted: 2,
                forward_dropped: 1,
            },
        )]);
        health.observe_sinks(&[(RecordKind::Metric, 3, 1)]);
        health.observe_alerts(&AlertResult {
            critical_alerts: vec!["a".to_string()],
            warning_alerts: vec!["b".to_string(), "c".to_string()],
        });

        assert_eq!(health.records_appended.with_label_values(&["log"]).get(), 5.0);
        assert_eq!(health.records_evicted.with_label_values(&["log"]).get(), 2.0);
        assert_eq!(
            health
                .records_forward_dropped
                .with_label_values(&["log"])
                .get(),
            1.0
        );
        assert_eq!(health.sink_deliveries.with_label_values(&["metric"]).get(), 3.0);
        assert_eq!(
            health.sink_delivery_errors.with_label_values(&["metric"]).get(),
            1.0
        );
        assert_eq!(health.alerts_active.with_label_values(&["warning"]).get(), 2.0);
        assert_eq!(health.alert_sweeps.get(), 1.0);
    }

    #[tokio::test]
    async fn test_healthz_and_metrics() {
        let (health, ctx, base) = serve().await;
        record_traffic(&ctx);
        health.observe_recorder(&ctx.recorder().stats().snapshot());
        health.observe_occupancy(ctx.recorder());

        let (status, _, body) = fetch(&format!("{base}/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");

        let (status, _, body) = fetch(&format!("{base}/metrics")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("agentscope_records_appended_total{kind=\"metric\"} 4"));
        assert!(body.contains("agentscope_buffer_capacity{kind=\"log\"} 5000"));

        health.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_dashboard_api() {
        let (health, ctx, base) = serve().await;
        record_traffic(&ctx);

        let (status, _, body) = fetch(&format!("{base}/api/analytics?windowMs=60000")).await;
        assert_eq!(status, StatusCode::OK);
        let analytics: serde_json::Value = serde_json::from_str(&body).expect("json");
        assert_eq!(analytics["totalOperations"], 4);
        assert_eq!(analytics["successRate"], 0.5);
        assert_eq!(analytics["errorSummary"]["Storage"], 2);

        let (_, _, body) = fetch(&format!("{base}/api/logs?level=ERROR&limit=1")).await;
        let logs: Vec<serde_json::Value> = serde_json::from_str(&body).expect("json");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["level"], "ERROR");

        let (status, _, body) = fetch(&format!("{base}/api/logs?level=Error&limit=1")).await;
        assert_eq!(status, StatusCode::OK);
        let mixed_case: Vec<serde_json::Value> = serde_json::from_str(&body).expect("json");
        assert_eq!(mixed_case, logs);

        let (_, _, body) = fetch(&format!("{base}/api/alerts")).await;
        let alerts: serde_json::Value = serde_json::from_str(&body).expect("json");
        assert_eq!(alerts["criticalAlerts"], serde_json::json!([]));

        let (_, _, body) = fetch(&format!("{base}/api/export")).await;
        let export: serde_json::Value = serde_json::from_str(&body).expect("json");
        assert!(export["prometheusText"]
            .as_str()
            .is_some_and(|t| t.contains("operations_total 4")));
        assert!(export["jsonSnapshot"]["recentLogs"].is_array());

        let (_, content_type, body) = fetch(&format!("{base}/api/export/csv")).await;
        assert_eq!(content_type, "text/csv");
        assert_eq!(body.lines().count(), 5);

        let (_, content_type, body) = fetch(&format!("{base}/api/export/prometheus")).await;
        assert!(content_type.starts_with("text/plain"));
        assert!(body.contains("# TYPE success_rate gauge"));

        let (_, _, body) = fetch(&format!("{base}/api/export/json")).await;
        let snapshot: serde_json::Value = serde_json::from_str(&body).expect("json");
        assert_eq!(snapshot["analytics"]["totalOperations"], 4);

        health.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_bad_query_is_rejected() {
        let (health, _ctx, base) = serve().await;
        let (status, _, _) = fetch(&format!("{base}/api/logs?level=LOUD")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        health.stop().await.expect("stop");
    }
}
