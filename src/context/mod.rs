//! Instrumentation facade wrapping agent operations.
//!
//! [`ObservabilityContext`] is constructed explicitly and shared by `Arc`.
//! Every tracked operation produces exactly one [`MetricSample`] plus its
//! log entries, whatever the outcome: success, failure, timeout or the
//! caller dropping the future mid-flight.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::time::error::Elapsed;

use crate::analytics::{AlertEvaluator, AlertResult, Aggregator, ErrorClassifier, WindowedAnalytics};
use crate::config::{AnalyticsConfig, Config};
use crate::export::{ExportInput, Exporter, MetricsExport};
use crate::record::{LogEntry, LogLevel, Metadata, MetricSample};
use crate::sink::SinkForwarder;
use crate::store::{EventRecorder, LogFilter};

/// Error recorded when a tracked future is dropped before completing.
pub const CANCELLED: &str = "operation cancelled";

/// Entry point for recording operations and reading back what was recorded.
pub struct ObservabilityContext {
    recorder: EventRecorder,
    aggregator: Aggregator,
    evaluator: AlertEvaluator,
    exporter: Exporter,
    analytics: AnalyticsConfig,
    mirror_entries: bool,
}

impl ObservabilityContext {
    pub fn new(cfg: &Config, forwarder: SinkForwarder) -> Self {
        Self {
            recorder: EventRecorder::new(&cfg.buffers, forwarder),
            aggregator: Aggregator::default(),
            evaluator: AlertEvaluator::new(cfg.alerts.clone()),
            exporter: Exporter::new(&cfg.analytics),
            analytics: cfg.analytics.clone(),
            mirror_entries: cfg.logging.mirror_entries,
        }
    }

    /// Replaces the error classifier used for `errorSummary`.
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.aggregator = Aggregator::new(classifier);
        self
    }

    /// Direct access to the stores, for ingesting externally produced records.
    pub fn recorder(&self) -> &EventRecorder {
        &self.recorder
    }

    // --- Tracking ---

    /// Runs `fut` and records its outcome. The result is returned unchanged.
    pub async fn track<T, E, F>(
        &self,
        operation: &str,
        agent_id: &str,
        actor_id: &str,
        fut: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.track_with_metadata(operation, agent_id, actor_id, None, fut)
            .await
    }

    /// Like [`track`](Self::track), attaching `metadata` to the sample and to
    /// the "Starting" entry.
    pub async fn track_with_metadata<T, E, F>(
        &self,
        operation: &str,
        agent_id: &str,
        actor_id: &str,
        metadata: Option<Metadata>,
        fut: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut in_flight = self.begin(operation, agent_id, actor_id, metadata);
        let result = fut.await;
        in_flight.finish(result.as_ref().err().map(ToString::to_string));
        result
    }

    /// Synchronous variant of [`track`](Self::track).
    pub fn track_sync<T, E, F>(
        &self,
        operation: &str,
        agent_id: &str,
        actor_id: &str,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: Display,
    {
        let mut in_flight = self.begin(operation, agent_id, actor_id, None);
        let result = f();
        in_flight.finish(result.as_ref().err().map(ToString::to_string));
        result
    }

    /// Tracks `fut`, giving up after `limit`.
    ///
    /// On expiry a failed sample is recorded and the outer error is returned;
    /// otherwise the inner result is the operation's own.
    pub async fn track_timeout<T, E, F>(
        &self,
        operation: &str,
        agent_id: &str,
        actor_id: &str,
        limit: Duration,
        fut: F,
    ) -> Result<Result<T, E>, Elapsed>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut in_flight = self.begin(operation, agent_id, actor_id, None);
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => {
                in_flight.finish(result.as_ref().err().map(ToString::to_string));
                Ok(result)
            }
            Err(elapsed) => {
                in_flight.finish(Some(format!("timeout after {limit:?}")));
                Err(elapsed)
            }
        }
    }

    fn begin<'a>(
        &'a self,
        operation: &'a str,
        agent_id: &'a str,
        actor_id: &'a str,
        metadata: Option<Metadata>,
    ) -> InFlight<'a> {
        let started_at = Utc::now();
        self.append_log(
            LogEntry::new(
                LogLevel::Info,
                operation,
                agent_id,
                actor_id,
                started_at,
                format!("Starting {operation}"),
            )
            .with_context(metadata.clone()),
        );

        InFlight {
            ctx: self,
            operation,
            agent_id,
            actor_id,
            started_at,
            clock: Instant::now(),
            metadata,
            done: false,
        }
    }

    // --- Logging ---

    pub fn info(
        &self,
        operation: &str,
        agent_id: &str,
        actor_id: &str,
        message: impl Into<String>,
        context: Option<Metadata>,
    ) {
        self.log(LogLevel::Info, operation, agent_id, actor_id, message, context);
    }

    pub fn warn(
        &self,
        operation: &str,
        agent_id: &str,
        actor_id: &str,
        message: impl Into<String>,
        context: Option<Metadata>,
    ) {
        self.log(LogLevel::Warn, operation, agent_id, actor_id, message, context);
    }

    pub fn error(
        &self,
        operation: &str,
        agent_id: &str,
        actor_id: &str,
        message: impl Into<String>,
        context: Option<Metadata>,
    ) {
        self.log(LogLevel::Error, operation, agent_id, actor_id, message, context);
    }

    /// Appends one log entry at `level`.
    pub fn log(
        &self,
        level: LogLevel,
        operation: &str,
        agent_id: &str,
        actor_id: &str,
        message: impl Into<String>,
        context: Option<Metadata>,
    ) {
        self.append_log(
            LogEntry::new(level, operation, agent_id, actor_id, Utc::now(), message)
                .with_context(context),
        );
    }

    fn append_log(&self, entry: LogEntry) {
        if self.mirror_entries {
            mirror(&entry);
        }
        self.recorder.record_log(entry);
    }

    // --- Reading ---

    /// Analytics over `window` (the configured default when `None`).
    pub fn get_analytics(&self, window: Option<Duration>) -> WindowedAnalytics {
        self.get_analytics_at(window, Utc::now())
    }

    pub fn get_analytics_at(&self, window: Option<Duration>, now: DateTime<Utc>) -> WindowedAnalytics {
        let window = window.unwrap_or(self.analytics.default_window);
        self.aggregator
            .compute(&self.recorder.metric_snapshot(), window, now)
    }

    /// Matching log entries, newest-first.
    pub fn get_logs(&self, filter: &LogFilter) -> Vec<Arc<LogEntry>> {
        self.get_logs_at(filter, Utc::now())
    }

    pub fn get_logs_at(&self, filter: &LogFilter, now: DateTime<Utc>) -> Vec<Arc<LogEntry>> {
        filter.apply(self.recorder.log_snapshot(), now)
    }

    /// Evaluates alert rules over the configured alert window.
    pub fn check_alerts(&self) -> AlertResult {
        self.check_alerts_at(Utc::now())
    }

    pub fn check_alerts_at(&self, now: DateTime<Utc>) -> AlertResult {
        let analytics = self.aggregator.compute(
            &self.recorder.metric_snapshot(),
            self.analytics.alert_window,
            now,
        );
        self.evaluator.evaluate(&analytics)
    }

    /// Renders every export view from one snapshot of each buffer.
    pub fn export_metrics(&self) -> MetricsExport {
        self.export_metrics_at(Utc::now())
    }

    pub fn export_metrics_at(&self, now: DateTime<Utc>) -> MetricsExport {
        let samples = self.recorder.metric_snapshot();
        let logs = self.recorder.log_snapshot();

        let analytics = self
            .aggregator
            .compute(&samples, self.analytics.default_window, now);
        let alert_analytics = self
            .aggregator
            .compute(&samples, self.analytics.alert_window, now);
        let alerts = self.evaluator.evaluate(&alert_analytics);

        let recent_logs = LogFilter::new()
            .limit(self.analytics.recent_logs)
            .apply(logs, now);
        let csv_start = samples.len().saturating_sub(self.analytics.csv_rows);

        self.exporter.render(&ExportInput {
            now,
            analytics: &analytics,
            alerts: &alerts,
            recent_logs: &recent_logs,
            samples: &samples[csv_start..],
        })
    }
}

/// Tracks one operation between its "Starting" entry and its sample.
///
/// Dropping it before [`finish`](Self::finish) means the caller abandoned
/// the operation, which is recorded as a cancellation.
struct InFlight<'a> {
    ctx: &'a ObservabilityContext,
    operation: &'a str,
    agent_id: &'a str,
    actor_id: &'a str,
    started_at: DateTime<Utc>,
    clock: Instant,
    metadata: Option<Metadata>,
    done: bool,
}

impl InFlight<'_> {
    fn finish(&mut self, error: Option<String>) {
        if self.done {
            return;
        }
        self.done = true;

        let duration_ms = i64::try_from(self.clock.elapsed().as_millis()).unwrap_or(i64::MAX);
        let (operation, agent_id, actor_id) = (self.operation, self.agent_id, self.actor_id);

        let (sample, entry) = match error {
            None => (
                MetricSample::success(operation, agent_id, actor_id, self.started_at, duration_ms),
                LogEntry::new(
                    LogLevel::Info,
                    operation,
                    agent_id,
                    actor_id,
                    Utc::now(),
                    format!("Completed {operation}"),
                ),
            ),
            Some(error) => (
                MetricSample::failure(
                    operation,
                    agent_id,
                    actor_id,
                    self.started_at,
                    duration_ms,
                    error.as_str(),
                ),
                LogEntry::new(
                    LogLevel::Error,
                    operation,
                    agent_id,
                    actor_id,
                    Utc::now(),
                    format!("Failed {operation}: {error}"),
                ),
            ),
        };

        self.ctx
            .recorder
            .record_metric(sample.with_metadata(self.metadata.take()));
        self.ctx.append_log(entry);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.finish(Some(CANCELLED.to_string()));
        }
    }
}

fn mirror(entry: &LogEntry) {
    match entry.level {
        LogLevel::Info => tracing::info!(
            operation = %entry.operation,
            agent_id = %entry.agent_id,
            actor_id = %entry.actor_id,
            "{}",
            entry.message
        ),
        LogLevel::Warn => tracing::warn!(
            operation = %entry.operation,
            agent_id = %entry.agent_id,
            actor_id = %entry.actor_id,
            "{}",
            entry.message
        ),
        LogLevel::Error => tracing::error!(
            operation = %entry.operation,
            agent_id = %entry.agent_id,
            actor_id = %entry.actor_id,
            "{}",
            entry.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use serde_json::json;

    use super::*;
    use crate::analytics::classify;

    fn ctx() -> ObservabilityContext {
        ObservabilityContext::new(&Config::default(), SinkForwarder::disabled())
    }

    fn messages(ctx: &ObservabilityContext) -> Vec<String> {
        ctx.recorder()
            .log_snapshot()
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_track_success() {
        let ctx = ctx();
        let value = ctx
            .track("publish", "abraham", "trainer-A", async {
                Ok::<_, io::Error>(42)
            })
            .await
            .expect("operation succeeds");

        assert_eq!(value, 42);
        let samples = ctx.recorder().metric_snapshot();
        assert_eq!(samples.len(), 1);
        assert!(samples[0].success);
        assert!(samples[0].duration_ms >= 0);
        assert_eq!(samples[0].error, None);
        assert_eq!(messages(&ctx), vec!["Starting publish", "Completed publish"]);
    }

    #[tokio::test]
    async fn test_track_failure_returns_error_unchanged() {
        let ctx = ctx();
        let err = ctx
            .track("publish", "abraham", "trainer-A", async {
                Err::<(), _>(io::Error::new(io::ErrorKind::TimedOut, "Network timeout"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(err.to_string(), "Network timeout");

        let samples = ctx.recorder().metric_snapshot();
        assert_eq!(samples.len(), 1);
        assert!(!samples[0].success);
        assert_eq!(samples[0].error.as_deref(), Some("Network timeout"));

        let logs = ctx.recorder().log_snapshot();
        let errors: Vec<&Arc<LogEntry>> =
            logs.iter().filter(|e| e.level == LogLevel::Error).collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Failed publish: Network timeout");
        assert!(!logs.iter().any(|e| e.message.starts_with("Completed")));
    }

    #[tokio::test]
    async fn test_track_with_metadata() {
        let ctx = ctx();
        let metadata = json!({"size": 3}).as_object().cloned();

        ctx.track_with_metadata("curate", "abraham", "", metadata.clone(), async {
            Ok::<_, io::Error>(())
        })
        .await
        .expect("operation succeeds");

        let samples = ctx.recorder().metric_snapshot();
        assert_eq!(samples[0].metadata, metadata);
        let logs = ctx.recorder().log_snapshot();
        assert_eq!(logs[0].context, metadata);
        assert_eq!(logs[1].context, None);
    }

    #[test]
    fn test_track_sync() {
        let ctx = ctx();
        let ok: Result<u8, String> = ctx.track_sync("validate", "abraham", "u", || Ok(1));
        assert_eq!(ok, Ok(1));

        let err: Result<u8, String> =
            ctx.track_sync("validate", "abraham", "u", || Err("invalid input".to_string()));
        assert_eq!(err, Err("invalid input".to_string()));

        let a = ctx.get_analytics(None);
        assert_eq!(a.total_operations, 2);
        assert_eq!(a.error_summary.get(classify::VALIDATION), Some(&1));
    }

    #[tokio::test]
    async fn test_dropped_future_records_cancellation() {
        let ctx = ctx();
        let fut = ctx.track("mint", "abraham", "u", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, io::Error>(())
        });

        let outcome = tokio::time::timeout(Duration::from_millis(20), fut).await;
        assert!(outcome.is_err());

        let samples = ctx.recorder().metric_snapshot();
        assert_eq!(samples.len(), 1);
        assert!(!samples[0].success);
        assert_eq!(samples[0].error.as_deref(), Some(CANCELLED));
        assert!(samples[0].duration_ms >= 0);
        assert_eq!(
            messages(&ctx),
            vec!["Starting mint", "Failed mint: operation cancelled"]
        );
    }

    #[tokio::test]
    async fn test_track_timeout() {
        let ctx = ctx();
        let outcome = ctx
            .track_timeout("mint", "abraham", "u", Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, io::Error>(())
            })
            .await;
        assert!(outcome.is_err());

        let samples = ctx.recorder().metric_snapshot();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].error.as_deref(), Some("timeout after 10ms"));

        let a = ctx.get_analytics(None);
        assert_eq!(a.error_summary.get(classify::NETWORK_TIMEOUT), Some(&1));
    }

    #[tokio::test]
    async fn test_track_timeout_passes_inner_result() {
        let ctx = ctx();
        let outcome = ctx
            .track_timeout("mint", "abraham", "u", Duration::from_secs(5), async {
                Err::<(), _>("contract reverted".to_string())
            })
            .await;

        assert_eq!(outcome.ok(), Some(Err("contract reverted".to_string())));
        assert_eq!(
            ctx.recorder().metric_snapshot()[0].error.as_deref(),
            Some("contract reverted")
        );
    }

    #[test]
    fn test_log_levels_do_not_record_metrics() {
        let ctx = ctx();
        ctx.info("publish", "abraham", "u", "queued", None);
        ctx.warn("publish", "abraham", "u", "slow", None);
        ctx.error("publish", "abraham", "u", "broken", json!({"code": 7}).as_object().cloned());

        assert!(ctx.recorder().metric_snapshot().is_empty());
        let logs = ctx.get_logs(&LogFilter::new());
        let levels: Vec<LogLevel> = logs.iter().map(|e| e.level).collect();
        assert_eq!(levels.len(), 3);
        assert!(levels.contains(&LogLevel::Info));
        assert!(levels.contains(&LogLevel::Warn));
        assert!(levels.contains(&LogLevel::Error));

        let errors = ctx.get_logs(&LogFilter::new().level(LogLevel::Error));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].context.as_ref().map(|c| c["code"].clone()), Some(json!(7)));
    }

    #[test]
    fn test_custom_classifier() {
        let ctx = ctx().with_classifier(Arc::new(|_: &str| "Everything".to_string()));
        let _: Result<(), String> = ctx.track_sync("op", "a", "u", || Err("boom".to_string()));
        let a = ctx.get_analytics(None);
        assert_eq!(a.error_summary.get("Everything"), Some(&1));
    }

    #[test]
    fn test_export_uses_one_instant() {
        let ctx = ctx();
        for i in 0..3 {
            let _: Result<(), String> = ctx.track_sync("publish", "abraham", "u", || {
                if i == 0 {
                    Err("storage offline".to_string())
                } else {
                    Ok(())
                }
            });
        }

        let now = Utc::now();
        let export = ctx.export_metrics_at(now);
        let analytics = ctx.get_analytics_at(None, now);

        assert_eq!(
            export.json_snapshot["analytics"],
            serde_json::to_value(&analytics).expect("value")
        );
        assert!(export.prometheus_text.contains("operations_total 3"));
        assert_eq!(export.csv_text.lines().count(), 4);
        assert_eq!(
            export.json_snapshot["recentLogs"]
                .as_array()
                .map(Vec::len),
            Some(6)
        );
    }

    #[test]
    fn test_export_limits() {
        let mut cfg = Config::default();
        cfg.analytics.recent_logs = 2;
        cfg.analytics.csv_rows = 3;
        let ctx = ObservabilityContext::new(&cfg, SinkForwarder::disabled());

        for _ in 0..5 {
            let _: Result<(), String> = ctx.track_sync("publish", "abraham", "u", || Ok(()));
        }

        let export = ctx.export_metrics();
        assert_eq!(export.csv_text.lines().count(), 4);
        let recent = export.json_snapshot["recentLogs"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0]["message"], "Completed publish");
    }
}
