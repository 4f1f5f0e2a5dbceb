//! Daemon orchestration: sinks, the shared context, the health server and
//! the periodic stats and alert sweeps.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::context::ObservabilityContext;
use crate::export::health::HealthMetrics;
use crate::sink::http::HttpSink;
use crate::sink::SinkStats;

/// Owns every long-running component of the agentscope process.
pub struct Daemon {
    cfg: Config,
    health: Arc<HealthMetrics>,
    sink: HttpSink,
    context: Option<Arc<ObservabilityContext>>,
    local_addr: Option<SocketAddr>,
    cancel: CancellationToken,
}

impl Daemon {
    /// Creates a new daemon, initializing health metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);
        let sink = HttpSink::new(cfg.sinks.clone());

        Ok(Self {
            cfg,
            health,
            sink,
            context: None,
            local_addr: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Start all components.
    pub async fn start(&mut self) -> Result<()> {
        // 1. Sink worker first so the context can forward from its first record.
        let forwarder = self
            .sink
            .start(self.cancel.child_token())
            .with_context(|| format!("starting {} sink", self.sink.name()))?;

        // 2. Shared context.
        let context = Arc::new(ObservabilityContext::new(&self.cfg, forwarder));
        self.context = Some(Arc::clone(&context));

        // 3. Health and dashboard server.
        let addr = self
            .health
            .start(Arc::clone(&context))
            .await
            .context("starting health server")?;
        self.local_addr = Some(addr);

        // 4. Background sweeps.
        self.spawn_stats_reporter(Arc::clone(&context), self.sink.stats());
        self.spawn_alert_sweeper(context);

        info!(
            metrics_capacity = self.cfg.buffers.metrics_capacity,
            logs_capacity = self.cfg.buffers.logs_capacity,
            "daemon fully started"
        );

        Ok(())
    }

    /// Gracefully stop all components.
    pub async fn stop(&mut self) -> Result<()> {
        // Signal all background tasks to stop.
        self.cancel.cancel();

        // Wait for queued records to be delivered.
        if let Err(e) = self.sink.stop().await {
            error!(error = %e, "error stopping sink");
        }

        // Fold the final counters in before the server goes away.
        if let Some(context) = &self.context {
            self.health
                .observe_recorder(&context.recorder().stats().snapshot());
            self.health.observe_sinks(&self.sink.stats().snapshot());
        }

        self.health.stop().await?;

        info!("daemon stopped");

        Ok(())
    }

    /// The shared context, available once started.
    pub fn context(&self) -> Option<Arc<ObservabilityContext>> {
        self.context.as_ref().map(Arc::clone)
    }

    /// Address the health server is bound to, available once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Spawn the background reporter folding recorder and sink counters
    /// into health metrics.
    fn spawn_stats_reporter(&self, context: Arc<ObservabilityContext>, sink_stats: Arc<SinkStats>) {
        let cancel = self.cancel.clone();
        let health = Arc::clone(&self.health);
        let interval = self.cfg.health.stats_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let recorder = context.recorder();
                        let deltas = recorder.stats().snapshot();
                        health.observe_recorder(&deltas);
                        health.observe_sinks(&sink_stats.snapshot());
                        health.observe_occupancy(recorder);

                        for (kind, counts) in &deltas {
                            debug!(
                                kind = kind.as_str(),
                                appended = counts.appended,
                                evicted = counts.evicted,
                                forward_dropped = counts.forward_dropped,
                                "recorder stats",
                            );
                        }
                    }
                }
            }
        });
    }

    /// Spawn the periodic alert sweep, logging every raised alert.
    fn spawn_alert_sweeper(&self, context: Arc<ObservabilityContext>) {
        let cancel = self.cancel.clone();
        let health = Arc::clone(&self.health);
        let interval = self.cfg.alerts.check_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let alerts = context.check_alerts();
                        health.observe_alerts(&alerts);

                        for alert in &alerts.critical_alerts {
                            error!(alert = %alert, "critical alert");
                        }
                        for alert in &alerts.warning_alerts {
                            warn!(alert = %alert, "warning alert");
                        }
                    }
                }
            }
        });
    }
}
