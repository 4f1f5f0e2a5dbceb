use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::{SinkCompression, SinksConfig};
use crate::record::RecordKind;

use super::{SinkForwarder, SinkRecord, SinkStats};

/// HTTP JSON sink with a bounded queue and a bounded pool of deliveries.
///
/// Each record is sent as its own POST to the endpoint configured for its
/// kind. Failures are logged and counted, never retried.
pub struct HttpSink {
    cfg: SinksConfig,
    stats: Arc<SinkStats>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl HttpSink {
    /// Creates a new HTTP sink with the given configuration.
    pub fn new(cfg: SinksConfig) -> Self {
        Self {
            cfg,
            stats: Arc::new(SinkStats::new()),
            cancel: None,
            task: None,
        }
    }

    /// Returns the sink name for logging.
    pub fn name(&self) -> &str {
        "http"
    }

    /// Returns the shared delivery counters.
    pub fn stats(&self) -> Arc<SinkStats> {
        Arc::clone(&self.stats)
    }

    /// Start the background delivery task and return the handle that feeds it.
    ///
    /// Without any configured endpoint no task is spawned and the returned
    /// forwarder is disabled.
    pub fn start(&mut self, ctx: CancellationToken) -> Result<SinkForwarder> {
        if !self.cfg.is_enabled() {
            tracing::info!("no sink endpoints configured, forwarding disabled");
            return Ok(SinkForwarder::disabled());
        }
        if self.cfg.max_queue_size == 0 {
            bail!("sink max_queue_size must be positive");
        }
        if self.cfg.workers == 0 {
            bail!("sink workers must be positive");
        }

        let (tx, rx) = mpsc::channel::<SinkRecord>(self.cfg.max_queue_size);

        let mut client_builder = reqwest::Client::builder().timeout(self.cfg.export_timeout);

        if !self.cfg.keep_alive {
            client_builder = client_builder.pool_max_idle_per_host(0);
        }

        let client = client_builder.build().context("building HTTP client")?;

        let worker = DeliveryWorker {
            client,
            cfg: Arc::new(self.cfg.clone()),
            stats: Arc::clone(&self.stats),
            in_flight: JoinSet::new(),
        };

        self.cancel = Some(ctx.clone());
        self.task = Some(tokio::spawn(worker.run(rx, ctx)));

        tracing::info!(
            log_url = %self.cfg.log_url,
            metrics_url = %self.cfg.metrics_url,
            compression = %self.cfg.compression,
            workers = self.cfg.workers,
            "sink forwarder started",
        );

        Ok(SinkForwarder::new(
            tx,
            self.cfg.url_for(RecordKind::Metric).is_some(),
            self.cfg.url_for(RecordKind::Log).is_some(),
        ))
    }

    /// Stop the delivery task, draining queued records first.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }

        if let Some(task) = self.task.take() {
            task.await.context("joining sink delivery task")?;
        }

        Ok(())
    }
}

struct DeliveryWorker {
    client: reqwest::Client,
    cfg: Arc<SinksConfig>,
    stats: Arc<SinkStats>,
    in_flight: JoinSet<()>,
}

impl DeliveryWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<SinkRecord>, ctx: CancellationToken) {
        loop {
            self.wait_for_slot().await;

            tokio::select! {
                _ = ctx.cancelled() => break,

                record = rx.recv() => match record {
                    Some(record) => self.spawn_delivery(record),
                    None => break,
                },

                joined = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Some(Err(e)) = joined {
                        log_join_error(e);
                    }
                }
            }
        }

        // Deliver whatever is still queued, then wait for in-flight requests.
        rx.close();
        let mut drained = 0usize;
        while let Some(record) = rx.recv().await {
            self.wait_for_slot().await;
            self.spawn_delivery(record);
            drained += 1;
        }

        while let Some(joined) = self.in_flight.join_next().await {
            if let Err(e) = joined {
                log_join_error(e);
            }
        }

        tracing::debug!(drained, "sink delivery task stopped");
    }

    /// Waits until fewer than `workers` deliveries are in flight.
    async fn wait_for_slot(&mut self) {
        while self.in_flight.len() >= self.cfg.workers {
            if let Some(Err(e)) = self.in_flight.join_next().await {
                log_join_error(e);
            }
        }
    }

    fn spawn_delivery(&mut self, record: SinkRecord) {
        let kind = record.kind();
        let Some(url) = self.cfg.url_for(kind).map(str::to_owned) else {
            return;
        };

        let client = self.client.clone();
        let cfg = Arc::clone(&self.cfg);
        let stats = Arc::clone(&self.stats);

        self.in_flight.spawn(async move {
            match send_record(&client, &cfg, &url, &record).await {
                Ok(()) => stats.record_delivered(kind),
                Err(e) => {
                    stats.record_failed(kind);
                    tracing::warn!(sink = kind.as_str(), error = %e, "sink delivery failed");
                }
            }
        });
    }
}

fn log_join_error(e: JoinError) {
    tracing::debug!(error = %e, "sink delivery task join failed");
}

/// Sends one record via HTTP.
async fn send_record(
    client: &reqwest::Client,
    cfg: &SinksConfig,
    url: &str,
    record: &SinkRecord,
) -> Result<()> {
    let body = match record {
        SinkRecord::Metric(sample) => serde_json::to_vec(&**sample),
        SinkRecord::Log(entry) => serde_json::to_vec(&**entry),
    }
    .context("serializing record to JSON")?;

    let raw_len = body.len();

    let encoded = cfg
        .compression
        .encode(body)
        .with_context(|| format!("{} encoding record", cfg.compression))?;

    let mut request = client
        .post(url)
        .header("Content-Type", "application/json")
        .body(encoded);

    if let Some(encoding) = cfg.compression.header_value() {
        request = request.header("Content-Encoding", encoding);
    }

    for (k, v) in &cfg.headers {
        request = request.header(k.as_str(), v.as_str());
    }

    let resp = request.send().await.context("sending record to sink")?;

    let status = resp.status();
    // Drain body for connection reuse.
    let _ = resp.bytes().await;

    if !status.is_success() {
        bail!("sink returned unexpected status: {status}");
    }

    tracing::trace!(
        sink = record.kind().as_str(),
        bytes = raw_len,
        "delivered record to sink",
    );

    Ok(())
}

impl SinkCompression {
    /// Encodes a request body; `None` passes it through unchanged.
    fn encode(self, body: Vec<u8>) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(body),
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), GzLevel::default());
                encoder.write_all(&body).context("gzip write")?;
                encoder.finish().context("gzip finish")
            }
            Self::Zstd => zstd::bulk::compress(&body, 0).context("zstd encode"),
        }
    }

    /// `Content-Encoding` header value, absent for uncompressed bodies.
    fn header_value(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            encoded => Some(encoded.as_str()),
        }
    }
}
