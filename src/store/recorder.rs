use std::sync::Arc;

use tracing::warn;

use crate::config::BufferConfig;
use crate::record::{LogEntry, MetricSample, RecordKind};
use crate::sink::{SinkForwarder, SinkRecord};

use super::ring::RingBuffer;
use super::stats::RecorderStats;

/// Appends records to their ring buffer and hands them to the sink forwarder.
///
/// Recording never fails: buffer evictions and forwarding drops are counted
/// in [`RecorderStats`] and logged, but the caller always gets the stored
/// record back.
pub struct EventRecorder {
    metrics: RingBuffer<MetricSample>,
    logs: RingBuffer<LogEntry>,
    forwarder: SinkForwarder,
    stats: Arc<RecorderStats>,
}

impl EventRecorder {
    pub fn new(buffers: &BufferConfig, forwarder: SinkForwarder) -> Self {
        Self {
            metrics: RingBuffer::new(buffers.metrics_capacity),
            logs: RingBuffer::new(buffers.logs_capacity),
            forwarder,
            stats: Arc::new(RecorderStats::new()),
        }
    }

    /// Stores a metric sample and offers it to the metrics sink.
    pub fn record_metric(&self, sample: MetricSample) -> Arc<MetricSample> {
        let sample = Arc::new(sample);
        self.push_metric(Arc::clone(&sample));
        sample
    }

    /// Stores a log entry and offers it to the log sink.
    pub fn record_log(&self, entry: LogEntry) -> Arc<LogEntry> {
        let entry = Arc::new(entry);
        self.push_log(Arc::clone(&entry));
        entry
    }

    /// Stores an already shared metric sample.
    pub fn push_metric(&self, sample: Arc<MetricSample>) {
        if self.metrics.push(Arc::clone(&sample)) {
            self.stats.record_eviction(RecordKind::Metric);
        }
        self.stats.record_append(RecordKind::Metric);
        self.forward(SinkRecord::Metric(sample));
    }

    /// Stores an already shared log entry.
    pub fn push_log(&self, entry: Arc<LogEntry>) {
        if self.logs.push(Arc::clone(&entry)) {
            self.stats.record_eviction(RecordKind::Log);
        }
        self.stats.record_append(RecordKind::Log);
        self.forward(SinkRecord::Log(entry));
    }

    fn forward(&self, record: SinkRecord) {
        let kind = record.kind();
        if let Err(e) = self.forwarder.forward(record) {
            self.stats.record_forward_drop(kind);
            warn!(kind = kind.as_str(), error = %e, "dropping record for sink");
        }
    }

    /// Oldest-first copy of all stored metric samples.
    pub fn metric_snapshot(&self) -> Vec<Arc<MetricSample>> {
        self.metrics.snapshot()
    }

    /// Oldest-first copy of all stored log entries.
    pub fn log_snapshot(&self) -> Vec<Arc<LogEntry>> {
        self.logs.snapshot()
    }

    /// Returns `(len, capacity)` of the buffer holding records of `kind`.
    pub fn occupancy(&self, kind: RecordKind) -> (usize, usize) {
        match kind {
            RecordKind::Metric => (self.metrics.len(), self.metrics.capacity()),
            RecordKind::Log => (self.logs.len(), self.logs.capacity()),
        }
    }

    pub fn forwarder(&self) -> &SinkForwarder {
        &self.forwarder
    }

    pub fn stats(&self) -> Arc<RecorderStats> {
        Arc::clone(&self.stats)
    }
}
