pub mod http;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::record::{LogEntry, MetricSample, RecordKind};

/// A record queued for delivery to an external sink.
#[derive(Debug, Clone)]
pub enum SinkRecord {
    Metric(Arc<MetricSample>),
    Log(Arc<LogEntry>),
}

impl SinkRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Metric(_) => RecordKind::Metric,
            Self::Log(_) => RecordKind::Log,
        }
    }
}

/// Errors returned when a record cannot be handed to the sink worker.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ForwardError {
    #[error("sink queue full")]
    QueueFull,

    #[error("sink worker stopped")]
    Closed,
}

/// Cheap, cloneable handle that enqueues records for background delivery.
///
/// Never blocks: records are offered with `try_send` and dropped when the
/// queue is full. A disabled forwarder accepts and discards everything.
#[derive(Debug, Clone, Default)]
pub struct SinkForwarder {
    tx: Option<mpsc::Sender<SinkRecord>>,
    metrics_enabled: bool,
    logs_enabled: bool,
}

impl SinkForwarder {
    /// A forwarder with no configured sinks.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub(crate) fn new(
        tx: mpsc::Sender<SinkRecord>,
        metrics_enabled: bool,
        logs_enabled: bool,
    ) -> Self {
        Self {
            tx: Some(tx),
            metrics_enabled,
            logs_enabled,
        }
    }

    /// Returns true if records of this kind are forwarded anywhere.
    pub fn is_enabled_for(&self, kind: RecordKind) -> bool {
        self.tx.is_some()
            && match kind {
                RecordKind::Metric => self.metrics_enabled,
                RecordKind::Log => self.logs_enabled,
            }
    }

    /// Offers a record to the delivery queue without waiting.
    pub fn forward(&self, record: SinkRecord) -> Result<(), ForwardError> {
        if !self.is_enabled_for(record.kind()) {
            return Ok(());
        }

        let Some(tx) = &self.tx else {
            return Ok(());
        };

        tx.try_send(record).map_err(|e| match e {
            TrySendError::Full(_) => ForwardError::QueueFull,
            TrySendError::Closed(_) => ForwardError::Closed,
        })
    }

    /// Number of records currently waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.tx
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }
}

/// Lock-free delivery outcome counters, keyed by record kind.
#[derive(Default)]
pub struct SinkStats {
    delivered: [AtomicU64; 2],
    failed: [AtomicU64; 2],
}

impl SinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_delivered(&self, kind: RecordKind) {
        self.delivered[index(kind)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, kind: RecordKind) {
        self.failed[index(kind)].fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically read and reset counters as `(kind, delivered, failed)`.
    pub fn snapshot(&self) -> Vec<(RecordKind, u64, u64)> {
        RecordKind::ALL
            .iter()
            .map(|&kind| {
                let i = index(kind);
                (
                    kind,
                    self.delivered[i].swap(0, Ordering::Relaxed),
                    self.failed[i].swap(0, Ordering::Relaxed),
                )
            })
            .filter(|(_, delivered, failed)| *delivered > 0 || *failed > 0)
            .collect()
    }
}

fn index(kind: RecordKind) -> usize {
    match kind {
        RecordKind::Metric => 0,
        RecordKind::Log => 1,
    }
}
