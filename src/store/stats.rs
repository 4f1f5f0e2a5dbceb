use std::sync::atomic::{AtomicU64, Ordering};

use crate::record::RecordKind;

/// Lock-free per-kind recorder counters.
///
/// `snapshot()` atomically reads and resets all counters, making it
/// suitable for periodic reporting without contention.
#[derive(Default)]
pub struct RecorderStats {
    appended: [AtomicU64; 2],
    evicted: [AtomicU64; 2],
    forward_dropped: [AtomicU64; 2],
}

/// Counter deltas for a single record kind since the previous snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    pub appended: u64,
    pub evicted: u64,
    pub forward_dropped: u64,
}

impl RecorderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_append(&self, kind: RecordKind) {
        self.appended[index(kind)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self, kind: RecordKind) {
        self.evicted[index(kind)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forward_drop(&self, kind: RecordKind) {
        self.forward_dropped[index(kind)].fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically read and reset all counters, returning only kinds with
    /// non-zero activity.
    pub fn snapshot(&self) -> Vec<(RecordKind, KindCounts)> {
        let mut result = Vec::new();

        for kind in RecordKind::ALL {
            let i = index(kind);
            let counts = KindCounts {
                appended: self.appended[i].swap(0, Ordering::Relaxed),
                evicted: self.evicted[i].swap(0, Ordering::Relaxed),
                forward_dropped: self.forward_dropped[i].swap(0, Ordering::Relaxed),
            };
            if counts != KindCounts::default() {
                result.push((kind, counts));
            }
        }

        result
    }
}

fn index(kind: RecordKind) -> usize {
    match kind {
        RecordKind::Metric => 0,
        RecordKind::Log => 1,
    }
}
