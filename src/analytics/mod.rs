//! Windowed statistics over stored metric samples.

pub mod alerts;
pub mod classify;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::record::MetricSample;
use crate::store::window_start;

pub use alerts::{AlertEvaluator, AlertResult};
pub use classify::{ErrorClassifier, KeywordClassifier, KeywordRule};

/// Statistics derived from the samples inside one time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowedAnalytics {
    pub total_operations: u64,
    /// Fraction of successful samples, within `[0, 1]`.
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    /// Operations per second over the whole window.
    pub throughput: f64,
    pub operation_breakdown: BTreeMap<String, u64>,
    pub actor_activity: BTreeMap<String, u64>,
    pub error_summary: BTreeMap<String, u64>,
}

/// Computes [`WindowedAnalytics`] from a snapshot of metric samples.
#[derive(Clone)]
pub struct Aggregator {
    classifier: Arc<dyn ErrorClassifier>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(Arc::new(KeywordClassifier::default()))
    }
}

impl Aggregator {
    pub fn new(classifier: Arc<dyn ErrorClassifier>) -> Self {
        Self { classifier }
    }

    /// Aggregates the samples with `timestamp >= now - window`.
    ///
    /// An empty window yields all-zero analytics. The mean uses raw
    /// durations. Failed samples with a negative duration or without an
    /// error message are summarized as [`classify::OTHER`]; both are logged.
    pub fn compute(
        &self,
        samples: &[Arc<MetricSample>],
        window: Duration,
        now: DateTime<Utc>,
    ) -> WindowedAnalytics {
        let since = window_start(now, window);
        let mut out = WindowedAnalytics::default();

        let mut successes = 0u64;
        let mut duration_sum = 0f64;
        let mut negative_durations = 0u64;
        let mut unexplained_failures = 0u64;

        for sample in samples
            .iter()
            .filter(|s| since.map_or(true, |since| s.timestamp >= since))
        {
            out.total_operations += 1;

            duration_sum += sample.duration_ms as f64;
            let skewed = sample.duration_ms < 0;
            if skewed {
                negative_durations += 1;
            }

            bump(&mut out.operation_breakdown, &sample.operation);
            if !sample.actor_id.is_empty() {
                bump(&mut out.actor_activity, &sample.actor_id);
            }

            if sample.success {
                successes += 1;
                continue;
            }

            match sample.error_message() {
                Some(_) if skewed => bump(&mut out.error_summary, classify::OTHER),
                Some(error) => bump(&mut out.error_summary, &self.classifier.classify(error)),
                None => {
                    unexplained_failures += 1;
                    bump(&mut out.error_summary, classify::OTHER);
                }
            }
        }

        if out.total_operations == 0 {
            return out;
        }

        let total = out.total_operations as f64;
        out.success_rate = successes as f64 / total;
        out.avg_duration_ms = duration_sum / total;

        let window_secs = window.as_secs_f64();
        if window_secs > 0.0 {
            out.throughput = total / window_secs;
        }

        if negative_durations > 0 {
            tracing::warn!(
                count = negative_durations,
                "negative sample durations included as recorded"
            );
        }
        if unexplained_failures > 0 {
            tracing::warn!(
                count = unexplained_failures,
                "failed samples without error message counted as other"
            );
        }

        out
    }
}

/// Increments `key`, allocating the key only on first sight.
fn bump(histogram: &mut BTreeMap<String, u64>, key: &str) {
    match histogram.get_mut(key) {
        Some(count) => *count += 1,
        None => {
            histogram.insert(key.to_owned(), 1);
        }
    }
}
