use serde::Serialize;

use crate::config::AlertThresholds;

use super::WindowedAnalytics;

/// Alerts raised by one evaluation. Nothing is remembered between calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertResult {
    pub critical_alerts: Vec<String>,
    pub warning_alerts: Vec<String>,
}

impl AlertResult {
    pub fn is_empty(&self) -> bool {
        self.critical_alerts.is_empty() && self.warning_alerts.is_empty()
    }
}

/// Applies threshold rules to windowed analytics.
#[derive(Debug, Clone, Default)]
pub struct AlertEvaluator {
    thresholds: AlertThresholds,
}

impl AlertEvaluator {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    pub fn evaluate(&self, analytics: &WindowedAnalytics) -> AlertResult {
        let t = &self.thresholds;
        let mut result = AlertResult::default();
        let total = analytics.total_operations;

        if total > t.min_operations_for_success_rate && analytics.success_rate < t.min_success_rate
        {
            result.critical_alerts.push(format!(
                "Low success rate: {:.1}% over {} operations",
                analytics.success_rate * 100.0,
                total,
            ));
        }

        if analytics.avg_duration_ms > t.max_avg_duration_ms {
            result.critical_alerts.push(format!(
                "High average latency: {:.1}s",
                analytics.avg_duration_ms / 1000.0,
            ));
        }

        for (category, count) in &analytics.error_summary {
            if *count > t.max_errors_per_category {
                result
                    .warning_alerts
                    .push(format!("High {category} error count: {count}"));
            }
        }

        if total > t.min_operations_for_dominance {
            for (actor, count) in &analytics.actor_activity {
                let share = *count as f64 / total as f64;
                if share > t.actor_dominance_ratio {
                    result.warning_alerts.push(format!(
                        "Actor {actor} accounts for {:.1}% of operations",
                        share * 100.0,
                    ));
                }
            }
        }

        result
    }
}
