use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::record::{LogEntry, LogLevel};

use super::window_start;

/// Filter for reading back log entries.
///
/// Deserializes from dashboard query strings (`?level=ERROR&limit=5`), so
/// field names follow the camelCase wire format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogFilter {
    pub level: Option<LogLevel>,
    pub operation: Option<String>,
    pub agent_id: Option<String>,
    pub actor_id: Option<String>,
    /// Only entries no older than this many milliseconds.
    pub window_ms: Option<u64>,
    /// Maximum number of entries, applied after filtering and sorting.
    pub limit: Option<usize>,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn actor_id(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window_ms = Some(u64::try_from(window.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, entry: &LogEntry, since: Option<DateTime<Utc>>) -> bool {
        if self.level.is_some_and(|level| entry.level != level) {
            return false;
        }
        if self
            .operation
            .as_deref()
            .is_some_and(|op| entry.operation != op)
        {
            return false;
        }
        if self
            .agent_id
            .as_deref()
            .is_some_and(|id| entry.agent_id != id)
        {
            return false;
        }
        if self
            .actor_id
            .as_deref()
            .is_some_and(|id| entry.actor_id != id)
        {
            return false;
        }
        since.map_or(true, |since| entry.timestamp >= since)
    }

    /// Applies the filter to an oldest-first snapshot, returning matches
    /// newest-first. Entries sharing a timestamp keep reverse append order.
    pub fn apply(&self, entries: Vec<Arc<LogEntry>>, now: DateTime<Utc>) -> Vec<Arc<LogEntry>> {
        let since = self
            .window_ms
            .and_then(|ms| window_start(now, Duration::from_millis(ms)));

        let mut matched: Vec<Arc<LogEntry>> = entries
            .into_iter()
            .rev()
            .filter(|entry| self.matches(entry, since))
            .collect();

        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }

        matched
    }
}
