//! Immutable records produced by the instrumentation facade.
//!
//! Two streams exist: [`MetricSample`] (one per tracked operation) and
//! [`LogEntry`] (structured log lines). Both are created once, appended to
//! their ring buffer and never mutated afterwards.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Free-form key/value payload attached to samples and log entries.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Which of the two record streams a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Metric,
    Log,
}

impl RecordKind {
    /// All record kinds, in label order.
    pub const ALL: [RecordKind; 2] = [RecordKind::Metric, RecordKind::Log];

    /// Returns the label used in self-metrics and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Log => "log",
        }
    }
}

/// Outcome of a single tracked agent operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub operation: String,
    pub agent_id: String,
    pub actor_id: String,
    /// Start of the operation.
    pub timestamp: DateTime<Utc>,
    /// Elapsed wall time. Samples ingested from elsewhere may be negative
    /// under clock skew; the facade never produces one.
    pub duration_ms: i64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl MetricSample {
    /// Creates a successful sample.
    pub fn success(
        operation: impl Into<String>,
        agent_id: impl Into<String>,
        actor_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        duration_ms: i64,
    ) -> Self {
        Self {
            operation: operation.into(),
            agent_id: agent_id.into(),
            actor_id: actor_id.into(),
            timestamp,
            duration_ms,
            success: true,
            error: None,
            metadata: None,
        }
    }

    /// Creates a failed sample carrying the failure message.
    pub fn failure(
        operation: impl Into<String>,
        agent_id: impl Into<String>,
        actor_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        duration_ms: i64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            agent_id: agent_id.into(),
            actor_id: actor_id.into(),
            timestamp,
            duration_ms,
            success: false,
            error: Some(error.into()),
            metadata: None,
        }
    }

    /// Attaches metadata to the sample.
    pub fn with_metadata(mut self, metadata: Option<Metadata>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns the error message when it is present and non-empty.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }
}

/// Severity of a [`LogEntry`].
///
/// Serializes uppercase and deserializes through [`FromStr`], so query
/// strings and ingested entries accept any casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown log level name.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown log level: {0}")]
pub struct ParseLevelError(String);

impl TryFrom<String> for LogLevel {
    type Error = ParseLevelError;

    fn try_from(value: String) -> Result<Self, ParseLevelError> {
        value.parse()
    }
}

impl FromStr for LogLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Structured log line scoped to an agent operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub operation: String,
    pub agent_id: String,
    pub actor_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Metadata>,
}

impl LogEntry {
    pub fn new(
        level: LogLevel,
        operation: impl Into<String>,
        agent_id: impl Into<String>,
        actor_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            operation: operation.into(),
            agent_id: agent_id.into(),
            actor_id: actor_id.into(),
            timestamp,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Option<Metadata>) -> Self {
        self.context = context;
        self
    }
}
