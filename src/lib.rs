//! In-process instrumentation, windowed analytics and alerting for agent
//! operations.
//!
//! Build an [`ObservabilityContext`], wrap operations with
//! [`track`](ObservabilityContext::track), and read back analytics, logs,
//! alerts and exports. The [`daemon`] module wires the same context to an
//! HTTP dashboard and external sinks.

pub mod analytics;
pub mod config;
pub mod context;
pub mod daemon;
pub mod export;
pub mod record;
pub mod sink;
pub mod store;

pub use analytics::{AlertResult, WindowedAnalytics};
pub use config::Config;
pub use context::ObservabilityContext;
pub use export::MetricsExport;
pub use record::{LogEntry, LogLevel, Metadata, MetricSample};
pub use store::LogFilter;
