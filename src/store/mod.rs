//! Bounded in-memory storage for metric samples and log entries.

pub mod query;
pub mod recorder;
pub mod ring;
pub mod stats;

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

pub use query::LogFilter;
pub use recorder::EventRecorder;
pub use ring::RingBuffer;
pub use stats::{KindCounts, RecorderStats};

/// Returns the inclusive lower bound of a window ending at `now`.
///
/// `None` means the window reaches past the representable range, so no
/// record is excluded.
pub fn window_start(now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    let delta = TimeDelta::from_std(window).ok()?;
    now.checked_sub_signed(delta)
}
