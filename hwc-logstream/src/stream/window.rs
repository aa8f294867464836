//! Fetch window sizing and re-enqueue delay.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Window bounds derived from the tailer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    /// Safety margin kept between a window's end and now; the provider may
    /// still be ingesting the most recent entries.
    pub max_end_from_now: TimeDelta,
    /// Upper bound on the span of one window.
    pub max_fetch_range: TimeDelta,
    /// Lookahead a stream must have available before it is offered again.
    pub min_fetch_range: TimeDelta,
    /// Backlog beyond which a stream's start cursor is fast-forwarded.
    pub max_lag: TimeDelta,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            max_end_from_now: TimeDelta::minutes(1),
            max_fetch_range: TimeDelta::minutes(5),
            min_fetch_range: TimeDelta::minutes(1),
            max_lag: TimeDelta::hours(24),
        }
    }
}

impl WindowPolicy {
    /// Upper bound of the window starting at `cursor_start`.
    pub fn target_end(&self, cursor_start: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        let settled = now - self.max_end_from_now;
        let capped = cursor_start + self.max_fetch_range;
        settled.min(capped)
    }

    /// How long to wait before offering a stream whose window starts at
    /// `cursor_start` to the workers again.
    pub fn enqueue_delay(&self, cursor_start: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        let ready_at = cursor_start + self.max_end_from_now + self.min_fetch_range;
        (ready_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}
