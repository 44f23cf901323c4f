//! Quota evaluation.

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::window::TimeWindow;
use crate::error::{Result, TurnstileError};

/// Default number of requests admitted per window.
pub const DEFAULT_REQUESTS_PER_LIMIT: u64 = 60;

/// Outcome of evaluating a counter against the quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Reject,
}

/// The quota applied to each key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    requests_per_limit: u64,
    window: TimeWindow,
}

impl RateLimitPolicy {
    /// Create a policy. The quota must be positive.
    pub fn new(requests_per_limit: u64, window: TimeWindow) -> Result<Self> {
        if requests_per_limit == 0 {
            return Err(TurnstileError::Config(
                "requests_per_limit must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            requests_per_limit,
            window,
        })
    }

    pub fn requests_per_limit(&self) -> u64 {
        self.requests_per_limit
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// Evaluate a post-increment counter value.
    ///
    /// The request that brings the counter to exactly the limit is still
    /// allowed; only counts strictly above it are rejected.
    pub fn evaluate(&self, count: u64) -> Verdict {
        if count > self.requests_per_limit {
            Verdict::Reject
        } else {
            Verdict::Allow
        }
    }

    /// Requests left in the window after `count` have been seen.
    pub fn remaining(&self, count: u64) -> u64 {
        self.requests_per_limit.saturating_sub(count)
    }

    /// How long a rejected caller should wait before the window rolls over.
    pub fn retry_after(&self, arrived_at: DateTime<Utc>) -> Duration {
        self.window.until_rollover(arrived_at)
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            requests_per_limit: DEFAULT_REQUESTS_PER_LIMIT,
            window: TimeWindow::default(),
        }
    }
}
