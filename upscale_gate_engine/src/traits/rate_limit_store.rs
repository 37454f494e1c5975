use thiserror::Error;

use crate::db_types::RateLimitDecision;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Rate limit backend error: {0}")]
pub struct RateLimitError(pub String);

/// Fixed-window request counters.
#[allow(async_fn_in_trait)]
pub trait RateLimitStore: Clone {
    /// Counts one request against `identifier` in a window of `window_ms` milliseconds and decides whether it is
    /// admitted. See [`crate::db_types::RateLimitEntry::admit`] for the exact semantics.
    async fn check_window(
        &self,
        identifier: &str,
        max_requests: u32,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<RateLimitDecision, RateLimitError>;

    /// Drops counters (and any other expiring state) whose window has closed. Returns the number of entries removed.
    /// Backends with native key expiry have nothing to do here.
    async fn purge_expired(&self, now_ms: i64) -> Result<usize, RateLimitError>;
}
