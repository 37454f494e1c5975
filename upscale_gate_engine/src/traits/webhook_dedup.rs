use chrono::Duration;
use thiserror::Error;

use crate::db_types::PaymentProvider;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Webhook dedup backend error: {0}")]
pub struct DedupError(pub String);

/// Remembers which webhook deliveries have been processed, so that provider retries are not credited twice.
#[allow(async_fn_in_trait)]
pub trait WebhookDedup: Clone {
    /// Records `event_id` as processed, unless it already is.
    ///
    /// Returns `true` if this call created the marker (i.e. this is the first delivery), and `false` if the marker
    /// already existed. Check-and-set is a single operation, so two concurrent deliveries of the same event cannot
    /// both see `true`. Markers expire after `retention`.
    async fn claim_event(
        &self,
        provider: PaymentProvider,
        event_id: &str,
        now_ms: i64,
        retention: Duration,
    ) -> Result<bool, DedupError>;

    /// Removes the marker for `event_id`, so that a redelivery will be processed again.
    async fn release_event(&self, provider: PaymentProvider, event_id: &str) -> Result<(), DedupError>;
}

pub fn dedup_key(provider: PaymentProvider, event_id: &str) -> String {
    format!("webhook:{provider}:{event_id}")
}
