//! `KvRestStore` is the shared backend for horizontally scaled deployments.
//!
//! Entitlements are stored as JSON strings, counters as native integers, dedup markers as `SET NX EX` keys and rate
//! limits as `INCR` counters whose TTL is the window. The KV service offers no multi-key transactions, so writes to
//! different keys are independent.
use std::fmt::Debug;

use chrono::Duration;
use log::*;
use serde_json::Value;

use super::client::{as_integer, KvConfig, KvError, KvRestClient};
use crate::{
    db_types::{EntitlementRecord, PaymentProvider, RateLimitDecision},
    traits::{
        webhook_dedup::dedup_key,
        DedupError,
        EntitlementError,
        EntitlementManagement,
        RateLimitError,
        RateLimitStore,
        WebhookDedup,
    },
};

#[derive(Clone)]
pub struct KvRestStore {
    client: KvRestClient,
}

impl Debug for KvRestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KvRestStore ({})", self.client.base_url())
    }
}

impl KvRestStore {
    pub fn new(config: KvConfig) -> Result<Self, KvError> {
        let client = KvRestClient::new(config)?;
        info!("🗄️ Using REST KV backend at {}", client.base_url());
        Ok(Self { client })
    }

    pub fn client(&self) -> &KvRestClient {
        &self.client
    }
}

pub fn rate_limit_key(identifier: &str, window_ms: i64) -> String {
    format!("ratelimit:{identifier}:{window_ms}")
}

impl EntitlementManagement for KvRestStore {
    async fn fetch_entitlement(&self, key: &str) -> Result<Option<EntitlementRecord>, EntitlementError> {
        match self.client.get(key).await? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| EntitlementError::SerializationError(format!("{key}: {e}"))),
            None => Ok(None),
        }
    }

    async fn store_entitlement(&self, key: &str, record: &EntitlementRecord) -> Result<(), EntitlementError> {
        let json = serde_json::to_string(record).map_err(|e| EntitlementError::SerializationError(e.to_string()))?;
        self.client.set(key, &json).await?;
        Ok(())
    }

    async fn increment_counter(&self, key: &str, amount: u64) -> Result<u64, EntitlementError> {
        let value = self.client.incr_by(key, amount).await?;
        u64::try_from(value).map_err(|_| EntitlementError::BackendError(format!("counter {key} is negative: {value}")))
    }

    async fn fetch_counter(&self, key: &str) -> Result<Option<String>, EntitlementError> {
        Ok(self.client.get(key).await?)
    }
}

impl WebhookDedup for KvRestStore {
    async fn claim_event(
        &self,
        provider: PaymentProvider,
        event_id: &str,
        _now_ms: i64,
        retention: Duration,
    ) -> Result<bool, DedupError> {
        let key = dedup_key(provider, event_id);
        Ok(self.client.set_nx_ex(&key, "1", retention.num_seconds()).await?)
    }

    async fn release_event(&self, provider: PaymentProvider, event_id: &str) -> Result<(), DedupError> {
        Ok(self.client.del(&dedup_key(provider, event_id)).await?)
    }
}

impl RateLimitStore for KvRestStore {
    async fn check_window(
        &self,
        identifier: &str,
        max_requests: u32,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let key = rate_limit_key(identifier, window_ms);
        let window = window_ms.to_string();
        // INCR opens the window, PEXPIRE NX only sets the TTL on the first hit, PTTL tells us when the window closes
        let commands = vec![
            vec!["INCR".to_string(), key.clone()],
            vec!["PEXPIRE".to_string(), key.clone(), window, "NX".to_string()],
            vec!["PTTL".to_string(), key],
        ];
        let replies = self.client.pipeline(&commands).await?;
        let count = as_integer(replies.first().unwrap_or(&Value::Null))?;
        let ttl = as_integer(replies.get(2).unwrap_or(&Value::Null))?;
        Ok(decision_from_counter(count, ttl, max_requests, window_ms, now_ms))
    }

    async fn purge_expired(&self, _now_ms: i64) -> Result<usize, RateLimitError> {
        Ok(0)
    }
}

/// Converts the raw `INCR`/`PTTL` replies into a decision. The counter keeps incrementing past the limit on the KV
/// side, but the reported count is capped at `max_requests`.
fn decision_from_counter(count: i64, ttl_ms: i64, max_requests: u32, window_ms: i64, now_ms: i64) -> RateLimitDecision {
    // A negative TTL means the key has no expiry (-1) or vanished between commands (-2). Treat it as a full window.
    let reset_at = now_ms + if ttl_ms >= 0 { ttl_ms } else { window_ms };
    let count = u32::try_from(count.max(0)).unwrap_or(u32::MAX);
    if count <= max_requests && max_requests > 0 {
        RateLimitDecision::allowed(count, max_requests, reset_at)
    } else {
        RateLimitDecision::denied(count.min(max_requests), reset_at)
    }
}
