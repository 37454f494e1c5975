//! `StoreBackend` lets the server pick a storage backend from configuration without making every API generic over a
//! runtime choice.
use std::fmt::Debug;

use chrono::Duration;

use crate::{
    db_types::{EntitlementRecord, PaymentProvider, RateLimitDecision},
    kv::KvRestStore,
    memory::MemoryStore,
    traits::{
        DedupError,
        EntitlementError,
        EntitlementManagement,
        RateLimitError,
        RateLimitStore,
        WebhookDedup,
    },
};

#[derive(Clone)]
pub enum StoreBackend {
    Memory(MemoryStore),
    Kv(KvRestStore),
}

impl Debug for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory(m) => write!(f, "{m:?}"),
            Self::Kv(k) => write!(f, "{k:?}"),
        }
    }
}

impl From<MemoryStore> for StoreBackend {
    fn from(store: MemoryStore) -> Self {
        Self::Memory(store)
    }
}

impl From<KvRestStore> for StoreBackend {
    fn from(store: KvRestStore) -> Self {
        Self::Kv(store)
    }
}

impl EntitlementManagement for StoreBackend {
    async fn fetch_entitlement(&self, key: &str) -> Result<Option<EntitlementRecord>, EntitlementError> {
        match self {
            Self::Memory(s) => s.fetch_entitlement(key).await,
            Self::Kv(s) => s.fetch_entitlement(key).await,
        }
    }

    async fn store_entitlement(&self, key: &str, record: &EntitlementRecord) -> Result<(), EntitlementError> {
        match self {
            Self::Memory(s) => s.store_entitlement(key, record).await,
            Self::Kv(s) => s.store_entitlement(key, record).await,
        }
    }

    async fn increment_counter(&self, key: &str, amount: u64) -> Result<u64, EntitlementError> {
        match self {
            Self::Memory(s) => s.increment_counter(key, amount).await,
            Self::Kv(s) => s.increment_counter(key, amount).await,
        }
    }

    async fn fetch_counter(&self, key: &str) -> Result<Option<String>, EntitlementError> {
        match self {
            Self::Memory(s) => s.fetch_counter(key).await,
            Self::Kv(s) => s.fetch_counter(key).await,
        }
    }
}

impl WebhookDedup for StoreBackend {
    async fn claim_event(
        &self,
        provider: PaymentProvider,
        event_id: &str,
        now_ms: i64,
        retention: Duration,
    ) -> Result<bool, DedupError> {
        match self {
            Self::Memory(s) => s.claim_event(provider, event_id, now_ms, retention).await,
            Self::Kv(s) => s.claim_event(provider, event_id, now_ms, retention).await,
        }
    }

    async fn release_event(&self, provider: PaymentProvider, event_id: &str) -> Result<(), DedupError> {
        match self {
            Self::Memory(s) => s.release_event(provider, event_id).await,
            Self::Kv(s) => s.release_event(provider, event_id).await,
        }
    }
}

impl RateLimitStore for StoreBackend {
    async fn check_window(
        &self,
        identifier: &str,
        max_requests: u32,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        match self {
            Self::Memory(s) => s.check_window(identifier, max_requests, window_ms, now_ms).await,
            Self::Kv(s) => s.check_window(identifier, max_requests, window_ms, now_ms).await,
        }
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<usize, RateLimitError> {
        match self {
            Self::Memory(s) => s.purge_expired(now_ms).await,
            Self::Kv(s) => s.purge_expired(now_ms).await,
        }
    }
}
