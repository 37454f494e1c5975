//! `MemoryStore` keeps all gateway state in process memory.
//!
//! It is the default backend for single-instance deployments and the backend used throughout the test suite. Nothing
//! survives a restart, and every instance in a horizontally scaled deployment gets its own independent counters, so
//! effective rate limits multiply by the number of instances.
use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::Duration;
use log::*;

use crate::{
    db_types::{EntitlementRecord, PaymentProvider, RateLimitDecision, RateLimitEntry},
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

#[derive(Default)]
struct MemoryState {
    entitlements: HashMap<String, EntitlementRecord>,
    counters: HashMap<String, String>,
    rate_limits: HashMap<String, RateLimitEntry>,
    /// Event key -> epoch ms at which the marker expires
    dedup_markers: HashMap<String, i64>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        write!(
            f,
            "MemoryStore ({} entitlements, {} counters, {} rate limit entries, {} dedup markers)",
            state.entitlements.len(),
            state.counters.len(),
            state.rate_limits.len(),
            state.dedup_markers.len()
        )
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the lock cannot leave the maps half-updated, so the poison flag is ignored
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Overwrites a counter with an arbitrary raw value.
    pub fn set_counter_raw(&self, key: &str, value: &str) {
        self.lock().counters.insert(key.to_string(), value.to_string());
    }

    pub fn rate_limit_entry(&self, identifier: &str) -> Option<RateLimitEntry> {
        self.lock().rate_limits.get(identifier).copied()
    }

    /// The number of entitlement writes held by the store. Each key counts separately.
    pub fn entitlement_count(&self) -> usize {
        self.lock().entitlements.len()
    }
}

impl EntitlementManagement for MemoryStore {
    async fn fetch_entitlement(&self, key: &str) -> Result<Option<EntitlementRecord>, EntitlementError> {
        Ok(self.lock().entitlements.get(key).cloned())
    }

    async fn store_entitlement(&self, key: &str, record: &EntitlementRecord) -> Result<(), EntitlementError> {
        trace!("🧠️ Storing entitlement under {key}");
        self.lock().entitlements.insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn increment_counter(&self, key: &str, amount: u64) -> Result<u64, EntitlementError> {
        let mut state = self.lock();
        let current = match state.counters.get(key) {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .map_err(|_| EntitlementError::BackendError(format!("counter {key} is not an integer")))?,
            None => 0,
        };
        let next = current.saturating_add(amount);
        state.counters.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn fetch_counter(&self, key: &str) -> Result<Option<String>, EntitlementError> {
        Ok(self.lock().counters.get(key).cloned())
    }
}

impl WebhookDedup for MemoryStore {
    async fn claim_event(
        &self,
        provider: PaymentProvider,
        event_id: &str,
        now_ms: i64,
        retention: Duration,
    ) -> Result<bool, DedupError> {
        let key = dedup_key(provider, event_id);
        let mut state = self.lock();
        match state.dedup_markers.get(&key) {
            Some(expires_at) if *expires_at >= now_ms => Ok(false),
            _ => {
                state.dedup_markers.insert(key, now_ms + retention.num_milliseconds());
                Ok(true)
            },
        }
    }

    async fn release_event(&self, provider: PaymentProvider, event_id: &str) -> Result<(), DedupError> {
        self.lock().dedup_markers.remove(&dedup_key(provider, event_id));
        Ok(())
    }
}

impl RateLimitStore for MemoryStore {
    async fn check_window(
        &self,
        identifier: &str,
        max_requests: u32,
        window_ms: i64,
        now_ms: i64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let mut state = self.lock();
        let current = state.rate_limits.get(identifier).copied();
        let (entry, decision) = RateLimitEntry::admit(current, max_requests, window_ms, now_ms);
        state.rate_limits.insert(identifier.to_string(), entry);
        Ok(decision)
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<usize, RateLimitError> {
        let mut state = self.lock();
        let before = state.rate_limits.len() + state.dedup_markers.len();
        state.rate_limits.retain(|_, e| !e.is_expired(now_ms));
        state.dedup_markers.retain(|_, expires_at| *expires_at >= now_ms);
        Ok(before - state.rate_limits.len() - state.dedup_markers.len())
    }
}
