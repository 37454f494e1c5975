use std::{collections::HashMap, fmt::Debug};

use chrono::Duration;
use log::*;
use thiserror::Error;

use crate::{
    clock::SharedClock,
    db_types::{EntitlementRecord, PaymentProvider, Tier},
    providers::{IgnoreReason, ProviderEvent, PurchaseEvent},
    traits::{EntitlementError, EntitlementManagement, WebhookDedup},
    upg_api::entitlement_api::EntitlementApi,
};

pub const DEFAULT_DEDUP_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("Could not record the entitlement: {0}")]
    EntitlementWriteFailed(#[from] EntitlementError),
}

/// What happened to a verified webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Granted(EntitlementRecord),
    /// The event id was seen before. Nothing was written.
    Duplicate,
    Ignored(IgnoreReason),
}

/// Server-side mapping from provider price/product ids to tiers. Tiers claimed inside a payload are never trusted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierMap {
    tiers: HashMap<String, Tier>,
}

impl TierMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a mapping. Blank ids are skipped so that unset configuration never matches anything.
    pub fn with(mut self, price_id: &str, tier: Tier) -> Self {
        let id = price_id.trim();
        if !id.is_empty() {
            self.tiers.insert(id.to_string(), tier);
        }
        self
    }

    pub fn resolve(&self, price_id: &str) -> Option<Tier> {
        self.tiers.get(price_id.trim()).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// The first price id mapped to `tier`, if any.
    pub fn price_for(&self, tier: Tier) -> Option<&str> {
        let mut ids = self.tiers.iter().filter(|(_, t)| **t == tier).map(|(id, _)| id.as_str()).collect::<Vec<_>>();
        ids.sort_unstable();
        ids.first().copied()
    }
}

/// `ReconcilerApi` turns verified provider events into entitlement writes, at most once per event id.
///
/// Signature checks and JSON parsing happen before an event gets here. The steps are:
/// 1. Claim the event id. A failed claim means a duplicate delivery. A backend error during the claim is logged and
///    processing continues, since rewriting an entitlement is harmless.
/// 2. Drop event types that are not on the provider's grant list.
/// 3. Map the price id to a tier. Unknown prices are ignored.
/// 4. Resolve an identity. Events with neither installation id nor email are ignored.
/// 5. Write the entitlement and, for early-bird purchases, add the quantity to the sold counter.
///
/// If step 5 fails the claim is released so that the provider's retry can succeed.
#[derive(Clone)]
pub struct ReconcilerApi<B> {
    db: B,
    entitlements: EntitlementApi<B>,
    tiers: TierMap,
    retention: Duration,
    clock: SharedClock,
}

impl<B> Debug for ReconcilerApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReconcilerApi ({} mapped prices)", self.tiers.tiers.len())
    }
}

impl<B: Clone> ReconcilerApi<B> {
    pub fn new(db: B, tiers: TierMap, clock: SharedClock) -> Self {
        let entitlements = EntitlementApi::new(db.clone());
        Self { db, entitlements, tiers, retention: Duration::days(DEFAULT_DEDUP_RETENTION_DAYS), clock }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn tiers(&self) -> &TierMap {
        &self.tiers
    }
}

impl<B> ReconcilerApi<B>
where B: EntitlementManagement + WebhookDedup
{
    pub async fn reconcile<E: ProviderEvent>(&self, event: E) -> Result<ReconcileOutcome, ReconcileError> {
        let provider = E::PROVIDER;
        let event_id = event.event_id().map(String::from);
        if let Some(id) = &event_id {
            if !self.claim(provider, id).await {
                info!("🧾️ {provider} event {id} was already processed");
                return Ok(ReconcileOutcome::Duplicate);
            }
        }
        if !event.is_grant() {
            debug!("🧾️ Ignoring {provider} event type {}", event.event_type());
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::NotAGrantEvent(event.event_type().to_string())));
        }
        let purchase = match event.into_purchase() {
            Ok(p) => p,
            Err(reason) => {
                warn!("🧾️ Ignoring {provider} event {}: {reason}", event_id.as_deref().unwrap_or("-"));
                return Ok(ReconcileOutcome::Ignored(reason));
            },
        };
        let result = self.grant(provider, purchase).await;
        if result.is_err() {
            if let Some(id) = &event_id {
                self.release(provider, id).await;
            }
        }
        result
    }

    async fn grant(&self, provider: PaymentProvider, purchase: PurchaseEvent) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(tier) = self.tiers.resolve(&purchase.price_id) else {
            info!("🧾️ {provider} price {} is not mapped to a tier. Ignoring.", purchase.price_id);
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::UnmappedPrice(purchase.price_id)));
        };
        if purchase.install_id.is_none() && purchase.email.is_none() {
            warn!("🧾️ {provider} {} purchase of {} has no installation id or email. Ignoring.", purchase.event_type, purchase.price_id);
            return Ok(ReconcileOutcome::Ignored(IgnoreReason::NoIdentity));
        }
        let record = EntitlementRecord {
            tier,
            price_id: purchase.price_id,
            install_id: purchase.install_id,
            email: purchase.email,
            updated_at: self.clock.now_millis(),
            source_event: purchase.event_type,
            subscription_id: purchase.subscription_id,
            transaction_id: purchase.transaction_id,
        };
        let record = self.entitlements.save(record).await?;
        if tier == Tier::EarlyBird {
            self.entitlements.increment_early_bird_sold(purchase.quantity).await?;
        }
        info!("🧾️ {provider} purchase reconciled: {record}");
        Ok(ReconcileOutcome::Granted(record))
    }

    async fn claim(&self, provider: PaymentProvider, event_id: &str) -> bool {
        match self.db.claim_event(provider, event_id, self.clock.now_millis(), self.retention).await {
            Ok(first) => first,
            Err(e) => {
                warn!("🧾️ Could not record {provider} event {event_id} as processed. Continuing anyway. {e}");
                true
            },
        }
    }

    async fn release(&self, provider: PaymentProvider, event_id: &str) {
        if let Err(e) = self.db.release_event(provider, event_id).await {
            error!("🧾️ Could not release {provider} event {event_id} after a failed write. Retries will be deduped. {e}");
        }
    }
}
