use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

//--------------------------------------        Tier         ---------------------------------------------------------
/// The paid tier an entitlement grants. Early-bird is the capped-inventory discounted tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    EarlyBird,
    Standard,
}

impl Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::EarlyBird => write!(f, "early_bird"),
            Tier::Standard => write!(f, "standard"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid tier: {0}")]
pub struct TierParseError(String);

impl FromStr for Tier {
    type Err = TierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "early_bird" | "earlybird" | "early-bird" => Ok(Tier::EarlyBird),
            "standard" => Ok(Tier::Standard),
            _ => Err(TierParseError(s.to_string())),
        }
    }
}

//--------------------------------------   EntitlementRecord   -------------------------------------------------------
/// A purchased entitlement.
///
/// The same record is stored under up to two keys (installation id and lower-cased email). The copies are written
/// independently and can drift apart if only one of them is later overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementRecord {
    pub tier: Tier,
    /// The provider price/product id that produced this entitlement. Kept for audit only.
    pub price_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Epoch milliseconds of the last write.
    pub updated_at: i64,
    /// The webhook event type that triggered the write.
    pub source_event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

impl EntitlementRecord {
    pub fn has_lookup_key(&self) -> bool {
        let present = |v: &Option<String>| v.as_ref().is_some_and(|s| !s.trim().is_empty());
        present(&self.install_id) || present(&self.email)
    }
}

impl Display for EntitlementRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} via {} (install: {}, email: {}, event: {})",
            self.tier,
            self.price_id,
            self.install_id.as_deref().unwrap_or("-"),
            self.email.as_deref().unwrap_or("-"),
            self.source_event
        )
    }
}

//--------------------------------------  RateLimitDecision  ---------------------------------------------------------
/// The result of checking one fixed window for one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Epoch milliseconds at which the current window ends.
    pub reset_at: i64,
    /// Requests counted in the current window, including this one if it was allowed.
    pub count: u32,
}

impl RateLimitDecision {
    pub fn allowed(count: u32, max_requests: u32, reset_at: i64) -> Self {
        Self { allowed: true, remaining: max_requests.saturating_sub(count), reset_at, count }
    }

    pub fn denied(count: u32, reset_at: i64) -> Self {
        Self { allowed: false, remaining: 0, reset_at, count }
    }
}

//--------------------------------------   RateLimitEntry    ---------------------------------------------------------
/// A fixed-window counter for one identifier. Windows are never slid or partially reset: once `now > reset_at` the
/// entry is replaced by a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitEntry {
    pub count: u32,
    /// Epoch milliseconds at which this window expires.
    pub reset_at: i64,
}

impl RateLimitEntry {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.reset_at
    }

    /// Applies one request to the (possibly absent) entry and returns the updated entry along with the decision.
    ///
    /// Rejected requests are not counted, so `count` never exceeds `max_requests` once the window is full.
    pub fn admit(
        entry: Option<RateLimitEntry>,
        max_requests: u32,
        window_ms: i64,
        now_ms: i64,
    ) -> (RateLimitEntry, RateLimitDecision) {
        match entry.filter(|e| !e.is_expired(now_ms)) {
            None => {
                let fresh = RateLimitEntry { count: 0, reset_at: now_ms + window_ms };
                if max_requests == 0 {
                    return (fresh, RateLimitDecision::denied(0, fresh.reset_at));
                }
                let entry = RateLimitEntry { count: 1, ..fresh };
                (entry, RateLimitDecision::allowed(1, max_requests, entry.reset_at))
            },
            Some(e) if e.count >= max_requests => (e, RateLimitDecision::denied(e.count, e.reset_at)),
            Some(e) => {
                let entry = RateLimitEntry { count: e.count + 1, reset_at: e.reset_at };
                (entry, RateLimitDecision::allowed(entry.count, max_requests, entry.reset_at))
            },
        }
    }
}

//--------------------------------------      Provider       ---------------------------------------------------------
/// The payment providers whose webhooks we reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    /// Subscription/checkout provider. Signs `"{ts}:{body}"` and sends the timestamp in the signature header.
    Paddle,
    /// Alternate checkout provider. Signs the raw body.
    Creem,
}

impl Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentProvider::Paddle => write!(f, "paddle"),
            PaymentProvider::Creem => write!(f, "creem"),
        }
    }
}
