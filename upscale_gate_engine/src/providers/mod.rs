//! # Payment provider payloads
//!
//! Each provider gets a small set of typed payload structs and an explicit mapping into the provider-neutral
//! [`PurchaseEvent`]. Provider payloads are loosely specified and change shape between API versions and event types,
//! so the models are deliberately permissive: everything is optional and unknown fields are ignored. The mapping
//! functions spell out the priority order used when the same datum may appear in several places.
use std::fmt::Display;

use serde::Deserialize;
use serde_json::Value;

use crate::db_types::PaymentProvider;

mod creem;
mod paddle;

pub use creem::{CreemEvent, CreemObject, CREEM_GRANT_EVENTS};
pub use paddle::{PaddleEvent, PaddleEventData, PADDLE_GRANT_EVENTS};

/// A purchase, as far as entitlement reconciliation is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseEvent {
    pub event_id: Option<String>,
    pub event_type: String,
    pub price_id: String,
    /// Always at least 1.
    pub quantity: u64,
    pub install_id: Option<String>,
    pub email: Option<String>,
    pub subscription_id: Option<String>,
    pub transaction_id: Option<String>,
}

/// Why a verified webhook delivery did not result in an entitlement write. None of these are errors: the provider
/// always gets a 2xx for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The event type is not on the grant allow-list.
    NotAGrantEvent(String),
    /// The payload does not name a price or product.
    MissingPriceId,
    /// The price/product is not one we sell entitlements for.
    UnmappedPrice(String),
    /// Neither an installation id nor an email could be found.
    NoIdentity,
}

impl Display for IgnoreReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAGrantEvent(event_type) => write!(f, "{event_type}"),
            Self::MissingPriceId => write!(f, "missing_price_id"),
            Self::UnmappedPrice(_) => write!(f, "unmapped_price"),
            Self::NoIdentity => write!(f, "no_identity"),
        }
    }
}

/// Common behaviour of the typed provider payloads.
pub trait ProviderEvent {
    const PROVIDER: PaymentProvider;

    /// The provider's stable id for this delivery, if it has one. Used for deduplication.
    fn event_id(&self) -> Option<&str>;

    fn event_type(&self) -> &str;

    /// Whether this event type grants an entitlement.
    fn is_grant(&self) -> bool;

    /// Maps the payload into a [`PurchaseEvent`]. Identity is left unresolved (`None`) rather than failing, so that
    /// the caller can check the price mapping first.
    fn into_purchase(self) -> Result<PurchaseEvent, IgnoreReason>;
}

/// Installation and customer hints that checkouts carry in free-form metadata ("custom data").
///
/// The extension and the web checkout have used different key spellings over time. Values may arrive as strings or
/// numbers.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CheckoutMetadata {
    #[serde(default, rename = "installId")]
    pub install_id_camel: Option<Value>,
    #[serde(default)]
    pub install_id: Option<Value>,
    #[serde(default, rename = "installationId")]
    pub installation_id: Option<Value>,
    #[serde(default)]
    pub extension_install_id: Option<Value>,
    #[serde(default)]
    pub email: Option<Value>,
}

impl CheckoutMetadata {
    /// Priority: `installId`, `install_id`, `installationId`, `extension_install_id`.
    pub fn install_id(&self) -> Option<String> {
        [&self.install_id_camel, &self.install_id, &self.installation_id, &self.extension_install_id]
            .into_iter()
            .find_map(|v| lenient_string(v.as_ref()))
    }

    pub fn email(&self) -> Option<String> {
        lenient_string(self.email.as_ref())
    }
}

/// Non-empty, trimmed string form of a JSON string or number.
pub(crate) fn lenient_string(value: Option<&Value>) -> Option<String> {
    let s = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

/// Purchased quantity. Absent, zero, negative or non-numeric values all count as 1.
pub(crate) fn lenient_quantity(value: Option<&Value>) -> u64 {
    let q = match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    q.filter(|q| *q > 0).unwrap_or(1)
}

pub(crate) fn first_some<T>(candidates: impl IntoIterator<Item = Option<T>>) -> Option<T> {
    candidates.into_iter().flatten().next()
}
