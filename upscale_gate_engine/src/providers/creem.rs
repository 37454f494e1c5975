use serde::Deserialize;
use serde_json::Value;

use super::{first_some, lenient_quantity, lenient_string, CheckoutMetadata, IgnoreReason, ProviderEvent, PurchaseEvent};
use crate::db_types::PaymentProvider;

pub const CREEM_GRANT_EVENTS: [&str; 3] = ["checkout.completed", "subscription.active", "subscription.paid"];

/// Creem webhook envelope. `object` is a checkout for `checkout.*` events and a subscription for `subscription.*`.
///
/// ```json
/// {
///   "id": "evt_5WHHcZPv7VS0YUsberIuOz",
///   "eventType": "checkout.completed",
///   "created_at": 1728734325927,
///   "object": { "id": "ch_4l0N34kxo16AhRKUHFUuXr", "object": "checkout", "product": { "id": "prod_d1AY2Sadk9YAvLI0pj97f" },
///               "order": { "id": "ord_4aDwWXjMLpes4Kj4XqNnUA", "transaction": "tran_..." },
///               "customer": { "id": "cust_...", "email": "a@b.com" }, "metadata": { "installId": "abc123" } }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CreemEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub object: CreemObject,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreemObject {
    #[serde(default)]
    pub id: Option<String>,
    /// The object kind, e.g. `checkout` or `subscription`.
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub product: Option<CreemRef>,
    #[serde(default)]
    pub order: Option<CreemOrder>,
    #[serde(default)]
    pub customer: Option<CreemRef>,
    #[serde(default)]
    pub subscription: Option<CreemRef>,
    #[serde(default)]
    pub metadata: Option<CheckoutMetadata>,
    #[serde(default)]
    pub units: Option<Value>,
    #[serde(default)]
    pub quantity: Option<Value>,
}

/// Related objects are either expanded or referenced by id.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CreemRef {
    Id(String),
    Expanded {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        email: Option<Value>,
    },
}

impl CreemRef {
    pub fn id(&self) -> Option<String> {
        let id = match self {
            CreemRef::Id(id) => Some(id),
            CreemRef::Expanded { id, .. } => id.as_ref(),
        };
        id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
    }

    pub fn email(&self) -> Option<String> {
        match self {
            CreemRef::Id(_) => None,
            CreemRef::Expanded { email, .. } => lenient_string(email.as_ref()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreemOrder {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub transaction: Option<String>,
}

impl CreemObject {
    fn is_subscription(&self) -> bool {
        self.object.as_deref() == Some("subscription")
    }
}

impl ProviderEvent for CreemEvent {
    const PROVIDER: PaymentProvider = PaymentProvider::Creem;

    fn event_id(&self) -> Option<&str> {
        self.id.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn is_grant(&self) -> bool {
        CREEM_GRANT_EVENTS.contains(&self.event_type.as_str())
    }

    /// * Product: `object.product`, then `object.order.product`.
    /// * Quantity: `units`, then `quantity`.
    /// * Install id: `metadata`, by the [`CheckoutMetadata`] key priority.
    /// * Email: `metadata.email`, then `customer.email`.
    /// * Transaction: `order.transaction`, then `order.id`, then the checkout id.
    /// * Subscription: `object.subscription`, or the object itself when it is a subscription.
    fn into_purchase(self) -> Result<PurchaseEvent, IgnoreReason> {
        let event_id = self.event_id().map(String::from);
        let obj = self.object;
        let order = obj.order.clone().unwrap_or_default();
        let price_id = first_some([
            obj.product.as_ref().and_then(CreemRef::id),
            order.product.clone().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
        ])
        .ok_or(IgnoreReason::MissingPriceId)?;
        let quantity = lenient_quantity(obj.units.as_ref().or(obj.quantity.as_ref()));
        let metadata = obj.metadata.clone().unwrap_or_default();
        let install_id = metadata.install_id();
        let email = first_some([metadata.email(), obj.customer.as_ref().and_then(CreemRef::email)]);
        let subscription_id = if obj.is_subscription() {
            obj.id.clone()
        } else {
            obj.subscription.as_ref().and_then(CreemRef::id)
        };
        let checkout_id = if obj.is_subscription() { None } else { obj.id.clone() };
        let transaction_id = first_some([order.transaction, order.id, checkout_id]);
        Ok(PurchaseEvent {
            event_id,
            event_type: self.event_type,
            price_id,
            quantity,
            install_id,
            email,
            subscription_id,
            transaction_id,
        })
    }
}
