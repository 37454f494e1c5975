use serde::Deserialize;
use serde_json::Value;

use super::{first_some, lenient_quantity, lenient_string, CheckoutMetadata, IgnoreReason, ProviderEvent, PurchaseEvent};
use crate::db_types::PaymentProvider;

pub const PADDLE_GRANT_EVENTS: [&str; 3] = ["transaction.completed", "transaction.paid", "subscription.activated"];

/// Paddle notification envelope.
///
/// ```json
/// {
///   "event_id": "evt_01h...",
///   "event_type": "transaction.completed",
///   "occurred_at": "2024-05-01T10:00:00Z",
///   "data": { "id": "txn_01h...", "items": [{ "price": { "id": "pri_01h..." }, "quantity": 1 }],
///             "custom_data": { "installId": "abc123" }, "customer": { "email": "a@b.com" } }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PaddleEvent {
    #[serde(default)]
    pub event_id: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub occurred_at: Option<String>,
    #[serde(default)]
    pub data: PaddleEventData,
}

/// The `data` object. Transactions and subscriptions share enough of their shape to use one model.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaddleEventData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub items: Vec<PaddleItem>,
    #[serde(default)]
    pub custom_data: Option<CheckoutMetadata>,
    #[serde(default)]
    pub customer: Option<PaddleCustomer>,
    #[serde(default)]
    pub customer_email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaddleItem {
    #[serde(default)]
    pub price: Option<PaddlePrice>,
    #[serde(default)]
    pub price_id: Option<String>,
    #[serde(default)]
    pub quantity: Option<Value>,
}

impl PaddleItem {
    /// `price.id` (current API) before the flat `price_id` (older payloads).
    pub fn price_id(&self) -> Option<String> {
        first_some([self.price.as_ref().and_then(|p| p.id.clone()), self.price_id.clone()])
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaddlePrice {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaddleCustomer {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<Value>,
}

impl ProviderEvent for PaddleEvent {
    const PROVIDER: PaymentProvider = PaymentProvider::Paddle;

    fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn is_grant(&self) -> bool {
        PADDLE_GRANT_EVENTS.contains(&self.event_type.as_str())
    }

    /// * Price: the first line item that names a price.
    /// * Install id: `custom_data`, by the [`CheckoutMetadata`] key priority.
    /// * Email: `custom_data.email`, then `customer.email`, then `customer_email`.
    /// * For `subscription.*` events `data.id` is the subscription id; otherwise it is the transaction id.
    fn into_purchase(self) -> Result<PurchaseEvent, IgnoreReason> {
        let event_id = self.event_id().map(String::from);
        let data = self.data;
        let item = data.items.iter().find(|i| i.price_id().is_some()).ok_or(IgnoreReason::MissingPriceId)?;
        let price_id = item.price_id().ok_or(IgnoreReason::MissingPriceId)?;
        let quantity = lenient_quantity(item.quantity.as_ref());
        let metadata = data.custom_data.unwrap_or_default();
        let install_id = metadata.install_id();
        let email = first_some([
            metadata.email(),
            data.customer.as_ref().and_then(|c| lenient_string(c.email.as_ref())),
            data.customer_email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty()),
        ]);
        let (subscription_id, transaction_id) = if self.event_type.starts_with("subscription.") {
            (data.id, data.transaction_id)
        } else {
            (data.subscription_id, data.id)
        };
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
