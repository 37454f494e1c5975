use serde::{Deserialize, Serialize};
use upscale_gate_engine::{
    db_types::{EntitlementRecord, Tier},
    ReconcileOutcome,
};

pub const ALLOWED_SCALES: [u32; 2] = [2, 4];
pub const DEFAULT_SCALE: u32 = 2;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    #[serde(default)]
    pub install_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    /// Epoch milliseconds.
    pub expires_at: i64,
}

/// The JSON form of an upscale request. `image` is a public URL or a base64 `data:` URI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpscaleParams {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub scale: Option<u32>,
    #[serde(default)]
    pub face_enhance: Option<bool>,
    /// Source dimensions, if the client knows them.
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Query parameters that accompany a raw `image/*` request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpscaleQuery {
    #[serde(default)]
    pub scale: Option<u32>,
    #[serde(default)]
    pub face_enhance: Option<bool>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpscaleResponse {
    pub job_id: String,
    pub output_image_url: String,
    pub width: Option<u64>,
    pub height: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitlementQuery {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PriceIds {
    pub early_bird_price_id: Option<String>,
    pub standard_price_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementStatus {
    pub install_id: String,
    pub entitlement: Option<EntitlementRecord>,
    pub early_bird_sold: u64,
    pub early_bird_cap: u64,
    pub current_tier: Tier,
    pub prices: PriceIds,
}

/// Webhook responses are always 200 once the signature has been verified, so that providers do not retry events
/// we deliberately skip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookAck {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deduped: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignored: Option<String>,
}

impl From<&ReconcileOutcome> for WebhookAck {
    fn from(outcome: &ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::Granted(_) => Self { ok: true, deduped: None, ignored: None },
            ReconcileOutcome::Duplicate => Self { ok: true, deduped: Some(true), ignored: None },
            ReconcileOutcome::Ignored(reason) => Self { ok: true, deduped: None, ignored: Some(reason.to_string()) },
        }
    }
}
