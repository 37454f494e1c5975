//! Webhook signature schemes used by the payment providers.
//!
//! Both providers sign with HMAC-SHA256 and send a hex digest in a header:
//! * Paddle sends `Paddle-Signature: ts=<unix seconds>;h1=<hex>` and signs `"{ts}:{raw body}"`. More than one `h1`
//!   may be present while a secret is being rotated; any one of them matching is sufficient.
//! * Creem sends `creem-signature: <hex>` and signs the raw body.
//!
//! Signatures are always checked against the raw request bytes, before any parsing happens. Comparison is constant
//! time.
use hmac::{Hmac, Mac};
use log::*;
use sha2::Sha256;
use thiserror::Error;

use crate::db_types::PaymentProvider;

type HmacSha256 = Hmac<Sha256>;

pub const PADDLE_SIGNATURE_HEADER: &str = "Paddle-Signature";
pub const CREEM_SIGNATURE_HEADER: &str = "creem-signature";
pub const DEFAULT_REPLAY_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookSignatureError {
    #[error("The signature header is missing.")]
    MissingHeader,
    #[error("The signature header is malformed. {0}")]
    MalformedHeader(String),
    #[error("The signature timestamp {0} is outside the allowed window.")]
    StaleTimestamp(i64),
    #[error("The signature does not match the request body.")]
    Mismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// HMAC over `"{ts}:{body}"`, timestamp carried in the header. A `tolerance_secs` of zero disables the replay
    /// window check.
    TimestampedHmac { tolerance_secs: i64 },
    /// HMAC over the raw body.
    BodyHmac,
}

impl SignatureScheme {
    pub fn for_provider(provider: PaymentProvider, tolerance_secs: i64) -> Self {
        match provider {
            PaymentProvider::Paddle => Self::TimestampedHmac { tolerance_secs },
            PaymentProvider::Creem => Self::BodyHmac,
        }
    }

    pub fn header_name(&self) -> &'static str {
        match self {
            Self::TimestampedHmac { .. } => PADDLE_SIGNATURE_HEADER,
            Self::BodyHmac => CREEM_SIGNATURE_HEADER,
        }
    }

    /// Verifies `header` against `body`. `now_secs` is only consulted by the timestamped scheme.
    pub fn verify(&self, secret: &[u8], header: &str, body: &[u8], now_secs: i64) -> Result<(), WebhookSignatureError> {
        match self {
            Self::TimestampedHmac { tolerance_secs } => {
                verify_timestamped(secret, header, body, now_secs, *tolerance_secs)
            },
            Self::BodyHmac => {
                if hex_signature_matches(secret, &[body], header.trim()) {
                    Ok(())
                } else {
                    Err(WebhookSignatureError::Mismatch)
                }
            },
        }
    }
}

fn verify_timestamped(
    secret: &[u8],
    header: &str,
    body: &[u8],
    now_secs: i64,
    tolerance_secs: i64,
) -> Result<(), WebhookSignatureError> {
    let mut ts = None;
    let mut signatures = Vec::new();
    for part in header.split(';') {
        match part.trim().split_once('=') {
            Some(("ts", v)) => ts = Some(v.trim()),
            Some(("h1", v)) => signatures.push(v.trim()),
            Some(_) => {},
            None => return Err(WebhookSignatureError::MalformedHeader(format!("unexpected element '{part}'"))),
        }
    }
    let ts = ts.ok_or_else(|| WebhookSignatureError::MalformedHeader("no timestamp".to_string()))?;
    let ts_value = ts
        .parse::<i64>()
        .map_err(|e| WebhookSignatureError::MalformedHeader(format!("invalid timestamp '{ts}'. {e}")))?;
    if signatures.is_empty() {
        return Err(WebhookSignatureError::MalformedHeader("no h1 signature".to_string()));
    }
    let drift = now_secs.checked_sub(ts_value).map(i64::unsigned_abs);
    if tolerance_secs > 0 && drift.map_or(true, |d| d > tolerance_secs.unsigned_abs()) {
        debug!("🔏️ Webhook timestamp {ts_value} is more than {tolerance_secs}s away from {now_secs}");
        return Err(WebhookSignatureError::StaleTimestamp(ts_value));
    }
    let prefix = format!("{ts}:");
    if signatures.iter().any(|sig| hex_signature_matches(secret, &[prefix.as_bytes(), body], sig)) {
        Ok(())
    } else {
        Err(WebhookSignatureError::Mismatch)
    }
}

fn hex_signature_matches(secret: &[u8], data: &[&[u8]], signature_hex: &str) -> bool {
    let Ok(provided) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    data.iter().for_each(|d| mac.update(d));
    mac.verify_slice(&provided).is_ok()
}

/// Hex-encoded HMAC-SHA256 of `data`.
pub fn hmac_sha256_hex(secret: &[u8], data: &[u8]) -> String {
    match HmacSha256::new_from_slice(secret) {
        Ok(mut mac) => {
            mac.update(data);
            hex::encode(mac.finalize().into_bytes())
        },
        // HMAC accepts keys of any length
        Err(_) => String::new(),
    }
}

/// Builds a `Paddle-Signature` header value for `body`, as the provider would.
pub fn paddle_signature_header(secret: &[u8], ts: i64, body: &[u8]) -> String {
    let mut signed = format!("{ts}:").into_bytes();
    signed.extend_from_slice(body);
    format!("ts={ts};h1={}", hmac_sha256_hex(secret, &signed))
}
