//! Short-lived capability tokens.
//!
//! A token is a compact three-segment structure, `base64url(header).base64url(claims).base64url(signature)`, where
//! the signature is HMAC-SHA256 over the first two segments joined by a dot. No padding is used in any segment.
//!
//! Tokens are never stored server side. They are a pure function of the signing secret, the current time and the
//! installation id that requested them, and they die at `exp`. The installation id is carried as a signed claim
//! (`iid`), so a token minted for one device cannot be replayed by another device that merely spoofs the
//! installation header.
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use log::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use upg_common::Secret;

use crate::clock::SharedClock;

pub const TOKEN_ALGORITHM: &str = "HS256";
pub const TOKEN_TYPE: &str = "JWT";
/// The only consumer of these tokens.
pub const TOKEN_AUDIENCE: &str = "upscale-gate";
/// The only capability these tokens grant.
pub const TOKEN_SCOPE: &str = "upscale:image";
pub const TOKEN_TTL_SECS: i64 = 600;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessTokenError {
    #[error("The access token is malformed. {0}")]
    Malformed(String),
    #[error("The access token uses an unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("The access token signature is invalid.")]
    InvalidSignature,
    #[error("The access token expired at {0}.")]
    Expired(i64),
    #[error("The access token was issued for a different audience: {0}")]
    InvalidAudience(String),
    #[error("The access token does not grant the required scope: {0}")]
    InvalidScope(String),
    #[error("The access token was issued to a different installation.")]
    InstallationMismatch,
    #[error("No installation id was provided.")]
    MissingInstallId,
    #[error("The token signing secret is not configured.")]
    MissingSecretConfig,
}

impl AccessTokenError {
    /// A short, machine-stable identifier for the error, suitable for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "token_malformed",
            Self::UnsupportedAlgorithm(_) => "token_unsupported_alg",
            Self::InvalidSignature => "token_invalid_signature",
            Self::Expired(_) => "token_expired",
            Self::InvalidAudience(_) => "token_invalid_audience",
            Self::InvalidScope(_) => "token_invalid_scope",
            Self::InstallationMismatch => "token_install_mismatch",
            Self::MissingInstallId => "missing_install_id",
            Self::MissingSecretConfig => "server_misconfigured",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
}

impl Default for TokenHeader {
    fn default() -> Self {
        Self { alg: TOKEN_ALGORITHM.to_string(), typ: TOKEN_TYPE.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub aud: String,
    pub scope: String,
    /// Issued-at, epoch seconds.
    pub iat: i64,
    /// Expiry, epoch seconds. Always `iat + TOKEN_TTL_SECS` for tokens we issue.
    pub exp: i64,
    /// The installation id the token was issued to.
    pub iid: String,
}

#[derive(Debug, Clone)]
pub struct DecodedToken<C> {
    pub header: TokenHeader,
    pub claims: C,
}

/// The raw segments of a token. Nothing has been parsed or checked yet.
struct TokenParts<'a> {
    header: &'a str,
    payload: &'a str,
    signature: &'a str,
    signing_input: &'a str,
}

fn split(token: &str) -> Result<TokenParts<'_>, AccessTokenError> {
    let segments = token.split('.').collect::<Vec<&str>>();
    if segments.len() != 3 {
        return Err(AccessTokenError::Malformed(format!("expected 3 segments, found {}", segments.len())));
    }
    let signing_input = &token[..segments[0].len() + 1 + segments[1].len()];
    Ok(TokenParts { header: segments[0], payload: segments[1], signature: segments[2], signing_input })
}

fn decode_segment<T: DeserializeOwned>(segment: &str, name: &str) -> Result<T, AccessTokenError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AccessTokenError::Malformed(format!("{name} is not valid base64url. {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| AccessTokenError::Malformed(format!("{name} is not valid JSON. {e}")))
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, AccessTokenError> {
    let json = serde_json::to_vec(value).map_err(|e| AccessTokenError::Malformed(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn new_mac(secret: &[u8], signing_input: &str) -> Result<HmacSha256, AccessTokenError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|e| AccessTokenError::Malformed(e.to_string()))?;
    mac.update(signing_input.as_bytes());
    Ok(mac)
}

/// Serializes and signs `claims` with a standard HS256 header.
pub fn encode<C: Serialize>(claims: &C, secret: &[u8]) -> Result<String, AccessTokenError> {
    encode_with_header(&TokenHeader::default(), claims, secret)
}

pub fn encode_with_header<C: Serialize>(
    header: &TokenHeader,
    claims: &C,
    secret: &[u8],
) -> Result<String, AccessTokenError> {
    let signing_input = format!("{}.{}", encode_segment(header)?, encode_segment(claims)?);
    let signature = new_mac(secret, &signing_input)?.finalize().into_bytes();
    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
}

/// Splits and parses a token, without checking the signature.
pub fn decode<C: DeserializeOwned>(token: &str) -> Result<DecodedToken<C>, AccessTokenError> {
    let parts = split(token)?;
    let header = decode_segment(parts.header, "header")?;
    let claims = decode_segment(parts.payload, "payload")?;
    Ok(DecodedToken { header, claims })
}

/// Recomputes the HMAC over the header and payload segments and compares it to the signature segment in constant
/// time. Any structural problem, including a signature of the wrong length, is a verification failure.
pub fn verify_signature(token: &str, secret: &[u8]) -> bool {
    let Ok(parts) = split(token) else {
        return false;
    };
    signature_matches(&parts, secret)
}

fn signature_matches(parts: &TokenParts<'_>, secret: &[u8]) -> bool {
    let Ok(provided) = URL_SAFE_NO_PAD.decode(parts.signature) else {
        return false;
    };
    match new_mac(secret, parts.signing_input) {
        Ok(mac) => mac.verify_slice(&provided).is_ok(),
        Err(_) => false,
    }
}

//--------------------------------------     TokenIssuer      --------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub token: String,
    /// Epoch seconds.
    pub expires_at: i64,
}

pub struct TokenIssuer {
    secret: Option<Secret<String>>,
    clock: SharedClock,
}

impl TokenIssuer {
    pub fn new(secret: Option<Secret<String>>, clock: SharedClock) -> Self {
        Self { secret, clock }
    }

    /// Issue a token for `install_id`, valid for [`TOKEN_TTL_SECS`] from now.
    ///
    /// Fails with [`AccessTokenError::MissingSecretConfig`] if no signing secret was configured. That is a deployment
    /// defect and callers must surface it as a server error.
    pub fn issue(&self, install_id: &str) -> Result<IssuedToken, AccessTokenError> {
        let secret = self.secret.as_ref().ok_or_else(|| {
            error!("🔑️ Cannot issue access tokens: the token signing secret is not configured.");
            AccessTokenError::MissingSecretConfig
        })?;
        let install_id = install_id.trim();
        if install_id.is_empty() {
            return Err(AccessTokenError::MissingInstallId);
        }
        let iat = self.clock.now_secs();
        let exp = iat + TOKEN_TTL_SECS;
        let claims = AccessClaims {
            aud: TOKEN_AUDIENCE.to_string(),
            scope: TOKEN_SCOPE.to_string(),
            iat,
            exp,
            iid: install_id.to_string(),
        };
        let token = encode(&claims, secret.as_bytes())?;
        trace!("🔑️ Issued access token for {install_id}, expiring at {exp}");
        Ok(IssuedToken { token, expires_at: exp })
    }
}

//--------------------------------------    TokenVerifier     --------------------------------------------------------
pub struct TokenVerifier {
    secret: Option<Secret<String>>,
    clock: SharedClock,
}

impl TokenVerifier {
    pub fn new(secret: Option<Secret<String>>, clock: SharedClock) -> Self {
        Self { secret, clock }
    }

    /// Verify `token` for a request made on behalf of `install_id`.
    ///
    /// Checks, in order: structure, algorithm, signature, expiry, audience, scope and finally that the token was
    /// issued to `install_id`. The signature is checked over the raw segments before the claims are parsed, so any
    /// change to the payload is reported as an invalid signature rather than a parse error.
    pub fn verify(&self, token: &str, install_id: &str) -> Result<AccessClaims, AccessTokenError> {
        let secret = self.secret.as_ref().ok_or(AccessTokenError::MissingSecretConfig)?;
        let parts = split(token)?;
        let header = decode_segment::<TokenHeader>(parts.header, "header")?;
        if header.alg != TOKEN_ALGORITHM {
            return Err(AccessTokenError::UnsupportedAlgorithm(header.alg));
        }
        if !signature_matches(&parts, secret.as_bytes()) {
            debug!("🔑️ Access token signature check failed");
            return Err(AccessTokenError::InvalidSignature);
        }
        let claims = decode_segment::<AccessClaims>(parts.payload, "payload")?;
        let now = self.clock.now_secs();
        if now > claims.exp {
            debug!("🔑️ Access token for {} expired at {} (now {now})", claims.iid, claims.exp);
            return Err(AccessTokenError::Expired(claims.exp));
        }
        if claims.aud != TOKEN_AUDIENCE {
            return Err(AccessTokenError::InvalidAudience(claims.aud));
        }
        if claims.scope != TOKEN_SCOPE {
            return Err(AccessTokenError::InvalidScope(claims.scope));
        }
        if claims.iid != install_id.trim() {
            warn!("🔑️ Access token issued to {} was presented by installation {install_id}", claims.iid);
            return Err(AccessTokenError::InstallationMismatch);
        }
        Ok(claims)
    }
}
