//! The checkpoint in front of the paid image endpoint, and the rate-limit admission that the token endpoint shares
//! with it.
//!
//! [`authorize_upscale`] runs, in order: bearer token extraction (401), installation id extraction (400), token
//! verification (401/403 with the verifier's error code), then the per-minute and per-day windows (429). Every check
//! happens before any upstream call is made. Nothing here writes state apart from the rate-limit counters.
use actix_web::HttpRequest;
use log::*;
use upscale_gate_engine::{
    helpers::{AccessClaims, TokenVerifier},
    rate_limit_api::identity_key,
    EndpointLimits,
    RateLimitApi,
    RateLimitStore,
};

use crate::{
    errors::ServerError,
    helpers::{bearer_token, client_address, install_id_from_header, is_valid_install_id},
};

pub const TOKEN_ENDPOINT: &str = "token";
pub const UPSCALE_ENDPOINT: &str = "upscale";

/// Counts the request against the caller's windows for `endpoint`.
///
/// A backend failure admits the request. The limiter protects upstream spend, and an unavailable counter store
/// should not take the product down with it.
pub async fn admit<B: RateLimitStore>(
    limiter: &RateLimitApi<B>,
    client: &str,
    install_id: &str,
    endpoint: &str,
    limits: &EndpointLimits,
) -> Result<(), ServerError> {
    let identity = identity_key(client, install_id, endpoint);
    match limiter.check_endpoint(&identity, limits).await {
        Ok(decision) if decision.allowed => Ok(()),
        Ok(decision) => {
            info!("🚦️ Rate limit hit for {identity}. Resets at {}", decision.reset_at);
            Err(ServerError::RateLimited { reset_at: decision.reset_at })
        },
        Err(e) => {
            warn!("🚦️ Rate limit check for {identity} failed. Admitting the request. {e}");
            Ok(())
        },
    }
}

/// The validated installation id from the `X-Install-Id` header.
pub fn required_install_id(req: &HttpRequest) -> Result<String, ServerError> {
    let install_id = install_id_from_header(req).ok_or(ServerError::MissingInstallId)?;
    if !is_valid_install_id(&install_id) {
        return Err(ServerError::InvalidInstallId(install_id));
    }
    Ok(install_id)
}

/// Authorizes one call to the upscale endpoint. Returns the verified claims.
pub async fn authorize_upscale<B: RateLimitStore>(
    req: &HttpRequest,
    verifier: &TokenVerifier,
    limiter: &RateLimitApi<B>,
    limits: &EndpointLimits,
    trust_proxy_headers: bool,
) -> Result<AccessClaims, ServerError> {
    let token = bearer_token(req).ok_or(ServerError::MissingAccessToken)?;
    let install_id = required_install_id(req)?;
    let claims = verifier.verify(&token, &install_id).map_err(|e| {
        debug!("🔐️ Rejected access token for {install_id}: {e}");
        ServerError::from(e)
    })?;
    let client = client_address(req, trust_proxy_headers);
    admit(limiter, &client, &install_id, UPSCALE_ENDPOINT, limits).await?;
    trace!("🔐️ Upscale call authorized for {install_id} from {client}");
    Ok(claims)
}
