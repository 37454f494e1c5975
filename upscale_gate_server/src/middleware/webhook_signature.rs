//! Webhook signature middleware for Actix Web.
//!
//! Payment providers sign every webhook delivery with a shared secret. This middleware reads the raw request body,
//! checks it against the provider's signature header using the provider's [`SignatureScheme`], and only then hands
//! the (untouched) body on to the handler. Handlers therefore never see a body that has not been verified.
//!
//! The secrets are looked up from the [`WebhookSecrets`] app data on every call, so the middleware itself carries no
//! configuration beyond the provider it guards.
//!
//! A provider with no configured secret is a deployment defect. Every delivery is refused with a 500 until it is
//! fixed; the check is never skipped.

use std::{
    fmt::Debug,
    future::{ready, Ready},
    rc::Rc,
};

use actix_http::h1;
use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    web,
    Error,
};
use futures::future::LocalBoxFuture;
use log::{error, trace, warn};
use upg_common::Secret;
use upscale_gate_engine::{
    clock::{Clock, SharedClock},
    db_types::PaymentProvider,
    helpers::{webhook_signature::DEFAULT_REPLAY_TOLERANCE_SECS, SignatureScheme, WebhookSignatureError},
};

use crate::errors::ServerError;

/// Per-provider webhook signing secrets, registered as app data.
#[derive(Clone)]
pub struct WebhookSecrets {
    pub paddle: Option<Secret<String>>,
    pub creem: Option<Secret<String>>,
    /// Replay window for timestamped signatures. Zero disables the check.
    pub tolerance_secs: i64,
    pub clock: SharedClock,
}

impl WebhookSecrets {
    pub fn new(clock: SharedClock) -> Self {
        Self { paddle: None, creem: None, tolerance_secs: DEFAULT_REPLAY_TOLERANCE_SECS, clock }
    }

    pub fn secret_for(&self, provider: PaymentProvider) -> Option<&Secret<String>> {
        match provider {
            PaymentProvider::Paddle => self.paddle.as_ref(),
            PaymentProvider::Creem => self.creem.as_ref(),
        }
    }
}

impl Debug for WebhookSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSecrets")
            .field("paddle", &self.paddle)
            .field("creem", &self.creem)
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

pub struct WebhookSignatureFactory {
    provider: PaymentProvider,
}

impl WebhookSignatureFactory {
    pub fn new(provider: PaymentProvider) -> Self {
        WebhookSignatureFactory { provider }
    }
}

impl<S, B> Transform<S, ServiceRequest> for WebhookSignatureFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = WebhookSignatureService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(WebhookSignatureService { provider: self.provider, service: Rc::new(service) }))
    }
}

pub struct WebhookSignatureService<S> {
    provider: PaymentProvider,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for WebhookSignatureService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let provider = self.provider;
        Box::pin(async move {
            trace!("🔐️ Checking {provider} webhook signature");
            let Some(secrets) = req.app_data::<web::Data<WebhookSecrets>>().cloned() else {
                error!("🔐️ Webhook secrets are not registered with the server. Refusing {provider} webhook.");
                return Err(ServerError::ConfigurationError("Webhook secrets are not available.".into()).into());
            };
            let Some(secret) = secrets.secret_for(provider).cloned() else {
                error!("🔐️ No webhook secret is configured for {provider}. Refusing webhook.");
                return Err(ServerError::ConfigurationError(format!("The {provider} webhook secret is not set.")).into());
            };
            let scheme = SignatureScheme::for_provider(provider, secrets.tolerance_secs);
            let header = req
                .headers()
                .get(scheme.header_name())
                .and_then(|v| v.to_str().ok())
                .map(String::from)
                .ok_or_else(|| {
                    warn!("🔐️ {provider} webhook arrived without a {} header. Denying.", scheme.header_name());
                    ServerError::InvalidWebhookSignature(WebhookSignatureError::MissingHeader)
                })?;
            let data = req.extract::<web::Bytes>().await.map_err(|e| {
                warn!("🔐️ Failed to extract {provider} webhook body: {e:?}");
                ServerError::InvalidRequestBody(e.to_string())
            })?;
            let now = secrets.clock.now_secs();
            match scheme.verify(secret.as_bytes(), &header, data.as_ref(), now) {
                Ok(()) => {
                    trace!("🔐️ {provider} webhook signature check ✅️");
                    req.set_payload(bytes_to_payload(data));
                    service.call(req).await
                },
                Err(e) => {
                    warn!("🔐️ Invalid {provider} webhook signature. Denying. {e}");
                    Err(ServerError::InvalidWebhookSignature(e).into())
                },
            }
        })
    }
}

fn bytes_to_payload(buf: web::Bytes) -> Payload {
    let (_, mut pl) = h1::Payload::create(true);
    pl.unread_data(buf);
    Payload::from(pl)
}
