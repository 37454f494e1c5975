use actix_http::Request;
use actix_web::{
    body::{to_bytes, MessageBody},
    dev::{Service, ServiceResponse},
    http::{header::HeaderMap, StatusCode},
    test,
    web,
    web::ServiceConfig,
};
use log::debug;
use serde_json::Value;
use upg_common::Secret;
use upscale_gate_engine::{
    clock::{Clock, MockClock},
    db_types::Tier,
    helpers::{
        webhook_signature::{hmac_sha256_hex, paddle_signature_header},
        TokenIssuer,
        TokenVerifier,
    },
    EndpointLimits,
    EntitlementApi,
    MemoryStore,
    RateLimitApi,
    ReconcilerApi,
    TierMap,
};

use crate::{
    config::ServerOptions,
    data_objects::PriceIds,
    integrations::replicate::ImageUpscaler,
    middleware::WebhookSecrets,
    routes::{health, CreemWebhookRoute, EntitlementStatusRoute, IssueTokenRoute, PaddleWebhookRoute, UpscaleRoute},
};

pub const TOKEN_SECRET: &str = "endpoint-test-token-secret";
pub const PADDLE_SECRET: &str = "pdl_ntfset_endpoint_test";
pub const CREEM_SECRET: &str = "whsec_endpoint_test";
pub const PADDLE_EARLY_BIRD: &str = "pri_early_bird";
pub const PADDLE_STANDARD: &str = "pri_standard";
pub const CREEM_EARLY_BIRD: &str = "prod_early_bird";
pub const CREEM_STANDARD: &str = "prod_standard";
/// 2023-11-14T22:13:20Z
pub const NOW_SECS: i64 = 1_700_000_000;
pub const PEER: &str = "10.20.30.40:5555";

/// Shared state for one test. The stores and the clock are shared with every app built from the context, so state
/// survives between requests.
pub struct TestContext {
    pub clock: MockClock,
    pub store: MemoryStore,
    pub rate_limit_store: MemoryStore,
    pub options: ServerOptions,
    pub token_secret: Option<Secret<String>>,
    pub paddle_secret: Option<Secret<String>>,
    pub creem_secret: Option<Secret<String>>,
}

impl TestContext {
    pub fn new() -> Self {
        let mut options = ServerOptions::default();
        options.trust_proxy_headers = false;
        options.upscale_limits = EndpointLimits::new(4, 50);
        options.token_limits = EndpointLimits::new(10, 200);
        Self {
            clock: MockClock::from_secs(NOW_SECS),
            store: MemoryStore::new(),
            rate_limit_store: MemoryStore::new(),
            options,
            token_secret: Some(Secret::new(TOKEN_SECRET.to_string())),
            paddle_secret: Some(Secret::new(PADDLE_SECRET.to_string())),
            creem_secret: Some(Secret::new(CREEM_SECRET.to_string())),
        }
    }

    pub fn tiers() -> TierMap {
        TierMap::new()
            .with(PADDLE_EARLY_BIRD, Tier::EarlyBird)
            .with(PADDLE_STANDARD, Tier::Standard)
            .with(CREEM_EARLY_BIRD, Tier::EarlyBird)
            .with(CREEM_STANDARD, Tier::Standard)
    }

    pub fn token_for(&self, install_id: &str) -> String {
        TokenIssuer::new(self.token_secret.clone(), self.clock.shared()).issue(install_id).unwrap().token
    }

    pub fn entitlements(&self) -> EntitlementApi<MemoryStore> {
        EntitlementApi::new(self.store.clone())
    }

    /// Registers every route, backed by the context's stores and the given upscaler.
    pub fn configure<U: ImageUpscaler + 'static>(&self, upscaler: U) -> impl FnOnce(&mut ServiceConfig) {
        let clock = self.clock.shared();
        let secrets = WebhookSecrets {
            paddle: self.paddle_secret.clone(),
            creem: self.creem_secret.clone(),
            tolerance_secs: 300,
            clock: clock.clone(),
        };
        let entitlement_api = EntitlementApi::new(self.store.clone());
        let reconciler_api = ReconcilerApi::new(self.store.clone(), Self::tiers(), clock.clone());
        let rate_limit_api = RateLimitApi::new(self.rate_limit_store.clone(), clock.clone());
        let issuer = TokenIssuer::new(self.token_secret.clone(), clock.clone());
        let verifier = TokenVerifier::new(self.token_secret.clone(), clock);
        let prices = PriceIds {
            early_bird_price_id: Some(PADDLE_EARLY_BIRD.to_string()),
            standard_price_id: Some(PADDLE_STANDARD.to_string()),
        };
        let options = self.options;
        move |cfg: &mut ServiceConfig| {
            cfg.app_data(web::Data::new(options))
                .app_data(web::Data::new(prices))
                .app_data(web::Data::new(secrets))
                .app_data(web::Data::new(entitlement_api))
                .app_data(web::Data::new(reconciler_api))
                .app_data(web::Data::new(rate_limit_api))
                .app_data(web::Data::new(issuer))
                .app_data(web::Data::new(verifier))
                .app_data(web::Data::new(upscaler))
                .service(health)
                .service(IssueTokenRoute::<MemoryStore>::new())
                .service(UpscaleRoute::<MemoryStore, MemoryStore, U>::new())
                .service(EntitlementStatusRoute::<MemoryStore>::new())
                .service(PaddleWebhookRoute::<MemoryStore>::new())
                .service(CreemWebhookRoute::<MemoryStore>::new());
        }
    }
}

#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// The body as JSON, or `Value::Null` if it is not JSON.
    pub body: Value,
}

impl Reply {
    pub fn error_code(&self) -> &str {
        self.body["error"].as_str().unwrap_or_default()
    }
}

/// Sends `req` to `app`. Errors raised by middleware are rendered the way the server would render them.
pub async fn send<S, B>(app: &S, req: Request) -> Reply
where
    S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let (status, headers, bytes) = match test::try_call_service(app, req).await {
        Ok(res) => {
            let status = res.status();
            let headers = res.headers().clone();
            (status, headers, test::read_body(res).await)
        },
        Err(e) => {
            let res = e.error_response();
            let status = res.status();
            let headers = res.headers().clone();
            (status, headers, to_bytes(res.into_body()).await.unwrap())
        },
    };
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    debug!("Reply: {status} {body}");
    Reply { status, headers, body }
}

/// A `Paddle-Signature` header for `body`, timestamped at the context's current time.
pub fn paddle_signature(ctx: &TestContext, body: &str) -> String {
    paddle_signature_header(PADDLE_SECRET.as_bytes(), ctx.clock.now_secs(), body.as_bytes())
}

pub fn creem_signature(body: &str) -> String {
    hmac_sha256_hex(CREEM_SECRET.as_bytes(), body.as_bytes())
}

/// The first 24 bytes of a PNG file: signature plus the `IHDR` chunk header and dimensions.
pub fn png_header(width: u32, height: u32) -> Vec<u8> {
    let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
    png.extend_from_slice(&[0, 0, 0, 13]);
    png.extend_from_slice(b"IHDR");
    png.extend_from_slice(&width.to_be_bytes());
    png.extend_from_slice(&height.to_be_bytes());
    png.extend_from_slice(&[8, 6, 0, 0, 0]);
    png
}
