use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use log::*;
use upscale_gate_engine::{
    clock::{SharedClock, SystemClock},
    helpers::{TokenIssuer, TokenVerifier},
    EntitlementApi,
    KvConfig,
    KvRestStore,
    MemoryStore,
    RateLimitApi,
    ReconcilerApi,
    StoreBackend,
};

use crate::{
    config::{BackendKind, ServerConfig, ServerOptions, SWEEP_INTERVAL},
    errors::ServerError,
    integrations::replicate::ReplicateClient,
    middleware::WebhookSecrets,
    routes::{health, CreemWebhookRoute, EntitlementStatusRoute, IssueTokenRoute, PaddleWebhookRoute, UpscaleRoute},
    sweeper::start_sweeper,
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let clock = SystemClock::shared();
    let store = build_backend(config.store_backend, config.kv.as_ref())?;
    let rate_limit_store = build_backend(config.rate_limit_backend, config.kv.as_ref())?;
    info!("🗄️ Entitlements: {store:?}. Rate limits: {rate_limit_store:?}");
    let upscaler =
        ReplicateClient::new(config.replicate.clone()).map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let sweep_targets =
        vec![RateLimitApi::new(rate_limit_store.clone(), clock.clone()), RateLimitApi::new(store.clone(), clock.clone())];
    let _sweeper = start_sweeper(sweep_targets, SWEEP_INTERVAL);
    let srv = create_server_instance(config, store, rate_limit_store, upscaler, clock)?;
    srv.await.map_err(|e| ServerError::InitializeError(e.to_string()))
}

/// The storage backend for `kind`. Asking for the KV store without configuring one is caught (and logged) when the
/// configuration is read, so this falls back to memory rather than failing.
pub fn build_backend(kind: BackendKind, kv: Option<&KvConfig>) -> Result<StoreBackend, ServerError> {
    match (kind, kv) {
        (BackendKind::Kv, Some(kv)) => KvRestStore::new(kv.clone())
            .map(StoreBackend::from)
            .map_err(|e| ServerError::InitializeError(format!("Could not create the KV client. {e}"))),
        (BackendKind::Kv, None) => {
            warn!("🗄️ The KV backend is not configured. Using the in-memory store.");
            Ok(MemoryStore::new().into())
        },
        (BackendKind::Memory, _) => Ok(MemoryStore::new().into()),
    }
}

pub fn create_server_instance(
    config: ServerConfig,
    store: StoreBackend,
    rate_limit_store: StoreBackend,
    upscaler: ReplicateClient,
    clock: SharedClock,
) -> Result<Server, ServerError> {
    let options = ServerOptions::from_config(&config);
    let prices = config.price_ids();
    let tiers = config.tier_map();
    let secrets = WebhookSecrets {
        paddle: config.paddle.webhook_secret.clone(),
        creem: config.creem.webhook_secret.clone(),
        tolerance_secs: config.webhook_tolerance_secs,
        clock: clock.clone(),
    };
    let token_secret = config.token_secret.clone();
    let retention = config.dedup_retention;
    let srv = HttpServer::new(move || {
        let entitlement_api = EntitlementApi::new(store.clone());
        let reconciler_api = ReconcilerApi::new(store.clone(), tiers.clone(), clock.clone()).with_retention(retention);
        let rate_limit_api = RateLimitApi::new(rate_limit_store.clone(), clock.clone());
        let issuer = TokenIssuer::new(token_secret.clone(), clock.clone());
        let verifier = TokenVerifier::new(token_secret.clone(), clock.clone());
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("upg::access_log"))
            .app_data(web::Data::new(options))
            .app_data(web::Data::new(prices.clone()))
            .app_data(web::Data::new(secrets.clone()))
            .app_data(web::Data::new(entitlement_api))
            .app_data(web::Data::new(reconciler_api))
            .app_data(web::Data::new(rate_limit_api))
            .app_data(web::Data::new(issuer))
            .app_data(web::Data::new(verifier))
            .app_data(web::Data::new(upscaler.clone()))
            .service(health)
            .service(IssueTokenRoute::<StoreBackend>::new())
            .service(UpscaleRoute::<StoreBackend, StoreBackend, ReplicateClient>::new())
            .service(EntitlementStatusRoute::<StoreBackend>::new())
            .service(PaddleWebhookRoute::<StoreBackend>::new())
            .service(CreemWebhookRoute::<StoreBackend>::new())
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
