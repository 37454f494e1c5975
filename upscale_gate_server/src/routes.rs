//! Request handler definitions
//!
//! Define each route and it handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! Every handler is async. The storage backends and the image provider are all reached over the network, so nothing
//! here may block the worker thread.
//!
//! Handlers are generic over the storage and provider traits they use, so that the same handlers run against the
//! in-memory store in tests and against the configured backend in production.
use actix_web::{
    cookie::{time::Duration as CookieDuration, Cookie, SameSite},
    get,
    web,
    HttpRequest,
    HttpResponse,
    Responder,
};
use log::*;
use serde::de::DeserializeOwned;
use serde_json::json;
use upscale_gate_engine::{
    db_types::{PaymentProvider, Tier},
    helpers::{TokenIssuer, TokenVerifier},
    providers::{CreemEvent, PaddleEvent, ProviderEvent},
    EntitlementApi,
    EntitlementManagement,
    RateLimitApi,
    RateLimitStore,
    ReconcilerApi,
    WebhookDedup,
};

use crate::{
    auth::{admit, authorize_upscale, TOKEN_ENDPOINT},
    config::ServerOptions,
    data_objects::{
        EntitlementQuery,
        EntitlementStatus,
        PriceIds,
        TokenRequest,
        TokenResponse,
        UpscaleResponse,
        WebhookAck,
    },
    errors::ServerError,
    helpers::{
        client_address,
        install_id_from_cookie,
        install_id_from_header,
        is_valid_install_id,
        new_install_id,
        INSTALL_ID_COOKIE,
    },
    integrations::replicate::{ImageUpscaler, UpscaleRequest},
    upscale_input::read_upscale_input,
};

const INSTALL_ID_COOKIE_DAYS: i64 = 365;

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ >( $( core::marker::PhantomData<fn() -> [< T $bounds:camel> ] >,)+ );}
        paste::paste! { impl< $( [< T $bounds:camel> ],)+ > [<$name:camel Route>]< $( [< T $bounds:camel> ],)+ > {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self($( core::marker::PhantomData::<fn() -> [< T $bounds:camel> ] >,)+)
            }
        }}
        paste::paste! { impl<$( [< T $bounds:camel >] , )+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$([<T $bounds:camel>],)+>
        where
            $([<T $bounds:camel>]: $bounds + 'static,)+
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::< $( [< T $bounds:camel >], )+>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };

    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+ where signed by $provider:expr)  => {
        paste::paste! { pub struct [<$name:camel Route>]<A>(core::marker::PhantomData<fn() -> A>);}
        paste::paste! { impl<A> [<$name:camel Route>]<A> {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(core::marker::PhantomData::<fn() -> A>)
            }
        }}
        paste::paste! { impl<A> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<A>
        where
            A: $($bounds+)+ 'static,
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::<A>)
                    .wrap($crate::middleware::WebhookSignatureFactory::new($provider));
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().json(json!({ "ok": true }))
}

//----------------------------------------------   Token  ----------------------------------------------------
route!(issue_token => Post "/api/token" impl RateLimitStore);
/// Issues a short-lived access token for the upscale endpoint.
///
/// The installation id comes from the `X-Install-Id` header or, failing that, a JSON body of the form
/// `{"installId": "..."}`. The response's `expiresAt` is in epoch milliseconds.
pub async fn issue_token<B: RateLimitStore>(
    req: HttpRequest,
    body: web::Bytes,
    options: web::Data<ServerOptions>,
    issuer: web::Data<TokenIssuer>,
    limiter: web::Data<RateLimitApi<B>>,
) -> Result<HttpResponse, ServerError> {
    trace!("💻️ Received token request");
    let install_id = match install_id_from_header(&req) {
        Some(id) => id,
        None if body.iter().all(u8::is_ascii_whitespace) => return Err(ServerError::MissingInstallId),
        None => serde_json::from_slice::<TokenRequest>(&body)
            .map_err(|e| ServerError::CouldNotDeserializePayload(e.to_string()))?
            .install_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(ServerError::MissingInstallId)?,
    };
    if !is_valid_install_id(&install_id) {
        return Err(ServerError::InvalidInstallId(install_id));
    }
    let client = client_address(&req, options.trust_proxy_headers);
    admit(&limiter, &client, &install_id, TOKEN_ENDPOINT, &options.token_limits).await?;
    let issued = issuer.issue(&install_id)?;
    debug!("💻️ Issued an access token to {install_id}");
    Ok(HttpResponse::Ok().json(TokenResponse { token: issued.token, expires_at: issued.expires_at * 1000 }))
}

//----------------------------------------------   Upscale  ----------------------------------------------------
route!(upscale => Post "/api/upscale" impl RateLimitStore, EntitlementManagement, ImageUpscaler);
/// The paid endpoint. Authorization, rate limiting and input validation all complete before the image provider is
/// called. Scales above the free maximum need an entitlement for the calling installation.
#[allow(clippy::too_many_arguments)]
pub async fn upscale<BRate, BEnt, U>(
    req: HttpRequest,
    payload: web::Payload,
    options: web::Data<ServerOptions>,
    verifier: web::Data<TokenVerifier>,
    limiter: web::Data<RateLimitApi<BRate>>,
    entitlements: web::Data<EntitlementApi<BEnt>>,
    upscaler: web::Data<U>,
) -> Result<HttpResponse, ServerError>
where
    BRate: RateLimitStore,
    BEnt: EntitlementManagement,
    U: ImageUpscaler,
{
    trace!("💻️ Received upscale request");
    let claims =
        authorize_upscale(&req, &verifier, &limiter, &options.upscale_limits, options.trust_proxy_headers).await?;
    let input = read_upscale_input(&req, payload, options.max_upload_bytes).await?;
    if input.scale > options.free_max_scale {
        let entitlement = entitlements.get_by_install_id(&claims.iid).await?;
        if entitlement.is_none() {
            info!("💻️ {} asked for a x{} upscale without an entitlement", claims.iid, input.scale);
            return Err(ServerError::ProRequired(input.scale));
        }
    }
    let request = UpscaleRequest { image: input.image.clone(), scale: input.scale, face_enhance: input.face_enhance };
    let output = upscaler.upscale(&request).await?;
    let (width, height) = input.output_dimensions().unzip();
    debug!("💻️ Upscale job {} for {} completed", output.job_id, claims.iid);
    Ok(HttpResponse::Ok().json(UpscaleResponse {
        job_id: output.job_id,
        output_image_url: output.output_url,
        width,
        height,
    }))
}

//----------------------------------------------   Entitlement  ----------------------------------------------------
route!(entitlement_status => Get "/api/entitlement" impl EntitlementManagement);
/// Read-only entitlement status for an installation, plus the early-bird inventory and the prices to offer.
///
/// Installations without an id (no header and no cookie) are given a fresh one, returned in the body and set as the
/// `install_id` cookie.
pub async fn entitlement_status<B: EntitlementManagement>(
    req: HttpRequest,
    query: web::Query<EntitlementQuery>,
    options: web::Data<ServerOptions>,
    prices: web::Data<PriceIds>,
    api: web::Data<EntitlementApi<B>>,
) -> Result<HttpResponse, ServerError> {
    trace!("💻️ Received entitlement status request");
    let (install_id, is_new) = match install_id_from_header(&req) {
        Some(id) if is_valid_install_id(&id) => (id, false),
        Some(id) => return Err(ServerError::InvalidInstallId(id)),
        None => match install_id_from_cookie(&req).filter(|id| is_valid_install_id(id)) {
            Some(id) => (id, false),
            None => (new_install_id(), true),
        },
    };
    let entitlement = api.find(Some(install_id.as_str()), query.email.as_deref()).await?;
    let early_bird_sold = api.get_early_bird_sold().await?;
    let current_tier = if early_bird_sold < options.early_bird_cap { Tier::EarlyBird } else { Tier::Standard };
    let status = EntitlementStatus {
        install_id: install_id.clone(),
        entitlement,
        early_bird_sold,
        early_bird_cap: options.early_bird_cap,
        current_tier,
        prices: prices.get_ref().clone(),
    };
    let mut response = HttpResponse::Ok();
    if is_new {
        debug!("💻️ Assigned new installation id {install_id}");
        let cookie = Cookie::build(INSTALL_ID_COOKIE, install_id)
            .path("/")
            .max_age(CookieDuration::days(INSTALL_ID_COOKIE_DAYS))
            .http_only(true)
            .same_site(SameSite::Lax)
            .finish();
        response.cookie(cookie);
    }
    Ok(response.json(status))
}

//----------------------------------------------   Webhooks  ----------------------------------------------------
route!(paddle_webhook => Post "/webhooks/paddle" impl EntitlementManagement, WebhookDedup where signed by PaymentProvider::Paddle);
pub async fn paddle_webhook<B>(body: web::Bytes, api: web::Data<ReconcilerApi<B>>) -> Result<HttpResponse, ServerError>
where B: EntitlementManagement + WebhookDedup
{
    trace!("💻️ Received Paddle webhook");
    reconcile_webhook::<PaddleEvent, B>(&body, &api).await
}

route!(creem_webhook => Post "/webhooks/creem" impl EntitlementManagement, WebhookDedup where signed by PaymentProvider::Creem);
pub async fn creem_webhook<B>(body: web::Bytes, api: web::Data<ReconcilerApi<B>>) -> Result<HttpResponse, ServerError>
where B: EntitlementManagement + WebhookDedup
{
    trace!("💻️ Received Creem webhook");
    reconcile_webhook::<CreemEvent, B>(&body, &api).await
}

/// The body has already passed the signature middleware by the time it gets here.
async fn reconcile_webhook<E, B>(body: &[u8], api: &ReconcilerApi<B>) -> Result<HttpResponse, ServerError>
where
    E: ProviderEvent + DeserializeOwned,
    B: EntitlementManagement + WebhookDedup,
{
    let event = serde_json::from_slice::<E>(body).map_err(|e| {
        warn!("💻️ Could not parse {} webhook body. {e}", E::PROVIDER);
        ServerError::CouldNotDeserializePayload(e.to_string())
    })?;
    let outcome = api.reconcile(event).await?;
    Ok(HttpResponse::Ok().json(WebhookAck::from(&outcome)))
}
