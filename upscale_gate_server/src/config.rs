use std::{fmt::Display, str::FromStr, time::Duration as StdDuration};

use chrono::Duration;
use log::*;
use upg_common::{env_flag, env_parse, Secret};
use upscale_gate_engine::{
    db_types::Tier,
    entitlement_api::DEFAULT_EARLY_BIRD_CAP,
    helpers::webhook_signature::DEFAULT_REPLAY_TOLERANCE_SECS,
    reconciler_api::DEFAULT_DEDUP_RETENTION_DAYS,
    EndpointLimits,
    KvConfig,
    TierMap,
};

use crate::{
    data_objects::PriceIds,
    integrations::replicate::{ReplicateConfig, DEFAULT_REPLICATE_BASE_URL, DEFAULT_REPLICATE_MODEL},
};

const DEFAULT_UPG_HOST: &str = "127.0.0.1";
const DEFAULT_UPG_PORT: u16 = 8370;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_FREE_MAX_SCALE: u32 = 2;
const DEFAULT_TOKEN_RATE_PER_MINUTE: u32 = 10;
const DEFAULT_TOKEN_RATE_PER_DAY: u32 = 200;
const DEFAULT_UPSCALE_RATE_PER_MINUTE: u32 = 4;
const DEFAULT_UPSCALE_RATE_PER_DAY: u32 = 50;

/// Which storage backend a subsystem uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendKind {
    #[default]
    Memory,
    Kv,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" | "in-memory" => Ok(Self::Memory),
            "kv" | "rest" | "upstash" => Ok(Self::Kv),
            other => Err(format!("'{other}' is not a backend. Use 'memory' or 'kv'")),
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Kv => write!(f, "kv"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Signs and verifies access tokens. Without it, token issuance and the upscale endpoint answer with a 500.
    pub token_secret: Option<Secret<String>>,
    pub paddle: CheckoutConfig,
    pub creem: CheckoutConfig,
    /// Maximum age of a timestamped webhook signature. Zero disables the check.
    pub webhook_tolerance_secs: i64,
    pub dedup_retention: Duration,
    pub early_bird_cap: u64,
    pub store_backend: BackendKind,
    pub rate_limit_backend: BackendKind,
    pub kv: Option<KvConfig>,
    pub token_limits: EndpointLimits,
    pub upscale_limits: EndpointLimits,
    pub replicate: ReplicateConfig,
    pub max_upload_bytes: usize,
    /// If true, `X-Forwarded-For` and `X-Real-IP` are used to identify clients. Only enable this behind a proxy that
    /// sets them.
    pub trust_proxy_headers: bool,
}

/// Webhook secret and sellable price ids for one payment provider.
#[derive(Clone, Debug, Default)]
pub struct CheckoutConfig {
    pub webhook_secret: Option<Secret<String>>,
    pub early_bird_price_id: String,
    pub standard_price_id: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_UPG_HOST.to_string(),
            port: DEFAULT_UPG_PORT,
            token_secret: None,
            paddle: CheckoutConfig::default(),
            creem: CheckoutConfig::default(),
            webhook_tolerance_secs: DEFAULT_REPLAY_TOLERANCE_SECS,
            dedup_retention: Duration::days(DEFAULT_DEDUP_RETENTION_DAYS),
            early_bird_cap: DEFAULT_EARLY_BIRD_CAP,
            store_backend: BackendKind::Memory,
            rate_limit_backend: BackendKind::Memory,
            kv: None,
            token_limits: EndpointLimits::new(DEFAULT_TOKEN_RATE_PER_MINUTE, DEFAULT_TOKEN_RATE_PER_DAY),
            upscale_limits: EndpointLimits::new(DEFAULT_UPSCALE_RATE_PER_MINUTE, DEFAULT_UPSCALE_RATE_PER_DAY),
            replicate: ReplicateConfig::default(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            trust_proxy_headers: true,
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env_or("UPG_HOST", DEFAULT_UPG_HOST.to_string());
        let port = env_or("UPG_PORT", DEFAULT_UPG_PORT);
        let token_secret = Secret::from_env("UPG_TOKEN_SECRET");
        if token_secret.is_none() {
            error!("🪛️ UPG_TOKEN_SECRET is not set. Access tokens cannot be issued or verified until it is.");
        }
        let paddle = CheckoutConfig::from_env("PADDLE", "PRICE");
        let creem = CheckoutConfig::from_env("CREEM", "PRODUCT");
        let kv = kv_config_from_env();
        let store_backend = backend_from_env("UPG_STORE_BACKEND", kv.is_some());
        let rate_limit_backend = backend_from_env("UPG_RATE_LIMIT_BACKEND", kv.is_some());
        let token_limits = EndpointLimits::new(
            env_or("UPG_TOKEN_RATE_PER_MINUTE", DEFAULT_TOKEN_RATE_PER_MINUTE),
            env_or("UPG_TOKEN_RATE_PER_DAY", DEFAULT_TOKEN_RATE_PER_DAY),
        );
        let upscale_limits = EndpointLimits::new(
            env_or("UPG_UPSCALE_RATE_PER_MINUTE", DEFAULT_UPSCALE_RATE_PER_MINUTE),
            env_or("UPG_UPSCALE_RATE_PER_DAY", DEFAULT_UPSCALE_RATE_PER_DAY),
        );
        let retention_days = env_or("UPG_DEDUP_RETENTION_DAYS", DEFAULT_DEDUP_RETENTION_DAYS).max(1);
        Self {
            host,
            port,
            token_secret,
            paddle,
            creem,
            webhook_tolerance_secs: env_or("UPG_WEBHOOK_TOLERANCE_SECS", DEFAULT_REPLAY_TOLERANCE_SECS),
            dedup_retention: Duration::days(retention_days),
            early_bird_cap: env_or("UPG_EARLY_BIRD_CAP", DEFAULT_EARLY_BIRD_CAP),
            store_backend,
            rate_limit_backend,
            kv,
            token_limits,
            upscale_limits,
            replicate: ReplicateConfig::from_env(),
            max_upload_bytes: env_or("UPG_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES),
            trust_proxy_headers: env_flag("UPG_TRUST_PROXY_HEADERS", true),
        }
    }

    /// The price/product id to tier mapping across both providers. Unset ids are left out.
    pub fn tier_map(&self) -> TierMap {
        let map = TierMap::new()
            .with(&self.paddle.early_bird_price_id, Tier::EarlyBird)
            .with(&self.paddle.standard_price_id, Tier::Standard)
            .with(&self.creem.early_bird_price_id, Tier::EarlyBird)
            .with(&self.creem.standard_price_id, Tier::Standard);
        if map.is_empty() {
            warn!("🪛️ No price or product ids are configured. Every purchase webhook will be ignored.");
        }
        map
    }

    /// The ids that the checkout page should offer. Paddle ids are preferred; Creem product ids fill any gap.
    pub fn price_ids(&self) -> PriceIds {
        let pick = |a: &str, b: &str| [a, b].into_iter().find(|s| !s.trim().is_empty()).map(String::from);
        PriceIds {
            early_bird_price_id: pick(&self.paddle.early_bird_price_id, &self.creem.early_bird_price_id),
            standard_price_id: pick(&self.paddle.standard_price_id, &self.creem.standard_price_id),
        }
    }
}

impl CheckoutConfig {
    /// Reads `UPG_{provider}_WEBHOOK_SECRET`, `UPG_{provider}_EARLY_BIRD_{kind}_ID` and
    /// `UPG_{provider}_STANDARD_{kind}_ID`.
    fn from_env(provider: &str, kind: &str) -> Self {
        let secret_var = format!("UPG_{provider}_WEBHOOK_SECRET");
        let webhook_secret = Secret::from_env(&secret_var);
        if webhook_secret.is_none() {
            warn!("🪛️ {secret_var} is not set. {provider} webhooks will be refused until it is.");
        }
        let early_bird_price_id = env_or(&format!("UPG_{provider}_EARLY_BIRD_{kind}_ID"), String::default());
        let standard_price_id = env_or(&format!("UPG_{provider}_STANDARD_{kind}_ID"), String::default());
        Self { webhook_secret, early_bird_price_id, standard_price_id }
    }
}

impl ReplicateConfig {
    pub fn from_env() -> Self {
        let api_token = Secret::from_env("UPG_REPLICATE_API_TOKEN");
        if api_token.is_none() {
            warn!("🪛️ UPG_REPLICATE_API_TOKEN is not set. Upscale requests will fail until it is.");
        }
        let defaults = Self::default();
        let poll_secs = env_or("UPG_REPLICATE_POLL_SECS", defaults.poll_interval.as_secs()).max(1);
        Self {
            api_token,
            model: env_or("UPG_REPLICATE_MODEL", DEFAULT_REPLICATE_MODEL.to_string()),
            base_url: env_or("UPG_REPLICATE_BASE_URL", DEFAULT_REPLICATE_BASE_URL.to_string()),
            poll_interval: StdDuration::from_secs(poll_secs),
            max_polls: env_or("UPG_REPLICATE_MAX_POLLS", defaults.max_polls),
            ..defaults
        }
    }
}

fn kv_config_from_env() -> Option<KvConfig> {
    let url = env_or("UPG_KV_REST_URL", String::default());
    let token = Secret::from_env("UPG_KV_REST_TOKEN");
    match (url.is_empty(), token) {
        (false, Some(token)) => Some(KvConfig::new(&url, token)),
        (true, None) => None,
        (false, None) => {
            error!("🪛️ UPG_KV_REST_URL is set, but UPG_KV_REST_TOKEN is not. The KV backend is unavailable.");
            None
        },
        (true, Some(_)) => {
            error!("🪛️ UPG_KV_REST_TOKEN is set, but UPG_KV_REST_URL is not. The KV backend is unavailable.");
            None
        },
    }
}

/// The backend named by `name`. Defaults to the KV store when one is configured, otherwise memory.
fn backend_from_env(name: &str, kv_available: bool) -> BackendKind {
    let default = if kv_available { BackendKind::Kv } else { BackendKind::Memory };
    let kind = env_or(name, default);
    if kind == BackendKind::Kv && !kv_available {
        error!("🪛️ {name} asks for the KV backend, but it is not configured. Falling back to the in-memory store.");
        return BackendKind::Memory;
    }
    info!("🪛️ {name}: {kind}");
    kind
}

/// Reads and parses `name`, falling back to `default` when it is unset or invalid.
fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env_parse::<T>(name) {
        Ok(Some(v)) => v,
        Ok(None) => default,
        Err(e) => {
            error!("🪛️ {e}. Using the default, {default}, instead.");
            default
        },
    }
}

//-------------------------------------------------  ServerOptions  ----------------------------------------------------
/// A subset of the server configuration that is used to configure the server's behaviour. Generally we try to keep this
/// as small as possible, and exclude secrets to avoid passing sensitive information around the system.
#[derive(Clone, Copy, Debug)]
pub struct ServerOptions {
    pub trust_proxy_headers: bool,
    pub max_upload_bytes: usize,
    /// Scales above this need a paid entitlement.
    pub free_max_scale: u32,
    pub early_bird_cap: u64,
    pub token_limits: EndpointLimits,
    pub upscale_limits: EndpointLimits,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl ServerOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            trust_proxy_headers: config.trust_proxy_headers,
            max_upload_bytes: config.max_upload_bytes,
            free_max_scale: DEFAULT_FREE_MAX_SCALE,
            early_bird_cap: config.early_bird_cap,
            token_limits: config.token_limits,
            upscale_limits: config.upscale_limits,
        }
    }
}

/// How long the sweeper waits between purges of closed rate-limit windows.
pub const SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(60);
