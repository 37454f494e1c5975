//! Upscale Gate Engine
//!
//! The engine holds the gatekeeping logic that sits in front of the paid image-upscaling provider. It is transport
//! agnostic: the HTTP surface lives in `upscale_gate_server`.
//!
//! The library is divided into these sections:
//! 1. Capability tokens ([`mod@helpers`]). Short-lived HMAC-signed tokens that authorise one installation to call the
//!    upscale endpoint, plus the signature schemes that payment providers use on their webhooks.
//! 2. Storage ([`mod@traits`]). Entitlement records, the early-bird inventory counter, webhook dedup markers and
//!    rate-limit windows. There is an in-memory backend ([`MemoryStore`]) and a REST key-value backend
//!    ([`KvRestStore`]). [`StoreBackend`] picks one at runtime.
//! 3. Payment provider payloads ([`mod@providers`]). Typed models of the webhook bodies and their mapping to a
//!    provider-neutral purchase.
//! 4. The public API ([`mod@upg_api`]): [`EntitlementApi`], [`RateLimitApi`] and [`ReconcilerApi`].
//!
//! Every time-dependent component takes a [`clock::SharedClock`], so tests run against a [`clock::MockClock`].
mod backend;
mod kv;
mod memory;
mod upg_api;

pub mod clock;
pub mod db_types;
pub mod helpers;
pub mod providers;
pub mod traits;

pub use backend::StoreBackend;
pub use kv::{rate_limit_key, KvConfig, KvError, KvRestClient, KvRestStore};
pub use memory::MemoryStore;
pub use traits::{
    DedupError,
    EntitlementError,
    EntitlementManagement,
    RateLimitError,
    RateLimitStore,
    WebhookDedup,
};
pub use upg_api::{
    entitlement_api::{self, EntitlementApi, ToleratedStaleness},
    rate_limit_api::{self, EndpointLimits, RateLimitApi, WindowLimit},
    reconciler_api::{self, ReconcileError, ReconcileOutcome, ReconcilerApi, TierMap},
};
