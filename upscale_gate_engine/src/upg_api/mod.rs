//! # Upscale gate engine public API
//!
//! The `upg_api` module exposes the programmatic API of the gateway. Each API wraps a storage backend that implements
//! the traits it needs, so an API can be pointed at the in-memory store, the REST KV store or a test double.
//!
//! * [`entitlement_api`] reads and writes entitlement records and the early-bird inventory counter.
//! * [`rate_limit_api`] applies per-minute and per-day fixed windows to callers.
//! * [`reconciler_api`] turns verified payment-provider webhooks into entitlement writes, exactly once per event id.
//!
//! # API usage
//!
//! ```rust,ignore
//! use upscale_gate_engine::{EntitlementApi, MemoryStore};
//! let api = EntitlementApi::new(MemoryStore::new());
//! let entitlement = api.get_by_install_id("abc123").await?;
//! ```
pub mod entitlement_api;
pub mod rate_limit_api;
pub mod reconciler_api;
