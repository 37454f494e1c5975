//! # Storage backends
//!
//! The traits in this module define what a storage backend must provide for the gateway. Everything above this
//! layer (the `*Api` structs) is written against these traits only, so backends are interchangeable and the choice
//! of backend is a configuration concern.
//!
//! * [`EntitlementManagement`] stores entitlement records and integer counters under string keys.
//! * [`WebhookDedup`] remembers which provider event ids have already been processed.
//! * [`RateLimitStore`] keeps the fixed-window request counters.
//!
//! There are two backends: an in-process [`crate::MemoryStore`], suitable for a single instance and for tests, and
//! [`crate::KvRestStore`], which talks to a REST key-value service shared by every instance.
mod entitlement_management;
mod rate_limit_store;
pub(crate) mod webhook_dedup;

pub use entitlement_management::{EntitlementError, EntitlementManagement};
pub use rate_limit_store::{RateLimitError, RateLimitStore};
pub use webhook_dedup::{DedupError, WebhookDedup};
