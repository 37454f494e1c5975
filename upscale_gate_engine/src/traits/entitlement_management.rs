use thiserror::Error;

use crate::db_types::EntitlementRecord;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntitlementError {
    #[error("Storage backend error: {0}")]
    BackendError(String),
    #[error("An entitlement needs an installation id or an email address.")]
    InvalidEntitlement,
    #[error("Stored entitlement could not be (de)serialized: {0}")]
    SerializationError(String),
}

/// Raw key/value access to entitlement records and counters.
///
/// Implementations know nothing about key layout, email normalisation or fail-open policies. Those live in
/// [`crate::EntitlementApi`].
#[allow(async_fn_in_trait)]
pub trait EntitlementManagement: Clone {
    /// Fetches the record stored under `key`, or `None` if nothing is stored there.
    async fn fetch_entitlement(&self, key: &str) -> Result<Option<EntitlementRecord>, EntitlementError>;

    /// Writes `record` under `key`, overwriting any previous value. Last write wins.
    async fn store_entitlement(&self, key: &str, record: &EntitlementRecord) -> Result<(), EntitlementError>;

    /// Atomically increments the counter at `key` by `amount` and returns the new value. Missing counters start at 0.
    async fn increment_counter(&self, key: &str, amount: u64) -> Result<u64, EntitlementError>;

    /// Fetches the raw value of the counter at `key`. No parsing is done here.
    async fn fetch_counter(&self, key: &str) -> Result<Option<String>, EntitlementError>;
}
