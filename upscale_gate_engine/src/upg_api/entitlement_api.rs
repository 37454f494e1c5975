use std::fmt::Debug;

use log::*;

use crate::{
    db_types::{EntitlementRecord, Tier},
    traits::{EntitlementError, EntitlementManagement},
};

pub const EARLY_BIRD_SOLD_KEY: &str = "early_bird:sold";
pub const DEFAULT_EARLY_BIRD_CAP: u64 = 50;

pub fn install_key(install_id: &str) -> String {
    format!("entitlement:{}", install_id.trim())
}

pub fn email_key(email: &str) -> String {
    format!("entitlement:email:{}", normalize_email(email))
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// How reads of the early-bird counter react to a broken or missing backend value. The counter only decides which
/// price to offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToleratedStaleness {
    /// Missing, unparseable and unreadable values all read as zero. Failures are logged.
    #[default]
    FailOpen,
    /// Backend failures and unparseable values are returned to the caller.
    Strict,
}

/// `EntitlementApi` reads and writes entitlement records and the early-bird inventory counter.
///
/// Each record is indexed twice, by installation id and by lower-cased email. The two copies are written
/// independently, one after the other, and nothing keeps them in step afterwards. A later write keyed by only one of
/// them leaves the other copy untouched.
#[derive(Clone)]
pub struct EntitlementApi<B> {
    db: B,
    staleness: ToleratedStaleness,
}

impl<B> Debug for EntitlementApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EntitlementApi ({:?})", self.staleness)
    }
}

impl<B> EntitlementApi<B> {
    pub fn new(db: B) -> Self {
        Self { db, staleness: ToleratedStaleness::default() }
    }

    pub fn with_staleness(mut self, staleness: ToleratedStaleness) -> Self {
        self.staleness = staleness;
        self
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B> EntitlementApi<B>
where B: EntitlementManagement
{
    pub async fn get_by_install_id(&self, install_id: &str) -> Result<Option<EntitlementRecord>, EntitlementError> {
        if install_id.trim().is_empty() {
            return Ok(None);
        }
        self.db.fetch_entitlement(&install_key(install_id)).await
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<EntitlementRecord>, EntitlementError> {
        if email.trim().is_empty() {
            return Ok(None);
        }
        self.db.fetch_entitlement(&email_key(email)).await
    }

    /// Looks the entitlement up by installation id first, then by email.
    pub async fn find(
        &self,
        install_id: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<EntitlementRecord>, EntitlementError> {
        if let Some(id) = install_id {
            if let Some(record) = self.get_by_install_id(id).await? {
                return Ok(Some(record));
            }
        }
        match email {
            Some(email) => self.get_by_email(email).await,
            None => Ok(None),
        }
    }

    /// Stores the record under every key it carries. The email on the stored record is normalised.
    ///
    /// If the second write fails the first one is not rolled back.
    pub async fn save(&self, mut record: EntitlementRecord) -> Result<EntitlementRecord, EntitlementError> {
        if !record.has_lookup_key() {
            return Err(EntitlementError::InvalidEntitlement);
        }
        record.install_id = record.install_id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        record.email = record.email.map(|e| normalize_email(&e)).filter(|e| !e.is_empty());
        if let Some(id) = &record.install_id {
            self.db.store_entitlement(&install_key(id), &record).await?;
            debug!("🎟️ Entitlement saved for installation {id}: {record}");
        }
        if let Some(email) = &record.email {
            self.db.store_entitlement(&email_key(email), &record).await?;
            debug!("🎟️ Entitlement saved for {email}: {record}");
        }
        Ok(record)
    }

    pub async fn increment_early_bird_sold(&self, amount: u64) -> Result<u64, EntitlementError> {
        let sold = self.db.increment_counter(EARLY_BIRD_SOLD_KEY, amount).await?;
        info!("🎟️ Early-bird seats sold: {sold} (+{amount})");
        Ok(sold)
    }

    /// The number of early-bird seats sold so far. Under [`ToleratedStaleness::FailOpen`] this never fails.
    pub async fn get_early_bird_sold(&self) -> Result<u64, EntitlementError> {
        let raw = match self.db.fetch_counter(EARLY_BIRD_SOLD_KEY).await {
            Ok(raw) => raw,
            Err(e) if self.staleness == ToleratedStaleness::FailOpen => {
                warn!("🎟️ Could not read the early-bird counter, assuming 0. {e}");
                return Ok(0);
            },
            Err(e) => return Err(e),
        };
        let Some(raw) = raw else { return Ok(0) };
        match (raw.trim().parse::<u64>(), self.staleness) {
            (Ok(n), _) => Ok(n),
            (Err(_), ToleratedStaleness::FailOpen) => {
                warn!("🎟️ Early-bird counter holds '{raw}', which is not a count. Assuming 0.");
                Ok(0)
            },
            (Err(e), ToleratedStaleness::Strict) => {
                Err(EntitlementError::BackendError(format!("early-bird counter '{raw}' is invalid: {e}")))
            },
        }
    }

    /// The tier a new purchase would get: early-bird while seats remain, standard after.
    pub async fn current_offer(&self, cap: u64) -> Result<Tier, EntitlementError> {
        let sold = self.get_early_bird_sold().await?;
        Ok(if sold < cap { Tier::EarlyBird } else { Tier::Standard })
    }
}
