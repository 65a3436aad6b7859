//! Persistence contracts the engine depends on, plus in-memory and file
//! backends.
//!
//! Every trait method is a single serializable operation; the engine never
//! spans a transaction across calls.

pub mod file;
pub mod memory;
pub mod record;

use crate::tier::Tier;
use crate::trial::{TrialActivity, TrialInfo, TrialStatus};
use crate::TierwardenError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub use file::FileStore;
pub use memory::{MemoryFeatureStore, MemoryKeyStore, MemoryOfflineStore, MemoryTrialStore};
pub use record::OfflineLicenseRecord;

/// Organization → persisted tier.
pub trait FeatureStore: Send + Sync {
    /// Persisted tier of an organization (Free when unknown).
    fn get_org_tier(&self, org_id: &str) -> Result<Tier, TierwardenError>;

    /// Persist an organization's tier.
    fn set_org_tier(&self, org_id: &str, tier: Tier) -> Result<(), TierwardenError>;
}

/// Trial records, extensions and the trial activity log.
pub trait TrialStore: Send + Sync {
    /// Trial record of an organization, if one was ever started.
    fn get_trial(&self, org_id: &str) -> Result<Option<TrialInfo>, TierwardenError>;

    /// Insert a new record.
    ///
    /// Fails with `TrialAlreadyStarted` if the organization already has one.
    fn create_trial(&self, trial: &TrialInfo) -> Result<(), TierwardenError>;

    /// Replace an existing record.
    ///
    /// Fails with `TrialNotFound` if there is none. Implementations must
    /// refuse updates that drop or rewrite existing extensions.
    fn update_trial(&self, trial: &TrialInfo) -> Result<(), TierwardenError>;

    /// All trials currently in `status`.
    fn list_trials(&self, status: TrialStatus) -> Result<Vec<TrialInfo>, TierwardenError>;

    /// Active trials expiring in `(now, until]`, soonest first.
    fn get_expiring_trials(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<TrialInfo>, TierwardenError>;

    /// Append to the activity log.
    fn log_activity(&self, entry: &TrialActivity) -> Result<(), TierwardenError>;

    /// Activity log of one organization, oldest first.
    fn list_activity(&self, org_id: &str) -> Result<Vec<TrialActivity>, TierwardenError>;
}

/// Storage for the online license key.
pub trait LicenseKeyStore: Send + Sync {
    /// Stored raw key, if any.
    fn load_key(&self) -> Result<Option<String>, TierwardenError>;

    /// Persist the raw key, replacing any previous one.
    fn save_key(&self, raw_key: &str) -> Result<(), TierwardenError>;

    /// Remove the stored key. Succeeds when none is stored.
    ///
    /// Recorded sequences are kept.
    fn clear_key(&self) -> Result<(), TierwardenError>;

    /// Highest license sequence accepted per customer.
    ///
    /// Stored data that cannot be decoded is `Malformed`.
    fn load_sequences(&self) -> Result<BTreeMap<String, u64>, TierwardenError>;

    /// Replace the recorded per-customer sequences.
    fn save_sequences(&self, sequences: &BTreeMap<String, u64>) -> Result<(), TierwardenError>;
}

/// Storage for air-gap license files and revocation lists.
pub trait OfflineLicenseStore: Send + Sync {
    /// Last accepted offline license, if any.
    ///
    /// A record that exists but cannot be decoded is `Malformed`, distinct
    /// from `StoreIO`.
    fn load_offline_license(&self) -> Result<Option<OfflineLicenseRecord>, TierwardenError>;

    /// Persist the accepted offline license.
    fn save_offline_license(&self, record: &OfflineLicenseRecord) -> Result<(), TierwardenError>;

    /// Raw bytes of the last accepted revocation list, if any.
    fn load_revocation_list(&self) -> Result<Option<Vec<u8>>, TierwardenError>;

    /// Persist the raw bytes of an accepted revocation list.
    fn save_revocation_list(&self, blob: &[u8]) -> Result<(), TierwardenError>;
}
