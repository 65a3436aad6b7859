//! In-memory store backends.
//!
//! Suitable for embedding, single-process deployments and tests. Each call
//! takes one lock, which gives the single-operation serializability the
//! engine assumes.

use crate::store::{
    FeatureStore, LicenseKeyStore, OfflineLicenseRecord, OfflineLicenseStore, TrialStore,
};
use crate::tier::Tier;
use crate::trial::{TrialActivity, TrialInfo, TrialStatus};
use crate::TierwardenError;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, TierwardenError> {
    lock.read()
        .map_err(|_| TierwardenError::StoreIO("store lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, TierwardenError> {
    lock.write()
        .map_err(|_| TierwardenError::StoreIO("store lock poisoned".to_string()))
}

/// Organization tiers held in memory. Unknown organizations are Free.
#[derive(Debug, Default)]
pub struct MemoryFeatureStore {
    tiers: RwLock<HashMap<String, Tier>>,
}

impl MemoryFeatureStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl FeatureStore for MemoryFeatureStore {
    fn get_org_tier(&self, org_id: &str) -> Result<Tier, TierwardenError> {
        Ok(read(&self.tiers)?.get(org_id).copied().unwrap_or_default())
    }

    fn set_org_tier(&self, org_id: &str, tier: Tier) -> Result<(), TierwardenError> {
        write(&self.tiers)?.insert(org_id.to_string(), tier);
        Ok(())
    }
}

/// Trial records and activity held in memory.
#[derive(Debug, Default)]
pub struct MemoryTrialStore {
    trials: RwLock<HashMap<String, TrialInfo>>,
    activity: RwLock<Vec<TrialActivity>>,
}

impl MemoryTrialStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrialStore for MemoryTrialStore {
    fn get_trial(&self, org_id: &str) -> Result<Option<TrialInfo>, TierwardenError> {
        Ok(read(&self.trials)?.get(org_id).cloned())
    }

    fn create_trial(&self, trial: &TrialInfo) -> Result<(), TierwardenError> {
        let mut trials = write(&self.trials)?;
        if trials.contains_key(&trial.org_id) {
            return Err(TierwardenError::TrialAlreadyStarted {
                org_id: trial.org_id.clone(),
            });
        }
        trials.insert(trial.org_id.clone(), trial.clone());
        Ok(())
    }

    fn update_trial(&self, trial: &TrialInfo) -> Result<(), TierwardenError> {
        let mut trials = write(&self.trials)?;
        let existing = trials
            .get_mut(&trial.org_id)
            .ok_or_else(|| TierwardenError::TrialNotFound {
                org_id: trial.org_id.clone(),
            })?;

        if !trial.extensions.starts_with(&existing.extensions) {
            return Err(TierwardenError::StoreIO(
                "trial extensions are append-only".to_string(),
            ));
        }

        *existing = trial.clone();
        Ok(())
    }

    fn list_trials(&self, status: TrialStatus) -> Result<Vec<TrialInfo>, TierwardenError> {
        let mut trials: Vec<_> = read(&self.trials)?
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        trials.sort_by(|a, b| a.org_id.cmp(&b.org_id));
        Ok(trials)
    }

    fn get_expiring_trials(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<TrialInfo>, TierwardenError> {
        let mut trials: Vec<_> = read(&self.trials)?
            .values()
            .filter(|t| t.status == TrialStatus::Active && t.expires_at > now && t.expires_at <= until)
            .cloned()
            .collect();
        trials.sort_by_key(|t| t.expires_at);
        Ok(trials)
    }

    fn log_activity(&self, entry: &TrialActivity) -> Result<(), TierwardenError> {
        write(&self.activity)?.push(entry.clone());
        Ok(())
    }

    fn list_activity(&self, org_id: &str) -> Result<Vec<TrialActivity>, TierwardenError> {
        Ok(read(&self.activity)?
            .iter()
            .filter(|a| a.org_id == org_id)
            .cloned()
            .collect())
    }
}

/// License key held in memory.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    key: RwLock<Option<String>>,
    sequences: RwLock<BTreeMap<String, u64>>,
}

impl MemoryKeyStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LicenseKeyStore for MemoryKeyStore {
    fn load_key(&self) -> Result<Option<String>, TierwardenError> {
        Ok(read(&self.key)?.clone())
    }

    fn save_key(&self, raw_key: &str) -> Result<(), TierwardenError> {
        *write(&self.key)? = Some(raw_key.to_string());
        Ok(())
    }

    fn clear_key(&self) -> Result<(), TierwardenError> {
        *write(&self.key)? = None;
        Ok(())
    }

    fn load_sequences(&self) -> Result<BTreeMap<String, u64>, TierwardenError> {
        Ok(read(&self.sequences)?.clone())
    }

    fn save_sequences(&self, sequences: &BTreeMap<String, u64>) -> Result<(), TierwardenError> {
        *write(&self.sequences)? = sequences.clone();
        Ok(())
    }
}

/// Offline license and revocation list held in memory.
#[derive(Debug, Default)]
pub struct MemoryOfflineStore {
    license: RwLock<Option<OfflineLicenseRecord>>,
    revocation_list: RwLock<Option<Vec<u8>>>,
}

impl MemoryOfflineStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl OfflineLicenseStore for MemoryOfflineStore {
    fn load_offline_license(&self) -> Result<Option<OfflineLicenseRecord>, TierwardenError> {
        Ok(read(&self.license)?.clone())
    }

    fn save_offline_license(&self, record: &OfflineLicenseRecord) -> Result<(), TierwardenError> {
        *write(&self.license)? = Some(record.clone());
        Ok(())
    }

    fn load_revocation_list(&self) -> Result<Option<Vec<u8>>, TierwardenError> {
        Ok(read(&self.revocation_list)?.clone())
    }

    fn save_revocation_list(&self, blob: &[u8]) -> Result<(), TierwardenError> {
        *write(&self.revocation_list)? = Some(blob.to_vec());
        Ok(())
    }
}
