//! File-based store with atomic writes.
//!
//! Stores the license key, accepted key sequences, the offline license record
//! and the revocation list under `dirs::data_dir()/<namespace>/`. Uses temp file + rename for
//! atomic writes.

use crate::store::{LicenseKeyStore, OfflineLicenseRecord, OfflineLicenseStore};
use crate::TierwardenError;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const LICENSE_KEY_FILE: &str = "license.key";
const SEQUENCES_FILE: &str = "sequences.json";
const OFFLINE_LICENSE_FILE: &str = "offline-license.json";
const REVOCATION_LIST_FILE: &str = "revocation-list.json";

/// File-based store backend.
#[derive(Debug, Clone)]
pub struct FileStore {
    /// Directory holding the store files.
    dir: PathBuf,
}

impl FileStore {
    /// Create a store under `dirs::data_dir()/<namespace>/`.
    pub fn new(namespace: &str) -> Result<Self, TierwardenError> {
        if namespace.trim().is_empty() {
            return Err(TierwardenError::ConfigError(
                "store namespace cannot be empty".to_string(),
            ));
        }

        let base_dir = dirs::data_dir()
            .ok_or_else(|| TierwardenError::StoreIO("Could not find data directory".to_string()))?;

        Self::with_path(base_dir.join(namespace))
    }

    /// Create a store at a specific directory.
    pub fn with_path(dir: PathBuf) -> Result<Self, TierwardenError> {
        fs::create_dir_all(&dir)
            .map_err(|e| TierwardenError::StoreIO(format!("Failed to create store dir: {}", e)))?;
        Ok(Self { dir })
    }

    /// Directory holding the store files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a file atomically (temp file + rename).
    fn write_atomic(&self, name: &str, contents: &[u8]) -> Result<(), TierwardenError> {
        let target_path = self.dir.join(name);
        let temp_path = self.dir.join(format!("{}.tmp", name));

        fs::write(&temp_path, contents)
            .map_err(|e| TierwardenError::StoreIO(format!("Failed to write temp file: {}", e)))?;

        fs::rename(&temp_path, &target_path)
            .map_err(|e| TierwardenError::StoreIO(format!("Failed to rename {}: {}", name, e)))?;

        Ok(())
    }

    /// Read a file, `None` when it does not exist.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, TierwardenError> {
        match fs::read(self.dir.join(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TierwardenError::StoreIO(format!(
                "Failed to read {}: {}",
                name, e
            ))),
        }
    }

    /// Remove a file if present.
    fn remove(&self, name: &str) -> Result<(), TierwardenError> {
        match fs::remove_file(self.dir.join(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TierwardenError::StoreIO(format!(
                "Failed to delete {}: {}",
                name, e
            ))),
        }
    }
}

impl LicenseKeyStore for FileStore {
    fn load_key(&self) -> Result<Option<String>, TierwardenError> {
        let Some(bytes) = self.read(LICENSE_KEY_FILE)? else {
            return Ok(None);
        };
        let key = String::from_utf8(bytes)
            .map_err(|e| TierwardenError::StoreIO(format!("License key is not UTF-8: {}", e)))?;
        let key = key.trim();
        Ok((!key.is_empty()).then(|| key.to_string()))
    }

    fn save_key(&self, raw_key: &str) -> Result<(), TierwardenError> {
        self.write_atomic(LICENSE_KEY_FILE, raw_key.trim().as_bytes())
    }

    fn clear_key(&self) -> Result<(), TierwardenError> {
        self.remove(LICENSE_KEY_FILE)
    }

    fn load_sequences(&self) -> Result<BTreeMap<String, u64>, TierwardenError> {
        let Some(bytes) = self.read(SEQUENCES_FILE)? else {
            return Ok(BTreeMap::new());
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| TierwardenError::Malformed(format!("Sequence record: {}", e)))
    }

    fn save_sequences(&self, sequences: &BTreeMap<String, u64>) -> Result<(), TierwardenError> {
        let json = serde_json::to_vec(sequences)
            .map_err(|e| TierwardenError::StoreIO(format!("Failed to serialize sequences: {}", e)))?;
        self.write_atomic(SEQUENCES_FILE, &json)
    }
}

impl OfflineLicenseStore for FileStore {
    fn load_offline_license(&self) -> Result<Option<OfflineLicenseRecord>, TierwardenError> {
        let Some(bytes) = self.read(OFFLINE_LICENSE_FILE)? else {
            return Ok(None);
        };
        let json = String::from_utf8(bytes)
            .map_err(|e| TierwardenError::Malformed(format!("Offline record is not UTF-8: {}", e)))?;
        OfflineLicenseRecord::from_json(&json).map(Some)
    }

    fn save_offline_license(&self, record: &OfflineLicenseRecord) -> Result<(), TierwardenError> {
        self.write_atomic(OFFLINE_LICENSE_FILE, record.to_json()?.as_bytes())
    }

    fn load_revocation_list(&self) -> Result<Option<Vec<u8>>, TierwardenError> {
        self.read(REVOCATION_LIST_FILE)
    }

    fn save_revocation_list(&self, blob: &[u8]) -> Result<(), TierwardenError> {
        self.write_atomic(REVOCATION_LIST_FILE, blob)
    }
}
