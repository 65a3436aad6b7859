//! Persisted offline license record.
//!
//! The record stores the raw signed blob, never the decoded license. On load
//! the blob is re-verified against the embedded key, so editing the file on
//! disk cannot raise the tier.

use crate::clock::Clock;
use crate::crypto::codec::parse_license_key_allow_expired;
use crate::license::License;
use crate::TierwardenError;
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

/// Last accepted air-gap license upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineLicenseRecord {
    /// Raw license envelope as uploaded.
    pub raw: String,

    /// Who uploaded it.
    pub uploaded_by: String,

    /// When it was accepted.
    pub uploaded_at: DateTime<Utc>,
}

impl OfflineLicenseRecord {
    /// Create a record for an upload accepted now.
    pub fn new(raw: impl Into<String>, uploaded_by: impl Into<String>, clock: &dyn Clock) -> Self {
        Self {
            raw: raw.into(),
            uploaded_by: uploaded_by.into(),
            uploaded_at: clock.now_utc(),
        }
    }

    /// Serialize the record to JSON.
    pub fn to_json(&self) -> Result<String, TierwardenError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| TierwardenError::StoreIO(format!("Failed to serialize record: {}", e)))
    }

    /// Deserialize a record from JSON.
    pub fn from_json(json: &str) -> Result<Self, TierwardenError> {
        serde_json::from_str(json)
            .map_err(|e| TierwardenError::Malformed(format!("Offline license record: {}", e)))
    }

    /// Re-verify the stored blob and rebuild the license.
    ///
    /// Expired licenses are returned as-is; the caller decides what expiry
    /// means. Tampered records fail with `InvalidSignature` or `Malformed`.
    pub fn verify(
        &self,
        verifying_key: &VerifyingKey,
        clock: &dyn Clock,
    ) -> Result<License, TierwardenError> {
        parse_license_key_allow_expired(&self.raw, verifying_key, clock)
    }
}
