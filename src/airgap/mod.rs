//! Air-gapped (offline) licensing.
//!
//! License files and revocation lists are uploaded by an operator and
//! verified against the embedded public key. [`AirGapManager`] has no field
//! that could hold a network client: offline mode cannot reach the network
//! because nothing in it knows how to.

pub mod revocation;

pub use revocation::RevocationList;

use crate::clock::Clock;
use crate::config::AirGapConfig;
use crate::crypto::codec::{decode_public_key, parse_license_key};
use crate::crypto::digest::{entitlement_nonce, key_fingerprint};
use crate::license::License;
use crate::policy::access::{EntitlementConfirmation, EntitlementSource};
use crate::protocol::models::RenewalRequest;
use crate::store::{OfflineLicenseRecord, OfflineLicenseStore};
use crate::tier::Tier;
use crate::TierwardenError;
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{info, warn};

/// Public license status, safe to expose before login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AirGapStatus {
    /// A license is held, unexpired and not revoked.
    pub valid: bool,

    /// Tier in effect (Free unless valid).
    pub tier: Tier,

    /// Expiry of the held license.
    pub expires_at: Option<DateTime<Utc>>,

    /// Customer of the held license.
    pub customer_id: Option<String>,

    /// The held license appears on the revocation list.
    pub revoked: bool,

    /// Sequence of the held revocation list (0 before any upload).
    pub revocation_sequence: u64,
}

/// Result of a revocation list update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevocationApplied {
    /// Sequence of the list now held.
    pub sequence: u64,

    /// The held license is revoked by the new list.
    pub license_revoked: bool,
}

#[derive(Debug, Clone, Default)]
struct AirGapState {
    license: Option<Arc<License>>,
    record: Option<OfflineLicenseRecord>,
    revocations: RevocationList,
}

impl AirGapState {
    fn is_revoked(&self) -> bool {
        self.license
            .as_ref()
            .is_some_and(|license| self.revocations.contains(license))
    }

    fn effective_tier(&self, now: DateTime<Utc>) -> Tier {
        match &self.license {
            Some(license) if !self.is_revoked() => license.effective_tier(now),
            _ => Tier::Free,
        }
    }
}

/// Offline license manager.
pub struct AirGapManager {
    verifying_key: VerifyingKey,
    store: Arc<dyn OfflineLicenseStore>,
    clock: Arc<dyn Clock>,
    state: RwLock<Arc<AirGapState>>,
    writes: Mutex<()>,
}

impl AirGapManager {
    /// Create a manager and restore persisted state.
    ///
    /// Persisted records are re-verified; anything that fails to decode or
    /// verify is discarded with a warning. Storage I/O errors are returned.
    pub fn new(
        config: AirGapConfig,
        store: Arc<dyn OfflineLicenseStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TierwardenError> {
        config.validate()?;
        let verifying_key = decode_public_key(config.public_key_hex)?;

        let revocations = match store.load_revocation_list()? {
            Some(blob) => RevocationList::parse(&blob, &verifying_key).unwrap_or_else(|e| {
                warn!(error = %e, "Discarding persisted revocation list");
                RevocationList::empty()
            }),
            None => RevocationList::empty(),
        };

        let (license, record) = match store.load_offline_license() {
            Ok(Some(record)) => match record.verify(&verifying_key, clock.as_ref()) {
                Ok(license) => (Some(Arc::new(license)), Some(record)),
                Err(e) => {
                    warn!(error = %e, "Discarding persisted offline license");
                    (None, None)
                }
            },
            Ok(None) => (None, None),
            Err(e @ TierwardenError::Malformed(_)) => {
                warn!(error = %e, "Discarding unreadable offline license record");
                (None, None)
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            verifying_key,
            store,
            clock,
            state: RwLock::new(Arc::new(AirGapState {
                license,
                record,
                revocations,
            })),
            writes: Mutex::new(()),
        })
    }

    /// Verify and install an uploaded license file.
    ///
    /// # Errors
    /// * `Malformed` / `InvalidSignature` / `InvalidPayload` - bad file
    /// * `Expired` - the file is already expired
    /// * `Revoked` - the license is on the held revocation list
    /// * `StaleSequence` - older issue than the held license of the same customer
    /// * `StoreIO` - persisting failed; held state is unchanged
    pub fn apply_new_license(
        &self,
        blob: &[u8],
        uploaded_by: &str,
    ) -> Result<Arc<License>, TierwardenError> {
        let raw = std::str::from_utf8(blob)
            .map_err(|e| TierwardenError::Malformed(format!("License file is not UTF-8: {}", e)))?
            .trim();
        let license = parse_license_key(raw, &self.verifying_key, self.clock.as_ref())?;

        let _writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.state();

        if current.revocations.contains(&license) {
            return Err(TierwardenError::Revoked {
                customer_id: license.customer_id().to_string(),
            });
        }
        if let Some(held) = &current.license {
            if held.customer_id() == license.customer_id() && license.sequence() < held.sequence() {
                return Err(TierwardenError::StaleSequence {
                    presented: license.sequence(),
                    current: held.sequence(),
                });
            }
        }

        let record = OfflineLicenseRecord::new(raw, uploaded_by, self.clock.as_ref());
        self.store.save_offline_license(&record)?;

        let license = Arc::new(license);
        self.swap(AirGapState {
            license: Some(Arc::clone(&license)),
            record: Some(record),
            revocations: current.revocations.clone(),
        });

        info!(
            key = %key_fingerprint(raw),
            customer_id = license.customer_id(),
            tier = license.tier().as_str(),
            uploaded_by,
            "Offline license applied"
        );
        Ok(license)
    }

    /// Verify and install a newer revocation list.
    ///
    /// A held license named by the new list is downgraded at once.
    ///
    /// # Errors
    /// * `Malformed` / `InvalidSignature` - bad list
    /// * `StaleSequence` - sequence not strictly greater than the held list's
    /// * `StoreIO` - persisting failed; held state is unchanged
    pub fn update_revocation_list(
        &self,
        blob: &[u8],
    ) -> Result<RevocationApplied, TierwardenError> {
        let list = RevocationList::parse(blob, &self.verifying_key)?;

        let _writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.state();

        if list.sequence() <= current.revocations.sequence() {
            return Err(TierwardenError::StaleSequence {
                presented: list.sequence(),
                current: current.revocations.sequence(),
            });
        }

        self.store.save_revocation_list(blob)?;

        let next = AirGapState {
            license: current.license.clone(),
            record: current.record.clone(),
            revocations: list,
        };
        let applied = RevocationApplied {
            sequence: next.revocations.sequence(),
            license_revoked: next.is_revoked(),
        };
        self.swap(next);

        if applied.license_revoked && !current.is_revoked() {
            warn!(
                sequence = applied.sequence,
                "Held offline license revoked, downgrading to free"
            );
        } else {
            info!(sequence = applied.sequence, "Revocation list updated");
        }
        Ok(applied)
    }

    /// Export a renewal request for manual submission.
    ///
    /// # Errors
    /// `MissingLicense` when no license is held.
    pub fn generate_renewal_request(&self) -> Result<RenewalRequest, TierwardenError> {
        let state = self.state();
        let license = state.license.as_ref().ok_or(TierwardenError::MissingLicense)?;
        Ok(RenewalRequest {
            customer_id: license.customer_id().to_string(),
            current_tier: license.tier(),
            expires_at: license.expires_at(),
            requested_at: self.clock.now_utc(),
        })
    }

    /// Current license status. Pure read.
    pub fn get_status(&self) -> AirGapStatus {
        let state = self.state();
        let now = self.clock.now_utc();
        let revoked = state.is_revoked();
        let valid = state
            .license
            .as_ref()
            .is_some_and(|license| !revoked && !license.is_expired(now));

        AirGapStatus {
            valid,
            tier: state.effective_tier(now),
            expires_at: state.license.as_ref().and_then(|l| l.expires_at()),
            customer_id: state.license.as_ref().map(|l| l.customer_id().to_string()),
            revoked,
            revocation_sequence: state.revocations.sequence(),
        }
    }

    /// Held license, Free when none is held.
    pub fn current_license(&self) -> Arc<License> {
        self.state()
            .license
            .clone()
            .unwrap_or_else(|| Arc::new(License::free()))
    }

    /// Tier to gate on right now.
    pub fn current_tier(&self) -> Tier {
        self.state().effective_tier(self.clock.now_utc())
    }

    /// Record of the last accepted upload.
    pub fn offline_license(&self) -> Option<OfflineLicenseRecord> {
        self.state().record.clone()
    }

    /// Held revocation list.
    pub fn revocation_list(&self) -> RevocationList {
        self.state().revocations.clone()
    }

    fn state(&self) -> Arc<AirGapState> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn swap(&self, next: AirGapState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }
}

impl EntitlementSource for AirGapManager {
    /// Offline licenses are verified locally on every read, so the
    /// confirmation is always current. Without a license it vouches for Free.
    fn confirmation(&self) -> Option<EntitlementConfirmation> {
        let state = self.state();
        let now = self.clock.now_utc();
        let Some(record) = state.record.as_ref() else {
            return Some(EntitlementConfirmation::unlicensed(now));
        };
        let tier = state.effective_tier(now);
        Some(EntitlementConfirmation {
            tier,
            nonce: entitlement_nonce(&record.raw, tier.as_str(), now),
            confirmed_at: now,
        })
    }
}
