//! Signed revocation lists for air-gapped installs.

use crate::crypto::codec::{decode_segment, verify};
use crate::crypto::signing::{build_revocation_signing_string, is_valid_revocation_id};
use crate::license::License;
use crate::protocol::models::RevocationListDocument;
use crate::TierwardenError;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, VerifyingKey};
use std::collections::BTreeSet;

/// Verified set of revoked customer ids and serials.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RevocationList {
    sequence: u64,
    issued_at: Option<DateTime<Utc>>,
    revoked: BTreeSet<String>,
}

impl RevocationList {
    /// The list held before any upload: sequence 0, nothing revoked.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse and verify a revocation list document.
    ///
    /// # Errors
    /// * `Malformed` - not a revocation list document, an empty or
    ///   control-character id, or bad signature encoding
    /// * `InvalidSignature` - signature does not cover this sequence and entry list
    pub fn parse(blob: &[u8], verifying_key: &VerifyingKey) -> Result<Self, TierwardenError> {
        let document: RevocationListDocument = serde_json::from_slice(blob)
            .map_err(|e| TierwardenError::Malformed(format!("Revocation list: {}", e)))?;

        if let Some(bad) = document.revoked.iter().find(|id| !is_valid_revocation_id(id)) {
            return Err(TierwardenError::Malformed(format!(
                "Revocation list entry {:?} is empty or contains control characters",
                bad
            )));
        }

        let signature_bytes = decode_segment(document.signature.trim()).map_err(|e| {
            TierwardenError::Malformed(format!("Revocation list signature: {}", e))
        })?;
        let signature = Signature::from_slice(&signature_bytes).map_err(|_| {
            TierwardenError::Malformed(format!(
                "Revocation list signature must be 64 bytes, got {}",
                signature_bytes.len()
            ))
        })?;

        let signing_string = build_revocation_signing_string(document.sequence, &document.revoked);
        verify(signing_string.as_bytes(), &signature, verifying_key)?;

        Ok(Self {
            sequence: document.sequence,
            issued_at: document.issued_at,
            revoked: document.revoked.into_iter().collect(),
        })
    }

    /// Monotonic list sequence.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Issue time, if the document carried one.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    /// Number of revoked entries.
    pub fn len(&self) -> usize {
        self.revoked.len()
    }

    /// Whether nothing is revoked.
    pub fn is_empty(&self) -> bool {
        self.revoked.is_empty()
    }

    /// Whether the list names `id`.
    pub fn is_revoked(&self, id: &str) -> bool {
        self.revoked.contains(id)
    }

    /// Whether the list names the license's customer id or serial.
    pub fn contains(&self, license: &License) -> bool {
        !license.is_free() && license.revocation_ids().any(|id| self.is_revoked(id))
    }
}

/// Build a signed revocation list document.
#[cfg(any(test, feature = "test-seams"))]
pub fn sign_revocation_list(
    sequence: u64,
    revoked: &[&str],
    signing_key: &ed25519_dalek::SigningKey,
) -> Vec<u8> {
    use crate::crypto::codec::encode_segment;
    use ed25519_dalek::Signer;

    let revoked: Vec<String> = revoked.iter().map(|id| id.to_string()).collect();
    let signature = signing_key.sign(build_revocation_signing_string(sequence, &revoked).as_bytes());
    let document = RevocationListDocument {
        sequence,
        issued_at: None,
        revoked,
        signature: encode_segment(&signature.to_bytes()),
    };
    serde_json::to_vec(&document).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::crypto::codec::{parse_license_key, sign_payload_bytes};
    use chrono::TimeZone;
    use ed25519_dalek::SigningKey;

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn license(payload: &[u8]) -> License {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap());
        let key = sign_payload_bytes(payload, &signing_key());
        parse_license_key(&key, &signing_key().verifying_key(), &clock).unwrap()
    }

    #[test]
    fn test_parse_verified_list() {
        let blob = sign_revocation_list(3, &["cus_1", "LIC-9"], &signing_key());
        let list = RevocationList::parse(&blob, &signing_key().verifying_key()).unwrap();
        assert_eq!(list.sequence(), 3);
        assert_eq!(list.len(), 2);
        assert!(list.is_revoked("LIC-9"));
        assert!(!list.is_revoked("cus_2"));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let blob = sign_revocation_list(3, &["cus_1"], &signing_key());
        let other = SigningKey::from_bytes(&[8u8; 32]).verifying_key();
        assert!(matches!(
            RevocationList::parse(&blob, &other),
            Err(TierwardenError::InvalidSignature)
        ));
    }

    #[test]
    fn test_edited_entries_rejected() {
        let blob = sign_revocation_list(3, &["cus_1"], &signing_key());
        let mut document: RevocationListDocument = serde_json::from_slice(&blob).unwrap();
        document.revoked.clear();
        let edited = serde_json::to_vec(&document).unwrap();
        assert!(matches!(
            RevocationList::parse(&edited, &signing_key().verifying_key()),
            Err(TierwardenError::InvalidSignature)
        ));

        document.revoked = vec!["cus_1".to_string()];
        document.sequence = 4;
        let bumped = serde_json::to_vec(&document).unwrap();
        assert!(matches!(
            RevocationList::parse(&bumped, &signing_key().verifying_key()),
            Err(TierwardenError::InvalidSignature)
        ));
    }

    #[test]
    fn test_rejoined_entries_rejected() {
        let blob = sign_revocation_list(2, &["cus_1", "cus_2"], &signing_key());
        let mut document: RevocationListDocument = serde_json::from_slice(&blob).unwrap();
        document.revoked = vec!["cus_1,cus_2".to_string()];
        let rejoined = serde_json::to_vec(&document).unwrap();
        assert!(matches!(
            RevocationList::parse(&rejoined, &signing_key().verifying_key()),
            Err(TierwardenError::InvalidSignature)
        ));

        document.revoked = vec!["cus_1\ncus_2".to_string()];
        let split = serde_json::to_vec(&document).unwrap();
        assert!(matches!(
            RevocationList::parse(&split, &signing_key().verifying_key()),
            Err(TierwardenError::Malformed(_))
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let key = signing_key().verifying_key();
        assert!(matches!(
            RevocationList::parse(b"not json", &key),
            Err(TierwardenError::Malformed(_))
        ));
        assert!(matches!(
            RevocationList::parse(br#"{"sequence":1,"revoked":[],"signature":"AAAA"}"#, &key),
            Err(TierwardenError::Malformed(_))
        ));
    }

    #[test]
    fn test_contains_matches_serial_or_customer() {
        let by_serial = license(
            br#"{"customer_id":"cus_1","serial":"LIC-9","tier":"pro","issued_at":"2025-01-01T00:00:00Z","sequence":1}"#,
        );
        let by_customer = license(
            br#"{"customer_id":"cus_2","tier":"pro","issued_at":"2025-01-01T00:00:00Z","sequence":1}"#,
        );
        let blob = sign_revocation_list(1, &["LIC-9", "cus_2"], &signing_key());
        let list = RevocationList::parse(&blob, &signing_key().verifying_key()).unwrap();

        assert!(list.contains(&by_serial));
        assert!(list.contains(&by_customer));
        assert!(!list.contains(&License::free()));
        assert!(!RevocationList::empty().contains(&by_customer));
    }
}
