//! SHA-256 helpers for key fingerprints and entitlement nonces.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Short, non-reversible fingerprint of a license key.
///
/// Safe to log and to use in file names; never log the raw key.
pub fn key_fingerprint(raw_key: &str) -> String {
    let mut hash = sha256_hex(raw_key.trim().as_bytes());
    hash.truncate(16);
    hash
}

/// Derive an entitlement nonce binding a key to a confirmation instant.
pub fn entitlement_nonce(raw_key: &str, tier: &str, confirmed_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.trim().as_bytes());
    hasher.update(b"\n");
    hasher.update(tier.as_bytes());
    hasher.update(b"\n");
    hasher.update(confirmed_at.to_rfc3339().as_bytes());
    let mut nonce = hex::encode(hasher.finalize());
    nonce.truncate(32);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sha256_empty_body() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let a = key_fingerprint("abc.def");
        let b = key_fingerprint(" abc.def\n");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, key_fingerprint("abc.deg"));
    }

    #[test]
    fn test_nonce_changes_with_time_and_tier() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let n0 = entitlement_nonce("k", "pro", t0);
        assert_eq!(n0.len(), 32);
        assert_eq!(n0, entitlement_nonce("k", "pro", t0));
        assert_ne!(n0, entitlement_nonce("k", "pro", t1));
        assert_ne!(n0, entitlement_nonce("k", "free", t0));
    }
}
