//! License key envelope codec and Ed25519 verification.
//!
//! Wire format: `base64url(payload) "." base64url(signature)`.
//!
//! The signature covers the exact decoded payload bytes. The payload is kept
//! as raw bytes through [`decode`] and [`verify`] and only deserialized
//! afterwards, so field order or whitespace in the JSON can never change what
//! was verified.

use crate::clock::Clock;
use crate::license::License;
use crate::protocol::models::parse_license_payload;
use crate::TierwardenError;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// Envelope segment delimiter.
pub const DELIMITER: char = '.';

/// Base64url engine that accepts both padded and unpadded input.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode bytes as unpadded base64url.
pub fn encode_segment(bytes: &[u8]) -> String {
    URL_SAFE_LENIENT.encode(bytes)
}

/// Decode a base64url segment (padding optional).
pub fn decode_segment(segment: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_LENIENT.decode(segment)
}

/// Split an envelope and decode both halves.
///
/// # Errors
/// * `Malformed` - wrong segment count, bad base64, or a signature that is
///   not 64 bytes
pub fn decode(raw: &str) -> Result<(Vec<u8>, Signature), TierwardenError> {
    let raw = raw.trim();
    let mut parts = raw.split(DELIMITER);

    let (Some(payload_b64), Some(signature_b64), None) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(TierwardenError::Malformed(
            "expected exactly two segments separated by '.'".to_string(),
        ));
    };

    if payload_b64.is_empty() || signature_b64.is_empty() {
        return Err(TierwardenError::Malformed("empty segment".to_string()));
    }

    let payload = decode_segment(payload_b64)
        .map_err(|e| TierwardenError::Malformed(format!("invalid payload base64: {}", e)))?;

    let sig_bytes = decode_segment(signature_b64)
        .map_err(|e| TierwardenError::Malformed(format!("invalid signature base64: {}", e)))?;

    let sig_array: [u8; 64] = sig_bytes.try_into().map_err(|_| {
        TierwardenError::Malformed("signature must be 64 bytes".to_string())
    })?;

    Ok((payload, Signature::from_bytes(&sig_array)))
}

/// Verify an Ed25519 signature over the exact payload bytes.
pub fn verify(
    payload: &[u8],
    signature: &Signature,
    verifying_key: &VerifyingKey,
) -> Result<(), TierwardenError> {
    verifying_key
        .verify(payload, signature)
        .map_err(|_| TierwardenError::InvalidSignature)
}

/// Decode, verify and deserialize a license key.
///
/// # Errors
/// * `Malformed` - envelope could not be decoded
/// * `InvalidSignature` - signature does not match the payload
/// * `InvalidPayload` - verified bytes are not a valid license payload
/// * `Expired` - signature valid but `expires_at <= now`; the decoded license
///   is carried in the error for callers that still want to display it
pub fn parse_license_key(
    raw: &str,
    verifying_key: &VerifyingKey,
    clock: &dyn Clock,
) -> Result<License, TierwardenError> {
    let (payload, signature) = decode(raw)?;
    verify(&payload, &signature, verifying_key)?;

    let license = License::from_verified_payload(parse_license_payload(&payload)?);

    if let Some(expires_at) = license.expires_at() {
        if expires_at <= clock.now_utc() {
            return Err(TierwardenError::Expired {
                expires_at,
                license: Box::new(license),
            });
        }
    }

    Ok(license)
}

/// Like [`parse_license_key`], but an expired license is returned rather than
/// rejected. Malformed, forged and invalid payloads still fail.
pub fn parse_license_key_allow_expired(
    raw: &str,
    verifying_key: &VerifyingKey,
    clock: &dyn Clock,
) -> Result<License, TierwardenError> {
    match parse_license_key(raw, verifying_key, clock) {
        Err(TierwardenError::Expired { license, .. }) => Ok(*license),
        other => other,
    }
}

/// Decode a hex-encoded Ed25519 public key.
///
/// Called once per manager at construction; the decoded key is held there.
pub fn decode_public_key(hex_key: &str) -> Result<VerifyingKey, TierwardenError> {
    let bytes = hex::decode(hex_key)
        .map_err(|e| TierwardenError::ConfigError(format!("Invalid public key hex: {}", e)))?;

    let key_array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| TierwardenError::ConfigError("Public key must be 32 bytes".to_string()))?;

    VerifyingKey::from_bytes(&key_array)
        .map_err(|e| TierwardenError::ConfigError(format!("Invalid Ed25519 public key: {}", e)))
}

/// Sign raw payload bytes into a license key envelope.
#[cfg(any(test, feature = "test-seams"))]
pub fn sign_payload_bytes(payload: &[u8], signing_key: &ed25519_dalek::SigningKey) -> String {
    use ed25519_dalek::Signer;
    let signature = signing_key.sign(payload);
    format!(
        "{}{}{}",
        encode_segment(payload),
        DELIMITER,
        encode_segment(&signature.to_bytes())
    )
}

/// Serialize and sign a license payload into a license key envelope.
#[cfg(any(test, feature = "test-seams"))]
pub fn sign_license_payload(
    payload: &crate::protocol::models::LicensePayload,
    signing_key: &ed25519_dalek::SigningKey,
) -> String {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    sign_payload_bytes(&bytes, signing_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::protocol::models::LicensePayload;
    use crate::tier::Tier;
    use chrono::{Duration, TimeZone, Utc};
    use ed25519_dalek::SigningKey;
    use std::collections::BTreeMap;

    // Test keypair (DO NOT USE IN PRODUCTION)
    const TEST_PRIVATE_KEY_HEX: &str =
        "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";
    const TEST_PUBLIC_KEY_HEX: &str =
        "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a";

    fn signing_key() -> SigningKey {
        let bytes = hex::decode(TEST_PRIVATE_KEY_HEX).unwrap();
        SigningKey::from_bytes(&bytes.try_into().unwrap())
    }

    fn verifying_key() -> VerifyingKey {
        decode_public_key(TEST_PUBLIC_KEY_HEX).unwrap()
    }

    fn clock() -> MockClock {
        MockClock::new(Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap())
    }

    fn payload(tier: Tier, expires_in: Option<Duration>) -> LicensePayload {
        let issued_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        LicensePayload {
            customer_id: "cus_42".to_string(),
            serial: None,
            tier,
            issued_at,
            expires_at: expires_in.map(|d| Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap() + d),
            limits: BTreeMap::from([("agents".to_string(), 25)]),
            sequence: 4,
        }
    }

    #[test]
    fn test_parse_recovers_fields() {
        let key = sign_license_payload(&payload(Tier::Enterprise, Some(Duration::days(30))), &signing_key());
        let license = parse_license_key(&key, &verifying_key(), &clock()).unwrap();

        assert_eq!(license.customer_id(), "cus_42");
        assert_eq!(license.tier(), Tier::Enterprise);
        assert_eq!(
            license.expires_at(),
            Some(Utc.with_ymd_and_hms(2025, 2, 14, 12, 0, 0).unwrap())
        );
        assert_eq!(license.limit("agents"), Some(25));
        assert_eq!(license.sequence(), 4);
    }

    #[test]
    fn test_every_signature_bit_flip_is_rejected() {
        let key = sign_license_payload(&payload(Tier::Pro, None), &signing_key());
        let (payload_b64, sig_b64) = key.split_once('.').unwrap();
        let sig = decode_segment(sig_b64).unwrap();

        for bit in 0..(sig.len() * 8) {
            let mut flipped = sig.clone();
            flipped[bit / 8] ^= 1 << (bit % 8);
            let tampered = format!("{}.{}", payload_b64, encode_segment(&flipped));
            let result = parse_license_key(&tampered, &verifying_key(), &clock());
            assert!(
                matches!(result, Err(TierwardenError::InvalidSignature)),
                "bit {} accepted",
                bit
            );
        }
    }

    #[test]
    fn test_payload_tamper_is_rejected() {
        let key = sign_license_payload(&payload(Tier::Pro, None), &signing_key());
        let (payload_b64, sig_b64) = key.split_once('.').unwrap();
        let body = String::from_utf8(decode_segment(payload_b64).unwrap()).unwrap();
        let forged = body.replace("\"pro\"", "\"enterprise\"");
        let tampered = format!("{}.{}", encode_segment(forged.as_bytes()), sig_b64);

        assert!(matches!(
            parse_license_key(&tampered, &verifying_key(), &clock()),
            Err(TierwardenError::InvalidSignature)
        ));
    }

    #[test]
    fn test_verifies_exact_bytes_not_reserialization() {
        // Same fields, unusual key order and whitespace: still valid because
        // the signature covers these exact bytes.
        let body = br#"{ "sequence": 1, "tier": "pro",  "issued_at": "2025-01-01T00:00:00Z", "customer_id": "cus_9" }"#;
        let key = sign_payload_bytes(body, &signing_key());
        let license = parse_license_key(&key, &verifying_key(), &clock()).unwrap();
        assert_eq!(license.customer_id(), "cus_9");
    }

    #[test]
    fn test_wrong_public_key_is_rejected() {
        let key = sign_license_payload(&payload(Tier::Pro, None), &signing_key());
        let other = SigningKey::from_bytes(&[7u8; 32]).verifying_key();
        assert!(matches!(
            parse_license_key(&key, &other, &clock()),
            Err(TierwardenError::InvalidSignature)
        ));
    }

    #[test]
    fn test_expired_carries_license() {
        let key = sign_license_payload(&payload(Tier::Pro, Some(Duration::days(-1))), &signing_key());
        match parse_license_key(&key, &verifying_key(), &clock()) {
            Err(TierwardenError::Expired { license, expires_at }) => {
                assert_eq!(license.tier(), Tier::Pro);
                assert_eq!(license.expires_at(), Some(expires_at));
            }
            other => panic!("expected Expired, got {:?}", other),
        }

        let license = parse_license_key_allow_expired(&key, &verifying_key(), &clock()).unwrap();
        assert!(license.is_expired(clock().now_utc()));
    }

    #[test]
    fn test_malformed_envelopes() {
        let cases = [
            "",
            "onlyonesegment",
            "a.b.c",
            ".sig",
            "payload.",
            "!!!.AAAA",
            "eyJ9.dG9vc2hvcnQ",
        ];
        for raw in cases {
            assert!(
                matches!(decode(raw), Err(TierwardenError::Malformed(_))),
                "{:?} accepted",
                raw
            );
        }
    }

    #[test]
    fn test_padded_segments_are_accepted() {
        let body = br#"{"customer_id":"cus_1","tier":"free","issued_at":"2025-01-01T00:00:00Z","sequence":0}"#;
        let key = sign_payload_bytes(body, &signing_key());
        let (p, s) = key.split_once('.').unwrap();
        let pad = |seg: &str| format!("{}{}", seg, "=".repeat((4 - seg.len() % 4) % 4));
        let padded = format!("{}.{}", pad(p), pad(s));
        assert!(parse_license_key(&padded, &verifying_key(), &clock()).is_ok());
    }

    #[test]
    fn test_signed_garbage_is_invalid_payload() {
        let key = sign_payload_bytes(b"not json", &signing_key());
        assert!(matches!(
            parse_license_key(&key, &verifying_key(), &clock()),
            Err(TierwardenError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_decode_public_key_invalid_hex() {
        assert!(matches!(
            decode_public_key("not-hex"),
            Err(TierwardenError::ConfigError(_))
        ));
    }

    #[test]
    fn test_decode_public_key_wrong_length() {
        assert!(matches!(
            decode_public_key("abcd"),
            Err(TierwardenError::ConfigError(_))
        ));
    }

    #[test]
    fn test_decode_public_key_bytes() {
        let key = decode_public_key(TEST_PUBLIC_KEY_HEX).unwrap();
        assert_eq!(hex::encode(key.to_bytes()), TEST_PUBLIC_KEY_HEX);
    }
}
