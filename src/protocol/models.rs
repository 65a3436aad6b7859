//! Wire structs: license payload, license-server messages, revocation lists,
//! renewal requests.

use crate::tier::Tier;
use crate::TierwardenError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Signed license payload carried inside a license key or offline file.
///
/// The signature covers the exact serialized bytes, so this struct is only
/// ever deserialized from already-verified bytes, never re-serialized for
/// verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicensePayload {
    /// Customer the license was issued to.
    pub customer_id: String,

    /// License serial, used by revocation lists. Defaults to the customer id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,

    /// Licensed tier.
    pub tier: Tier,

    /// When the license was issued.
    pub issued_at: DateTime<Utc>,

    /// When the license stops being valid (`None` = perpetual).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Numeric limits (agents, repositories, ...).
    #[serde(default)]
    pub limits: BTreeMap<String, i64>,

    /// Monotonic issue sequence (anti-rollback).
    pub sequence: u64,
}

/// Parse verified payload bytes into a [`LicensePayload`].
pub fn parse_license_payload(bytes: &[u8]) -> Result<LicensePayload, TierwardenError> {
    let payload: LicensePayload = serde_json::from_slice(bytes)
        .map_err(|e| TierwardenError::InvalidPayload(format!("{}", e)))?;

    if payload.customer_id.trim().is_empty() {
        return Err(TierwardenError::InvalidPayload(
            "customer_id cannot be empty".to_string(),
        ));
    }
    if let Some(expires_at) = payload.expires_at {
        if expires_at <= payload.issued_at {
            return Err(TierwardenError::InvalidPayload(
                "expires_at must be after issued_at".to_string(),
            ));
        }
    }

    Ok(payload)
}

/// Body of `POST /activate`.
#[derive(Debug, Clone, Serialize)]
pub struct ActivationRequest<'a> {
    /// Raw license key.
    pub license_key: &'a str,
    /// Product identifier.
    pub product: &'a str,
}

/// Body of `POST /deactivate`.
#[derive(Debug, Clone, Serialize)]
pub struct DeactivationRequest<'a> {
    /// Raw license key.
    pub license_key: &'a str,
}

/// License server answer to an activation / revalidation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationResponse {
    /// Whether the server still honors the license.
    pub valid: bool,

    /// Renewed license key, when the server issued a fresh one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_key: Option<String>,

    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Parse a license-server response body.
pub fn parse_activation_response(body: &[u8]) -> Result<ActivationResponse, TierwardenError> {
    serde_json::from_slice(body).map_err(|e| {
        TierwardenError::ProtocolError(format!("Failed to parse activation response: {}", e))
    })
}

/// Signed revocation list as distributed to air-gapped installs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationListDocument {
    /// Monotonic list sequence (anti-rollback).
    pub sequence: u64,

    /// When the list was issued (informational, not signed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,

    /// Revoked customer ids / serials.
    #[serde(default)]
    pub revoked: Vec<String>,

    /// Base64url Ed25519 signature over the revocation signing string.
    pub signature: String,
}

/// Renewal request exported for manual submission to support.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalRequest {
    /// Customer id of the held license.
    pub customer_id: String,
    /// Tier currently in effect.
    pub current_tier: Tier,
    /// Expiry of the held license.
    pub expires_at: Option<DateTime<Utc>>,
    /// When this request was generated.
    pub requested_at: DateTime<Utc>,
}

impl RenewalRequest {
    /// Serialize for download.
    pub fn to_json(&self) -> Result<String, TierwardenError> {
        serde_json::to_string_pretty(self).map_err(|e| {
            TierwardenError::ProtocolError(format!("Failed to serialize renewal request: {}", e))
        })
    }

    /// Suggested download file name.
    pub fn file_name(&self) -> String {
        let safe: String = self
            .customer_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!(
            "renewal-request-{}-{}.json",
            safe,
            self.requested_at.format("%Y%m%d")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_PAYLOAD: &str = r#"{
        "customer_id": "cus_123",
        "serial": "LIC-0001",
        "tier": "enterprise",
        "issued_at": "2025-01-01T00:00:00Z",
        "expires_at": "2026-01-01T00:00:00Z",
        "limits": {"agents": 50, "repositories": 200},
        "sequence": 7
    }"#;

    const MINIMAL_PAYLOAD: &str = r#"{
        "customer_id": "cus_123",
        "tier": "pro",
        "issued_at": "2025-01-01T00:00:00Z",
        "sequence": 1
    }"#;

    #[test]
    fn test_parse_full_payload() {
        let payload = parse_license_payload(FULL_PAYLOAD.as_bytes()).unwrap();
        assert_eq!(payload.customer_id, "cus_123");
        assert_eq!(payload.serial.as_deref(), Some("LIC-0001"));
        assert_eq!(payload.tier, Tier::Enterprise);
        assert_eq!(payload.limits.get("agents"), Some(&50));
        assert_eq!(payload.sequence, 7);
    }

    #[test]
    fn test_parse_minimal_payload() {
        let payload = parse_license_payload(MINIMAL_PAYLOAD.as_bytes()).unwrap();
        assert!(payload.serial.is_none());
        assert!(payload.expires_at.is_none());
        assert!(payload.limits.is_empty());
    }

    #[test]
    fn test_parse_rejects_unknown_tier() {
        let body = MINIMAL_PAYLOAD.replace("\"pro\"", "\"platinum\"");
        assert!(matches!(
            parse_license_payload(body.as_bytes()),
            Err(TierwardenError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_parse_rejects_empty_customer() {
        let body = MINIMAL_PAYLOAD.replace("cus_123", " ");
        assert!(matches!(
            parse_license_payload(body.as_bytes()),
            Err(TierwardenError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_parse_rejects_inverted_dates() {
        let body = FULL_PAYLOAD.replace("2026-01-01", "2024-01-01");
        assert!(matches!(
            parse_license_payload(body.as_bytes()),
            Err(TierwardenError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_parse_activation_response() {
        let response =
            parse_activation_response(br#"{"valid":true,"license_key":"abc.def"}"#).unwrap();
        assert!(response.valid);
        assert_eq!(response.license_key.as_deref(), Some("abc.def"));

        let response = parse_activation_response(br#"{"valid":false,"message":"revoked"}"#).unwrap();
        assert!(!response.valid);
        assert_eq!(response.message.as_deref(), Some("revoked"));
    }

    #[test]
    fn test_parse_activation_response_malformed() {
        assert!(matches!(
            parse_activation_response(b"<html>bad gateway</html>"),
            Err(TierwardenError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_renewal_request_json_fields() {
        let request = RenewalRequest {
            customer_id: "acme/corp".to_string(),
            current_tier: Tier::Pro,
            expires_at: None,
            requested_at: "2025-03-04T05:06:07Z".parse().unwrap(),
        };
        let json: serde_json::Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();
        assert_eq!(json["customer_id"], "acme/corp");
        assert_eq!(json["current_tier"], "pro");
        assert!(json.get("requested_at").is_some());
        assert_eq!(request.file_name(), "renewal-request-acme_corp-20250304.json");
    }
}
