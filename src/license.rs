//! The immutable, verified license value.

use crate::protocol::models::LicensePayload;
use crate::tier::Tier;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// A license decision input.
///
/// A `License` is only ever built from a signature-verified payload (see
/// [`crate::crypto::codec::parse_license_key`]) or as [`License::free`].
/// It deliberately does not implement `Deserialize`. Holders replace the
/// whole value, they never mutate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct License {
    customer_id: String,
    serial: Option<String>,
    tier: Tier,
    issued_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    limits: BTreeMap<String, i64>,
    sequence: u64,
}

impl License {
    /// The zero value: Free tier, no customer, never expires.
    pub fn free() -> Self {
        Self {
            customer_id: String::new(),
            serial: None,
            tier: Tier::Free,
            issued_at: None,
            expires_at: None,
            limits: BTreeMap::new(),
            sequence: 0,
        }
    }

    /// Build from a payload whose signature has already been verified.
    pub(crate) fn from_verified_payload(payload: LicensePayload) -> Self {
        Self {
            customer_id: payload.customer_id,
            serial: payload.serial,
            tier: payload.tier,
            issued_at: Some(payload.issued_at),
            expires_at: payload.expires_at,
            limits: payload.limits,
            sequence: payload.sequence,
        }
    }

    /// Customer the license was issued to (empty for Free).
    pub fn customer_id(&self) -> &str {
        &self.customer_id
    }

    /// Serial used for revocation, falling back to the customer id.
    pub fn serial(&self) -> &str {
        self.serial.as_deref().unwrap_or(&self.customer_id)
    }

    /// Tier as issued. See [`License::effective_tier`] for gating.
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// When the license was issued (`None` for Free).
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    /// When the license expires (`None` = never).
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// All numeric limits.
    pub fn limits(&self) -> &BTreeMap<String, i64> {
        &self.limits
    }

    /// A single numeric limit.
    pub fn limit(&self, name: &str) -> Option<i64> {
        self.limits.get(name).copied()
    }

    /// Issue sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Whether this is the Free zero value rather than an issued license.
    pub fn is_free(&self) -> bool {
        self.customer_id.is_empty()
    }

    /// Whether the license has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Tier to use for gating at `now`: Free once expired.
    pub fn effective_tier(&self, now: DateTime<Utc>) -> Tier {
        if self.is_expired(now) {
            Tier::Free
        } else {
            self.tier
        }
    }

    /// Identifiers a revocation list may name for this license.
    pub fn revocation_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.customer_id.as_str()).chain(self.serial.as_deref())
    }
}

impl Default for License {
    fn default() -> Self {
        Self::free()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn payload(tier: Tier, expires_at: Option<DateTime<Utc>>) -> LicensePayload {
        LicensePayload {
            customer_id: "cus_1".to_string(),
            serial: Some("SER-1".to_string()),
            tier,
            issued_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            expires_at,
            limits: BTreeMap::from([("agents".to_string(), 10)]),
            sequence: 3,
        }
    }

    #[test]
    fn free_is_zero_value() {
        let license = License::free();
        assert!(license.is_free());
        assert_eq!(license.tier(), Tier::Free);
        assert_eq!(license.sequence(), 0);
        assert!(!license.is_expired(Utc::now()));
        assert_eq!(License::default(), license);
    }

    #[test]
    fn effective_tier_drops_to_free_on_expiry() {
        let expiry = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let license = License::from_verified_payload(payload(Tier::Pro, Some(expiry)));

        assert_eq!(license.effective_tier(expiry - Duration::seconds(1)), Tier::Pro);
        assert_eq!(license.effective_tier(expiry), Tier::Free);
        assert_eq!(license.tier(), Tier::Pro);
    }

    #[test]
    fn perpetual_never_expires() {
        let license = License::from_verified_payload(payload(Tier::Enterprise, None));
        let far = Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(license.effective_tier(far), Tier::Enterprise);
    }

    #[test]
    fn revocation_ids_include_serial() {
        let license = License::from_verified_payload(payload(Tier::Pro, None));
        let ids: Vec<_> = license.revocation_ids().collect();
        assert_eq!(ids, vec!["cus_1", "SER-1"]);
        assert_eq!(license.serial(), "SER-1");
        assert_eq!(license.limit("agents"), Some(10));
        assert_eq!(license.limit("repositories"), None);
    }
}
