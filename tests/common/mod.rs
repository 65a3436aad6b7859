//! Shared fixtures for integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use ed25519_dalek::SigningKey;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tierwarden::client::LicenseServer;
use tierwarden::crypto::codec::sign_license_payload;
use tierwarden::protocol::models::{ActivationResponse, LicensePayload};
use tierwarden::{Tier, TierwardenError};

// Test keypair (DO NOT USE IN PRODUCTION)
pub const TEST_PRIVATE_KEY_HEX: &str =
    "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";
pub const TEST_PUBLIC_KEY_HEX: &str =
    "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a";

pub fn signing_key() -> SigningKey {
    let bytes = hex::decode(TEST_PRIVATE_KEY_HEX).unwrap();
    SigningKey::from_bytes(&bytes.try_into().unwrap())
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
}

/// Signed license key expiring `expires_in_days` after [`epoch`].
pub fn license_key(
    customer: &str,
    serial: Option<&str>,
    tier: Tier,
    sequence: u64,
    expires_in_days: i64,
) -> String {
    let payload = LicensePayload {
        customer_id: customer.to_string(),
        serial: serial.map(str::to_string),
        tier,
        issued_at: epoch() - Duration::days(90),
        expires_at: Some(epoch() + Duration::days(expires_in_days)),
        limits: BTreeMap::from([("agents".to_string(), 10)]),
        sequence,
    };
    sign_license_payload(&payload, &signing_key())
}

/// What the scripted server answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    Valid,
    Refuse,
    Unreachable,
}

/// In-process license server with a switchable answer.
pub struct ScriptedServer {
    mode: Mutex<ServerMode>,
    calls: AtomicUsize,
}

impl ScriptedServer {
    pub fn new(mode: ServerMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_mode(&self, mode: ServerMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LicenseServer for ScriptedServer {
    fn activate(&self, _license_key: &str) -> Result<ActivationResponse, TierwardenError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match *self.mode.lock().unwrap() {
            ServerMode::Valid => Ok(ActivationResponse {
                valid: true,
                ..Default::default()
            }),
            ServerMode::Refuse => Ok(ActivationResponse {
                valid: false,
                license_key: None,
                message: Some("license revoked".to_string()),
            }),
            ServerMode::Unreachable => Err(TierwardenError::ServerTransport(
                "connection refused".to_string(),
            )),
        }
    }

    fn deactivate(&self, _license_key: &str) -> Result<(), TierwardenError> {
        Ok(())
    }

    fn server_url(&self) -> &str {
        "https://license.example.com"
    }
}
