//! Tierwarden error types.

use crate::license::License;
use crate::tier::Tier;
use crate::trial::TrialStatus;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors produced by the license and entitlement engine.
#[derive(Debug, Error)]
pub enum TierwardenError {
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// License key or offline file envelope could not be decoded.
    #[error("Malformed license envelope: {0}")]
    Malformed(String),

    /// Ed25519 signature verification failed (tampered or forged).
    #[error("License signature verification failed")]
    InvalidSignature,

    /// Signed payload does not match the license schema.
    #[error("Invalid license payload: {0}")]
    InvalidPayload(String),

    /// License signature is valid but the license has expired.
    ///
    /// The decoded license is carried so callers can still display it.
    #[error("License expired at {expires_at}")]
    Expired {
        /// When the license expired.
        expires_at: DateTime<Utc>,
        /// The verified, expired license.
        license: Box<License>,
    },

    /// License has been revoked.
    #[error("License for customer {customer_id} has been revoked")]
    Revoked {
        /// Customer whose license was revoked.
        customer_id: String,
    },

    /// Update carries a sequence number older than the one already accepted.
    #[error("Stale update rejected (sequence {presented}, current {current})")]
    StaleSequence {
        /// Sequence number of the rejected update.
        presented: u64,
        /// Sequence number currently held.
        current: u64,
    },

    /// HTTP transport error communicating with the license server.
    #[error("License server transport error: {0}")]
    ServerTransport(String),

    /// License server answered with something we could not interpret.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Persistence collaborator failed.
    #[error("Store I/O error: {0}")]
    StoreIO(String),

    /// No license is held.
    #[error("No license present")]
    MissingLicense,

    /// Validator was stopped and has not been restarted.
    #[error("Validator is stopped")]
    ValidatorStopped,

    /// Feature name is not in the catalog.
    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    /// Feature requires a higher tier than the organization has.
    #[error("Feature {feature} requires the {required} tier (current: {current})")]
    FeatureNotAvailable {
        /// The feature that was requested.
        feature: String,
        /// Tier the organization currently resolves to.
        current: Tier,
        /// Minimum tier the feature requires.
        required: Tier,
    },

    /// Organization already had a trial.
    #[error("Trial already started for organization {org_id}")]
    TrialAlreadyStarted {
        /// Organization ID.
        org_id: String,
    },

    /// Organization never started a trial.
    #[error("No trial found for organization {org_id}")]
    TrialNotFound {
        /// Organization ID.
        org_id: String,
    },

    /// Operation requires an active trial.
    #[error("Trial for organization {org_id} is not active ({status})")]
    TrialNotActive {
        /// Organization ID.
        org_id: String,
        /// Status the trial is actually in.
        status: TrialStatus,
    },

    /// Cumulative trial extension would exceed the configured maximum.
    #[error("Trial extension of {requested} days exceeds the remaining allowance of {remaining} days")]
    ExtensionLimitExceeded {
        /// Days requested.
        requested: u32,
        /// Days still allowed.
        remaining: u32,
    },

    /// Caller supplied an invalid argument.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl TierwardenError {
    /// Whether the failure is transient and worth retrying on the next tick.
    ///
    /// Only license-server communication failures qualify. Verification,
    /// revocation and validation errors always fail the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ServerTransport(_) | Self::ProtocolError(_))
    }
}
