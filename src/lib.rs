//! # Tierwarden
//!
//! **Signed tier licenses, feature gating, trials and air-gap licensing.**
//!
//! Tierwarden decides which paid tier (Free, Pro, Enterprise) an installation
//! is entitled to and whether a given feature is enabled for an organization.
//! Licenses are Ed25519-signed envelopes verified against a key compiled into
//! the application; nothing is trusted on the word of local state alone.
//!
//! ## Features
//!
//! - **Ed25519 license keys**: `base64url(payload).base64url(signature)`, verified over the exact payload bytes
//! - **Online validator**: hot-swappable license snapshot, daily background revalidation, 7-day grace period
//! - **Layered feature gating**: org tier, capped by a fresh server confirmation, plus trial overrides
//! - **Trials**: start / extend / convert / expire state machine with an audit log
//! - **Air-gap mode**: offline license files and signed revocation lists, with no network client at all
//! - **Anti-rollback**: monotonic sequence numbers on license issues and revocation lists
//!
//! ## Quickstart
//!
//! ```no_run
//! use std::sync::Arc;
//! use tierwarden::catalog::Feature;
//! use tierwarden::policy::FeatureChecker;
//! use tierwarden::store::{FileStore, MemoryFeatureStore};
//! use tierwarden::{SystemClock, Validator, ValidatorConfig};
//!
//! # async fn run() -> Result<(), tierwarden::TierwardenError> {
//! let config = ValidatorConfig::new(
//!     "your-ed25519-public-key-hex",
//!     "https://license.example.com/api",
//!     "backup-manager",
//! );
//! let validator = Arc::new(Validator::online(config, Arc::new(FileStore::new("backup-manager")?))?);
//! validator.load_persisted().await?;
//!
//! let checker = FeatureChecker::new(Arc::new(MemoryFeatureStore::new()), Arc::new(SystemClock))
//!     .with_entitlements(validator.clone());
//!
//! let result = checker.check_feature("org-1", Feature::Oidc)?;
//! if !result.enabled {
//!     println!("{}", result.upgrade_message().unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Threat Model
//!
//! Tierwarden protects against:
//! - **Forged or edited licenses**: any change to the payload breaks the signature
//! - **Local tier bumps**: a persisted org tier above what the license confirms grants nothing
//! - **Rollback**: re-applying an older license or revocation list is rejected
//! - **Indefinite offline use**: online installs drop to Free once the grace period lapses
//!
//! Tierwarden does **not** prevent binary patching or code modification.
//! Client-side licensing can always be bypassed by a determined attacker
//! with access to the binary.

#![deny(missing_docs)]

// Core modules
pub mod catalog;
pub mod clock;
pub mod config;
pub mod errors;
pub mod license;
pub mod tier;

// Crypto layer
pub mod crypto;

// Protocol layer
pub mod protocol;

// Client layer
pub mod client;

// Persistence contracts
pub mod store;

// Policy layer
pub mod policy;

// Trials
pub mod trial;

// Online and offline license holders
pub mod airgap;
pub mod validator;

// Re-exports for public API
pub use airgap::{AirGapManager, AirGapStatus, RevocationApplied, RevocationList};
pub use catalog::Feature;
pub use clock::{Clock, SystemClock};
pub use config::{AirGapConfig, TrialConfig, ValidatorConfig};
pub use errors::TierwardenError;
pub use license::License;
pub use policy::{CheckDepth, FeatureCheckResult, FeatureChecker};
pub use tier::Tier;
pub use trial::{TrialInfo, TrialManager, TrialStatus};
pub use validator::{RevalidationOutcome, Validator, ValidatorStatus};

#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;
