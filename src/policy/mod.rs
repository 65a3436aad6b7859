//! Feature gating policy.

pub mod access;

pub use access::{
    CheckDepth, EntitlementConfirmation, EntitlementSource, FeatureCheckResult, FeatureChecker,
    TierOverride,
};
