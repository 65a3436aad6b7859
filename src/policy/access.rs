//! Layered feature gating.
//!
//! A check resolves an organization's tier in layers:
//! - Layer 1: the persisted org tier from the [`FeatureStore`]
//! - Layer 2: the persisted tier is capped at the tier the license source
//!   last confirmed, so a local tier bump nobody confirmed grants nothing
//! - Layer 3: a confirmation older than the freshness window (or dated in
//!   the future) is ignored and Layer 1 governs alone
//!
//! An active trial override is applied on top of the result. Onboarding uses
//! [`CheckDepth::OrgTierOnly`], which skips Layers 2 and 3.

use crate::catalog::{self, Feature};
use crate::clock::Clock;
use crate::config::ValidatorConfig;
use crate::crypto::digest::entitlement_nonce;
use crate::crypto::freshness::{check_freshness, Staleness};
use crate::store::FeatureStore;
use crate::tier::Tier;
use crate::TierwardenError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Last server-side confirmation of the licensed tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementConfirmation {
    /// Tier the license source vouches for.
    pub tier: Tier,

    /// Nonce binding the confirmation to a specific check. Empty means
    /// unconfirmed.
    pub nonce: String,

    /// When the confirmation was made.
    pub confirmed_at: DateTime<Utc>,
}

impl EntitlementConfirmation {
    /// Confirmation for a source holding no license: Free, dated `now`.
    pub fn unlicensed(now: DateTime<Utc>) -> Self {
        Self {
            tier: Tier::Free,
            nonce: entitlement_nonce("unlicensed", Tier::Free.as_str(), now),
            confirmed_at: now,
        }
    }
}

/// Something that can vouch for the licensed tier (online validator or
/// air-gap manager).
pub trait EntitlementSource: Send + Sync {
    /// Latest confirmation, `None` when the source cannot vouch for any tier.
    ///
    /// A source holding no license should vouch for Free
    /// ([`EntitlementConfirmation::unlicensed`]) rather than return `None`,
    /// so a missing license never lets the persisted tier through uncapped.
    fn confirmation(&self) -> Option<EntitlementConfirmation>;
}

/// Per-organization tier override (active trials).
pub trait TierOverride: Send + Sync {
    /// Tier to grant on top of the resolved tier, if any.
    fn tier_override(&self, org_id: &str) -> Result<Option<Tier>, TierwardenError>;
}

/// How many layers a check evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckDepth {
    /// Layer 1 only. Used right after activation, before any confirmation
    /// can exist.
    OrgTierOnly,
    /// All three layers.
    #[default]
    Full,
}

/// Outcome of a feature check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureCheckResult {
    /// Feature that was checked.
    pub feature: Feature,

    /// Whether the organization may use it.
    pub enabled: bool,

    /// Tier the check resolved for the organization.
    pub current_tier: Tier,

    /// Minimum tier the feature needs.
    pub required_tier: Tier,

    /// Whether a fresh confirmation took part in the resolution.
    pub confirmed: bool,
}

impl FeatureCheckResult {
    /// Upsell text for a denied check, `None` when enabled.
    pub fn upgrade_message(&self) -> Option<String> {
        if self.enabled {
            return None;
        }
        Some(format!(
            "{} requires the {} tier (current tier: {})",
            self.feature, self.required_tier, self.current_tier
        ))
    }
}

/// Answers "is feature X enabled for org O".
pub struct FeatureChecker {
    store: Arc<dyn FeatureStore>,
    clock: Arc<dyn Clock>,
    overrides: Option<Arc<dyn TierOverride>>,
    entitlements: Option<Arc<dyn EntitlementSource>>,
    freshness: Duration,
}

impl FeatureChecker {
    /// Checker over the persisted org tiers only.
    pub fn new(store: Arc<dyn FeatureStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            overrides: None,
            entitlements: None,
            freshness: ValidatorConfig::DEFAULT_CONFIRMATION_FRESHNESS,
        }
    }

    /// Apply tier overrides (active trials).
    pub fn with_overrides(mut self, overrides: Arc<dyn TierOverride>) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Cap resolution at what the license source confirmed.
    pub fn with_entitlements(mut self, entitlements: Arc<dyn EntitlementSource>) -> Self {
        self.entitlements = Some(entitlements);
        self
    }

    /// Set how long a confirmation stays trusted.
    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    /// Full three-layer check.
    pub fn check_feature(
        &self,
        org_id: &str,
        feature: Feature,
    ) -> Result<FeatureCheckResult, TierwardenError> {
        self.check_feature_with_depth(org_id, feature, CheckDepth::Full)
    }

    /// Layer 1 check used during onboarding.
    pub fn check_onboarding_feature(
        &self,
        org_id: &str,
        feature: Feature,
    ) -> Result<FeatureCheckResult, TierwardenError> {
        self.check_feature_with_depth(org_id, feature, CheckDepth::OrgTierOnly)
    }

    /// Check a feature at an explicit depth.
    pub fn check_feature_with_depth(
        &self,
        org_id: &str,
        feature: Feature,
        depth: CheckDepth,
    ) -> Result<FeatureCheckResult, TierwardenError> {
        let (current_tier, confirmed) = self.resolve_tier(org_id, depth)?;
        let required_tier = feature.required_tier();
        let enabled = required_tier <= current_tier;

        debug!(
            org_id,
            feature = feature.as_str(),
            current = current_tier.as_str(),
            required = required_tier.as_str(),
            enabled,
            "Feature check"
        );

        Ok(FeatureCheckResult {
            feature,
            enabled,
            current_tier,
            required_tier,
            confirmed,
        })
    }

    /// Full check of a feature given by name.
    pub fn check_feature_named(
        &self,
        org_id: &str,
        feature: &str,
    ) -> Result<FeatureCheckResult, TierwardenError> {
        self.check_feature(org_id, feature.parse()?)
    }

    /// Full check that fails with `FeatureNotAvailable` on denial.
    pub fn require_feature(&self, org_id: &str, feature: Feature) -> Result<(), TierwardenError> {
        let result = self.check_feature(org_id, feature)?;
        if result.enabled {
            return Ok(());
        }
        Err(TierwardenError::FeatureNotAvailable {
            feature: feature.as_str().to_string(),
            current: result.current_tier,
            required: result.required_tier,
        })
    }

    /// Every catalog feature the organization can use right now.
    pub fn enabled_features(&self, org_id: &str) -> Result<Vec<Feature>, TierwardenError> {
        let (tier, _) = self.resolve_tier(org_id, CheckDepth::Full)?;
        Ok(catalog::features_for_tier(tier))
    }

    /// Fully resolved tier for an organization.
    pub fn org_tier(&self, org_id: &str) -> Result<Tier, TierwardenError> {
        self.resolve_tier(org_id, CheckDepth::Full).map(|(tier, _)| tier)
    }

    fn resolve_tier(
        &self,
        org_id: &str,
        depth: CheckDepth,
    ) -> Result<(Tier, bool), TierwardenError> {
        let persisted = self.store.get_org_tier(org_id)?;

        let (mut tier, confirmed) = match depth {
            CheckDepth::OrgTierOnly => (persisted, false),
            CheckDepth::Full => match self.fresh_confirmation() {
                Some(confirmation) => (persisted.min(confirmation.tier), true),
                None => (persisted, false),
            },
        };

        if let Some(overrides) = &self.overrides {
            if let Some(trial_tier) = overrides.tier_override(org_id)? {
                tier = tier.max(trial_tier);
            }
        }

        Ok((tier, confirmed))
    }

    /// Layers 2 and 3: a confirmation only counts if it carries a nonce and
    /// is inside the freshness window.
    fn fresh_confirmation(&self) -> Option<EntitlementConfirmation> {
        let confirmation = self.entitlements.as_ref()?.confirmation()?;
        if confirmation.nonce.is_empty() {
            return None;
        }

        match check_freshness(confirmation.confirmed_at, self.freshness, self.clock.as_ref()) {
            Ok(()) => Some(confirmation),
            Err(Staleness::TooOld { age_seconds }) => {
                debug!(age_seconds, "Ignoring stale entitlement confirmation");
                None
            }
            Err(Staleness::FromFuture) => {
                debug!("Ignoring future-dated entitlement confirmation");
                None
            }
        }
    }
}
