//! Trial lifecycle: start, extend, convert, expire.
//!
//! One trial per organization, for its lifetime. Status only moves forward:
//!
//! ```text
//! NotStarted → Active → Expired
//!                     ↘ Converted
//! ```
//!
//! While a trial is active the organization resolves to the trial tier
//! through [`TierOverride`]; once it ends the persisted tier governs again.

use crate::clock::Clock;
use crate::config::TrialConfig;
use crate::policy::access::TierOverride;
use crate::store::TrialStore;
use crate::tier::Tier;
use crate::TierwardenError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Lifecycle state of an organization's trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    /// The organization never started a trial.
    NotStarted,
    /// Trial running.
    Active,
    /// Trial ran out without conversion.
    Expired,
    /// Trial converted to a paid tier.
    Converted,
}

impl TrialStatus {
    /// Wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            TrialStatus::NotStarted => "not_started",
            TrialStatus::Active => "active",
            TrialStatus::Expired => "expired",
            TrialStatus::Converted => "converted",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, TrialStatus::Expired | TrialStatus::Converted)
    }
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extension of a trial. Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialExtension {
    /// Days added.
    pub days: u32,
    /// Why the trial was extended.
    pub reason: String,
    /// User who granted the extension.
    pub extended_by: String,
    /// When it was granted.
    pub at: DateTime<Utc>,
}

/// Trial record of one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialInfo {
    /// Organization ID.
    pub org_id: String,
    /// Contact email given when the trial started.
    pub email: String,
    /// Stored lifecycle status.
    pub status: TrialStatus,
    /// When the trial started.
    pub started_at: DateTime<Utc>,
    /// When the trial ends (moves forward with extensions).
    pub expires_at: DateTime<Utc>,
    /// Extensions, oldest first.
    #[serde(default)]
    pub extensions: Vec<TrialExtension>,
    /// Tier the trial converted to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converted_tier: Option<Tier>,
    /// When the trial was converted or expired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl TrialInfo {
    /// Sum of all extension days granted so far.
    pub fn total_extension_days(&self) -> u32 {
        self.extensions.iter().map(|e| e.days).sum()
    }

    /// Status as of `now`: an active trial past its expiry counts as expired
    /// even before the sweep has recorded it.
    pub fn status_at(&self, now: DateTime<Utc>) -> TrialStatus {
        match self.status {
            TrialStatus::Active if self.expires_at <= now => TrialStatus::Expired,
            status => status,
        }
    }

    /// Whether the trial grants its tier at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == TrialStatus::Active
    }

    /// Whole days left at `now` (0 once ended).
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        if self.is_active_at(now) {
            (self.expires_at - now).num_days()
        } else {
            0
        }
    }
}

/// Kind of trial activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialAction {
    /// Trial started.
    Started,
    /// Trial extended.
    Extended,
    /// Trial converted to a paid tier.
    Converted,
    /// Trial expired by the sweep.
    Expired,
}

/// Trial activity log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialActivity {
    /// Organization ID.
    pub org_id: String,
    /// What happened.
    pub action: TrialAction,
    /// Who did it (`None` for system jobs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Free-form detail.
    pub detail: String,
    /// When it happened.
    pub at: DateTime<Utc>,
}

/// Trial state machine backed by a [`TrialStore`].
pub struct TrialManager {
    config: TrialConfig,
    store: Arc<dyn TrialStore>,
    clock: Arc<dyn Clock>,
}

impl TrialManager {
    /// Create a trial manager.
    ///
    /// # Errors
    /// Returns `ConfigError` if the trial policy is invalid.
    pub fn new(
        config: TrialConfig,
        store: Arc<dyn TrialStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TierwardenError> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            clock,
        })
    }

    /// Start the organization's one and only trial.
    ///
    /// # Errors
    /// * `InvalidInput` - empty org ID or implausible email
    /// * `TrialAlreadyStarted` - the organization already had a trial
    pub fn start_trial(&self, org_id: &str, email: &str) -> Result<TrialInfo, TierwardenError> {
        let org_id = non_empty(org_id, "org_id")?;
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(TierwardenError::InvalidInput(format!(
                "invalid email: {:?}",
                email
            )));
        }

        if self.store.get_trial(org_id)?.is_some() {
            return Err(TierwardenError::TrialAlreadyStarted {
                org_id: org_id.to_string(),
            });
        }

        let now = self.clock.now_utc();
        let duration = Duration::from_std(self.config.default_duration)
            .map_err(|e| TierwardenError::ConfigError(format!("trial duration: {}", e)))?;

        let trial = TrialInfo {
            org_id: org_id.to_string(),
            email: email.to_string(),
            status: TrialStatus::Active,
            started_at: now,
            expires_at: offset(now, duration, "trial expiry")?,
            extensions: Vec::new(),
            converted_tier: None,
            ended_at: None,
        };

        self.store.create_trial(&trial)?;
        self.log(
            org_id,
            TrialAction::Started,
            Some(email),
            format!(
                "{} trial until {}",
                self.config.trial_tier,
                trial.expires_at.to_rfc3339()
            ),
        )?;

        info!(org_id, expires_at = %trial.expires_at, "trial started");
        Ok(trial)
    }

    /// Add `days` to an active trial.
    ///
    /// # Errors
    /// * `InvalidInput` - zero days or empty reason / user
    /// * `TrialNotFound` - no trial was ever started
    /// * `TrialNotActive` - trial expired or converted
    /// * `ExtensionLimitExceeded` - cumulative extensions would exceed the maximum
    pub fn extend_trial(
        &self,
        org_id: &str,
        extended_by: &str,
        days: u32,
        reason: &str,
    ) -> Result<TrialExtension, TierwardenError> {
        if days == 0 {
            return Err(TierwardenError::InvalidInput(
                "extension must be at least one day".to_string(),
            ));
        }
        let extended_by = non_empty(extended_by, "extended_by")?;
        let reason = non_empty(reason, "reason")?;

        let now = self.clock.now_utc();
        let mut trial = self.active_trial(org_id, now)?;

        let remaining = self
            .config
            .max_extension_days
            .saturating_sub(trial.total_extension_days());
        if days > remaining {
            return Err(TierwardenError::ExtensionLimitExceeded {
                requested: days,
                remaining,
            });
        }

        let extension = TrialExtension {
            days,
            reason: reason.to_string(),
            extended_by: extended_by.to_string(),
            at: now,
        };
        trial.expires_at = offset(trial.expires_at, days_span(days)?, "extended expiry")?;
        trial.extensions.push(extension.clone());

        self.store.update_trial(&trial)?;
        self.log(
            &trial.org_id,
            TrialAction::Extended,
            Some(extended_by),
            format!("+{} days: {}", days, reason),
        )?;

        info!(org_id, days, expires_at = %trial.expires_at, "trial extended");
        Ok(extension)
    }

    /// Convert an active trial into a paid tier.
    ///
    /// From here on the organization's tier comes from normal licensing.
    ///
    /// # Errors
    /// * `InvalidInput` - `tier` is Free
    /// * `TrialNotFound` / `TrialNotActive`
    pub fn convert_trial(&self, org_id: &str, tier: Tier) -> Result<TrialInfo, TierwardenError> {
        if !tier.is_paid() {
            return Err(TierwardenError::InvalidInput(
                "a trial can only convert to a paid tier".to_string(),
            ));
        }

        let now = self.clock.now_utc();
        let mut trial = self.active_trial(org_id, now)?;

        trial.status = TrialStatus::Converted;
        trial.converted_tier = Some(tier);
        trial.ended_at = Some(now);

        self.store.update_trial(&trial)?;
        self.log(
            &trial.org_id,
            TrialAction::Converted,
            None,
            format!("converted to {}", tier),
        )?;

        info!(org_id, %tier, "trial converted");
        Ok(trial)
    }

    /// Sweep: mark every active trial past its expiry as expired.
    ///
    /// Idempotent. Returns the number of trials newly expired by this call.
    pub fn expire_trials(&self) -> Result<usize, TierwardenError> {
        let now = self.clock.now_utc();
        let mut expired = 0;

        for mut trial in self.store.list_trials(TrialStatus::Active)? {
            if trial.expires_at > now {
                continue;
            }
            trial.status = TrialStatus::Expired;
            trial.ended_at = Some(now);
            self.store.update_trial(&trial)?;
            self.log(
                &trial.org_id,
                TrialAction::Expired,
                None,
                format!("expired at {}", trial.expires_at.to_rfc3339()),
            )?;
            expired += 1;
        }

        if expired > 0 {
            info!(count = expired, "expired trials");
        } else {
            debug!("trial sweep found nothing to expire");
        }
        Ok(expired)
    }

    /// Active trials ending within the next `within_days` days.
    ///
    /// # Errors
    /// * `InvalidInput` - the window reaches past the representable date range
    pub fn get_expiring_trials(&self, within_days: u32) -> Result<Vec<TrialInfo>, TierwardenError> {
        let now = self.clock.now_utc();
        let until = offset(now, days_span(within_days)?, "expiry window")?;
        self.store.get_expiring_trials(now, until)
    }

    /// Trial record of an organization.
    pub fn get_trial(&self, org_id: &str) -> Result<Option<TrialInfo>, TierwardenError> {
        self.store.get_trial(org_id)
    }

    /// Effective trial status (NotStarted when no record exists).
    pub fn trial_status(&self, org_id: &str) -> Result<TrialStatus, TierwardenError> {
        let now = self.clock.now_utc();
        Ok(self
            .store
            .get_trial(org_id)?
            .map_or(TrialStatus::NotStarted, |t| t.status_at(now)))
    }

    /// Activity log of an organization.
    pub fn activity(&self, org_id: &str) -> Result<Vec<TrialActivity>, TierwardenError> {
        self.store.list_activity(org_id)
    }

    /// Trial policy in use.
    pub fn config(&self) -> &TrialConfig {
        &self.config
    }

    fn active_trial(&self, org_id: &str, now: DateTime<Utc>) -> Result<TrialInfo, TierwardenError> {
        let trial = self
            .store
            .get_trial(org_id)?
            .ok_or_else(|| TierwardenError::TrialNotFound {
                org_id: org_id.to_string(),
            })?;

        match trial.status_at(now) {
            TrialStatus::Active => Ok(trial),
            status => Err(TierwardenError::TrialNotActive {
                org_id: org_id.to_string(),
                status,
            }),
        }
    }

    fn log(
        &self,
        org_id: &str,
        action: TrialAction,
        actor: Option<&str>,
        detail: String,
    ) -> Result<(), TierwardenError> {
        self.store.log_activity(&TrialActivity {
            org_id: org_id.to_string(),
            action,
            actor: actor.map(str::to_string),
            detail,
            at: self.clock.now_utc(),
        })
    }
}

impl TierOverride for TrialManager {
    fn tier_override(&self, org_id: &str) -> Result<Option<Tier>, TierwardenError> {
        let now = self.clock.now_utc();
        Ok(self
            .store
            .get_trial(org_id)?
            .filter(|t| t.is_active_at(now))
            .map(|_| self.config.trial_tier))
    }
}

fn days_span(days: u32) -> Result<Duration, TierwardenError> {
    Duration::try_days(i64::from(days))
        .ok_or_else(|| TierwardenError::InvalidInput(format!("{} days is out of range", days)))
}

fn offset(
    at: DateTime<Utc>,
    by: Duration,
    what: &str,
) -> Result<DateTime<Utc>, TierwardenError> {
    at.checked_add_signed(by)
        .ok_or_else(|| TierwardenError::InvalidInput(format!("{} is out of range", what)))
}

fn non_empty<'a>(value: &'a str, field: &str) -> Result<&'a str, TierwardenError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(TierwardenError::InvalidInput(format!(
            "{} cannot be empty",
            field
        )));
    }
    Ok(value)
}
