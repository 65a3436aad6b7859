//! Tierwarden configuration.

use crate::tier::Tier;
use crate::TierwardenError;
use std::time::Duration;

const DAY: u64 = 24 * 60 * 60;

fn check_public_key(public_key_hex: &str) -> Result<(), TierwardenError> {
    if public_key_hex.len() != 64 {
        return Err(TierwardenError::ConfigError(format!(
            "public_key_hex must be 64 hex characters, got {}",
            public_key_hex.len()
        )));
    }
    Ok(())
}

/// Configuration for online license validation.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// License signing Ed25519 public key (hex-encoded, 64 characters).
    /// SECURITY: This should be hard-coded in your application, not from environment.
    pub public_key_hex: &'static str,

    /// License server base URL (e.g. `https://license.example.com/api/v1`).
    pub server_url: String,

    /// Product identifier sent on activation and used for pricing lookups.
    pub product: &'static str,

    /// User-Agent product identifier.
    pub user_agent_product: &'static str,

    /// How often the background task revalidates against the server.
    pub revalidation_interval: Duration,

    /// How long a previously validated license survives failed revalidation
    /// before downgrading to Free.
    pub grace_period: Duration,

    /// How long an entitlement confirmation is trusted by feature checks.
    pub confirmation_freshness: Duration,

    /// HTTP request timeout for license-server calls.
    pub request_timeout: Duration,
}

impl ValidatorConfig {
    /// Default revalidation interval (daily).
    pub const DEFAULT_REVALIDATION_INTERVAL: Duration = Duration::from_secs(DAY);

    /// Default grace period (7 days).
    pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(7 * DAY);

    /// Default confirmation freshness (grace period plus one interval).
    pub const DEFAULT_CONFIRMATION_FRESHNESS: Duration = Duration::from_secs(8 * DAY);

    /// Config with default policy durations.
    pub fn new(
        public_key_hex: &'static str,
        server_url: impl Into<String>,
        product: &'static str,
    ) -> Self {
        Self {
            public_key_hex,
            server_url: server_url.into(),
            product,
            user_agent_product: product,
            revalidation_interval: Self::DEFAULT_REVALIDATION_INTERVAL,
            grace_period: Self::DEFAULT_GRACE_PERIOD,
            confirmation_freshness: Self::DEFAULT_CONFIRMATION_FRESHNESS,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), TierwardenError> {
        check_public_key(self.public_key_hex)?;
        if self.server_url.trim().is_empty() {
            return Err(TierwardenError::ConfigError(
                "server_url cannot be empty".to_string(),
            ));
        }
        if !(self.server_url.starts_with("https://") || self.server_url.starts_with("http://")) {
            return Err(TierwardenError::ConfigError(format!(
                "server_url must be an http(s) URL, got {}",
                self.server_url
            )));
        }
        if self.product.is_empty() {
            return Err(TierwardenError::ConfigError(
                "product cannot be empty".to_string(),
            ));
        }
        if self.revalidation_interval.is_zero() {
            return Err(TierwardenError::ConfigError(
                "revalidation_interval must be positive".to_string(),
            ));
        }
        if self.confirmation_freshness < self.revalidation_interval {
            return Err(TierwardenError::ConfigError(
                "confirmation_freshness must cover at least one revalidation interval".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trial policy.
#[derive(Debug, Clone)]
pub struct TrialConfig {
    /// Length of a freshly started trial.
    pub default_duration: Duration,

    /// Maximum cumulative extension, in days, over the trial's lifetime.
    pub max_extension_days: u32,

    /// Tier granted while the trial is active.
    pub trial_tier: Tier,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            default_duration: Duration::from_secs(14 * DAY),
            max_extension_days: 30,
            trial_tier: Tier::Pro,
        }
    }
}

impl TrialConfig {
    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), TierwardenError> {
        if self.default_duration.is_zero() {
            return Err(TierwardenError::ConfigError(
                "default_duration must be positive".to_string(),
            ));
        }
        if chrono::Duration::from_std(self.default_duration).is_err() {
            return Err(TierwardenError::ConfigError(
                "default_duration is out of range".to_string(),
            ));
        }
        if !self.trial_tier.is_paid() {
            return Err(TierwardenError::ConfigError(
                "trial_tier must be a paid tier".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for air-gapped (offline) licensing.
#[derive(Debug, Clone)]
pub struct AirGapConfig {
    /// Embedded Ed25519 public key for license files and revocation lists.
    /// SECURITY: This should be hard-coded in your application, not from environment.
    pub public_key_hex: &'static str,
}

impl AirGapConfig {
    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), TierwardenError> {
        check_public_key(self.public_key_hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a";

    #[test]
    fn validator_defaults_are_valid() {
        let config = ValidatorConfig::new(KEY, "https://license.example.com", "backup");
        assert!(config.validate().is_ok());
        assert_eq!(config.grace_period, Duration::from_secs(7 * DAY));
        assert_eq!(config.revalidation_interval, Duration::from_secs(DAY));
    }

    #[test]
    fn validator_rejects_short_key() {
        let config = ValidatorConfig::new("abcd", "https://license.example.com", "backup");
        assert!(matches!(config.validate(), Err(TierwardenError::ConfigError(_))));
    }

    #[test]
    fn validator_rejects_bad_url() {
        let config = ValidatorConfig::new(KEY, "license.example.com", "backup");
        assert!(matches!(config.validate(), Err(TierwardenError::ConfigError(_))));
    }

    #[test]
    fn validator_rejects_freshness_below_interval() {
        let mut config = ValidatorConfig::new(KEY, "https://license.example.com", "backup");
        config.confirmation_freshness = Duration::from_secs(60);
        assert!(matches!(config.validate(), Err(TierwardenError::ConfigError(_))));
    }

    #[test]
    fn trial_defaults() {
        let config = TrialConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.trial_tier, Tier::Pro);
        assert_eq!(config.max_extension_days, 30);
    }

    #[test]
    fn trial_rejects_free_tier() {
        let config = TrialConfig {
            trial_tier: Tier::Free,
            ..TrialConfig::default()
        };
        assert!(matches!(config.validate(), Err(TierwardenError::ConfigError(_))));
    }

    #[test]
    fn trial_rejects_unrepresentable_duration() {
        let config = TrialConfig {
            default_duration: Duration::from_secs(u64::MAX),
            ..TrialConfig::default()
        };
        assert!(matches!(config.validate(), Err(TierwardenError::ConfigError(_))));
    }

    #[test]
    fn air_gap_key_length() {
        assert!(AirGapConfig { public_key_hex: KEY }.validate().is_ok());
        assert!(AirGapConfig { public_key_hex: "" }.validate().is_err());
    }
}
