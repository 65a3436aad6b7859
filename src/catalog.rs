//! Static feature catalog: feature → minimum tier, tier → feature set.

use crate::tier::Tier;
use crate::TierwardenError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A gated product feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Scheduled and on-demand backups.
    Backups,
    /// Restore from any snapshot.
    Restore,
    /// Local filesystem repositories.
    LocalRepositories,
    /// Backup schedules.
    Schedules,
    /// Email notifications.
    EmailNotifications,
    /// OpenID Connect login.
    Oidc,
    /// S3 and other cloud repositories.
    CloudRepositories,
    /// More than one agent per organization.
    MultipleAgents,
    /// Outgoing webhooks.
    Webhooks,
    /// Slack and Teams notifications.
    ChatNotifications,
    /// Custom retention policies.
    RetentionPolicies,
    /// Scheduled restore verification.
    BackupVerification,
    /// Pre/post backup script hooks.
    ScriptHooks,
    /// Public REST API keys.
    ApiAccess,
    /// Exportable compliance and usage reports.
    ReportExports,
    /// Immutable audit log.
    AuditLogs,
    /// SAML single sign-on.
    SamlSso,
    /// Custom RBAC roles.
    CustomRoles,
    /// Multiple organizations per deployment.
    MultiOrganization,
    /// Offline (air-gapped) licensing.
    AirGap,
    /// Immutable / WORM repositories.
    ImmutableBackups,
    /// Custom branding.
    WhiteLabel,
}

impl Feature {
    /// Every feature in the catalog.
    pub const ALL: [Feature; 22] = [
        Feature::Backups,
        Feature::Restore,
        Feature::LocalRepositories,
        Feature::Schedules,
        Feature::EmailNotifications,
        Feature::Oidc,
        Feature::CloudRepositories,
        Feature::MultipleAgents,
        Feature::Webhooks,
        Feature::ChatNotifications,
        Feature::RetentionPolicies,
        Feature::BackupVerification,
        Feature::ScriptHooks,
        Feature::ApiAccess,
        Feature::ReportExports,
        Feature::AuditLogs,
        Feature::SamlSso,
        Feature::CustomRoles,
        Feature::MultiOrganization,
        Feature::AirGap,
        Feature::ImmutableBackups,
        Feature::WhiteLabel,
    ];

    /// Wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Feature::Backups => "backups",
            Feature::Restore => "restore",
            Feature::LocalRepositories => "local_repositories",
            Feature::Schedules => "schedules",
            Feature::EmailNotifications => "email_notifications",
            Feature::Oidc => "oidc",
            Feature::CloudRepositories => "cloud_repositories",
            Feature::MultipleAgents => "multiple_agents",
            Feature::Webhooks => "webhooks",
            Feature::ChatNotifications => "chat_notifications",
            Feature::RetentionPolicies => "retention_policies",
            Feature::BackupVerification => "backup_verification",
            Feature::ScriptHooks => "script_hooks",
            Feature::ApiAccess => "api_access",
            Feature::ReportExports => "report_exports",
            Feature::AuditLogs => "audit_logs",
            Feature::SamlSso => "saml_sso",
            Feature::CustomRoles => "custom_roles",
            Feature::MultiOrganization => "multi_organization",
            Feature::AirGap => "air_gap",
            Feature::ImmutableBackups => "immutable_backups",
            Feature::WhiteLabel => "white_label",
        }
    }

    /// Minimum tier that unlocks this feature.
    pub const fn required_tier(self) -> Tier {
        match self {
            Feature::Backups
            | Feature::Restore
            | Feature::LocalRepositories
            | Feature::Schedules
            | Feature::EmailNotifications => Tier::Free,

            Feature::Oidc
            | Feature::CloudRepositories
            | Feature::MultipleAgents
            | Feature::Webhooks
            | Feature::ChatNotifications
            | Feature::RetentionPolicies
            | Feature::BackupVerification
            | Feature::ScriptHooks
            | Feature::ApiAccess
            | Feature::ReportExports => Tier::Pro,

            Feature::AuditLogs
            | Feature::SamlSso
            | Feature::CustomRoles
            | Feature::MultiOrganization
            | Feature::AirGap
            | Feature::ImmutableBackups
            | Feature::WhiteLabel => Tier::Enterprise,
        }
    }

    /// Whether `tier` unlocks this feature.
    pub fn enabled_for(self, tier: Tier) -> bool {
        tier.satisfies(self.required_tier())
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = TierwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Feature::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| TierwardenError::UnknownFeature(wanted.to_string()))
    }
}

/// Features unlocked by `tier`, in catalog order.
pub fn features_for_tier(tier: Tier) -> Vec<Feature> {
    Feature::ALL
        .into_iter()
        .filter(|f| f.enabled_for(tier))
        .collect()
}

/// Features that first become available at exactly `tier`.
///
/// Used to render upsell lists ("what Pro adds").
pub fn features_introduced_at(tier: Tier) -> Vec<Feature> {
    Feature::ALL
        .into_iter()
        .filter(|f| f.required_tier() == tier)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oidc_requires_pro() {
        assert_eq!(Feature::Oidc.required_tier(), Tier::Pro);
        assert!(!Feature::Oidc.enabled_for(Tier::Free));
        assert!(Feature::Oidc.enabled_for(Tier::Pro));
        assert!(Feature::Oidc.enabled_for(Tier::Enterprise));
    }

    #[test]
    fn higher_tiers_are_supersets() {
        let free = features_for_tier(Tier::Free);
        let pro = features_for_tier(Tier::Pro);
        let enterprise = features_for_tier(Tier::Enterprise);

        assert!(free.iter().all(|f| pro.contains(f)));
        assert!(pro.iter().all(|f| enterprise.contains(f)));
        assert_eq!(enterprise.len(), Feature::ALL.len());
    }

    #[test]
    fn introduced_sets_partition_catalog() {
        let total: usize = Tier::ALL
            .into_iter()
            .map(|t| features_introduced_at(t).len())
            .sum();
        assert_eq!(total, Feature::ALL.len());
        assert!(features_introduced_at(Tier::Enterprise).contains(&Feature::AuditLogs));
    }

    #[test]
    fn parse_by_wire_name() {
        assert_eq!("oidc".parse::<Feature>().unwrap(), Feature::Oidc);
        assert_eq!("SAML_SSO".parse::<Feature>().unwrap(), Feature::SamlSso);
        assert!(matches!(
            "teleport".parse::<Feature>(),
            Err(TierwardenError::UnknownFeature(name)) if name == "teleport"
        ));
    }

    #[test]
    fn wire_names_are_unique_and_match_serde() {
        for feature in Feature::ALL {
            let json = serde_json::to_string(&feature).unwrap();
            assert_eq!(json, format!("\"{}\"", feature.as_str()));
        }
        let mut names: Vec<_> = Feature::ALL.iter().map(|f| f.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Feature::ALL.len());
    }
}
