//! License tiers.

use crate::TierwardenError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered license level: `Free < Pro < Enterprise`.
///
/// Feature gating always compares tiers with this order, never by set
/// membership alone.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// No paid license.
    #[default]
    Free = 0,
    /// Paid tier for teams.
    Pro = 1,
    /// Everything, including compliance and multi-organization features.
    Enterprise = 2,
}

impl Tier {
    /// All tiers, lowest first.
    pub const ALL: [Tier; 3] = [Tier::Free, Tier::Pro, Tier::Enterprise];

    /// Lowercase wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }

    /// Whether this tier satisfies a feature requiring `required`.
    pub fn satisfies(self, required: Tier) -> bool {
        self >= required
    }

    /// Whether this is a paid tier.
    pub fn is_paid(self) -> bool {
        self > Tier::Free
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = TierwardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "enterprise" => Ok(Tier::Enterprise),
            other => Err(TierwardenError::InvalidInput(format!(
                "unknown tier: {other}"
            ))),
        }
    }
}
