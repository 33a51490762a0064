//! Read-only tenant projection used to drive iteration.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::id::{LocationId, OrgId, TenantId};

/// Subscription plan of the owning organization.
///
/// Ordered so eligibility checks can use `>=` (Growth-or-above).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    Starter,
    Growth,
    Pro,
    Enterprise,
}

impl PlanTier {
    pub const ALL: [PlanTier; 5] = [
        PlanTier::Free,
        PlanTier::Starter,
        PlanTier::Growth,
        PlanTier::Pro,
        PlanTier::Enterprise,
    ];

    /// Tiers at or above `self`.
    pub fn and_above(self) -> impl Iterator<Item = PlanTier> {
        Self::ALL.into_iter().filter(move |t| *t >= self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Starter => "starter",
            PlanTier::Growth => "growth",
            PlanTier::Pro => "pro",
            PlanTier::Enterprise => "enterprise",
        }
    }
}

impl FromStr for PlanTier {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "starter" => Ok(PlanTier::Starter),
            "growth" => Ok(PlanTier::Growth),
            "pro" => Ok(PlanTier::Pro),
            "enterprise" => Ok(PlanTier::Enterprise),
            _ => Err(ParseError::UnknownPlanTier(s.to_string())),
        }
    }
}

/// Integrations/features a location has configured.
///
/// Jobs declare the capabilities they need; a location without them is skipped
/// rather than attempted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    GoogleProfile,
    Website,
    Citations,
    VoiceSearch,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::GoogleProfile => "google_profile",
            Capability::Website => "website",
            Capability::Citations => "citations",
            Capability::VoiceSearch => "voice_search",
        }
    }
}

impl FromStr for Capability {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google_profile" => Ok(Capability::GoogleProfile),
            "website" => Ok(Capability::Website),
            "citations" => Ok(Capability::Citations),
            "voice_search" => Ok(Capability::VoiceSearch),
            _ => Err(ParseError::UnknownCapability(s.to_string())),
        }
    }
}

/// Projection of one tenant, as yielded by a tenant enumerator.
///
/// Never mutated by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantHandle {
    pub tenant_id: TenantId,
    pub org_id: OrgId,
    pub location_id: LocationId,
    pub plan_tier: PlanTier,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
}

impl TenantHandle {
    pub fn new(
        tenant_id: TenantId,
        org_id: OrgId,
        location_id: LocationId,
        plan_tier: PlanTier,
    ) -> Self {
        Self {
            tenant_id,
            org_id,
            location_id,
            plan_tier,
            archived: false,
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    pub fn archived(mut self) -> Self {
        self.archived = true;
        self
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_tiers_are_ordered() {
        assert!(PlanTier::Growth >= PlanTier::Growth);
        assert!(PlanTier::Enterprise > PlanTier::Growth);
        assert_eq!(
            PlanTier::Growth.and_above().collect::<Vec<_>>(),
            vec![PlanTier::Growth, PlanTier::Pro, PlanTier::Enterprise]
        );
        assert!(PlanTier::Starter < PlanTier::Growth);
    }

    #[test]
    fn plan_tier_parse_is_case_insensitive() {
        assert_eq!("GROWTH".parse::<PlanTier>().unwrap(), PlanTier::Growth);
        assert!("platinum".parse::<PlanTier>().is_err());
    }

    #[test]
    fn capability_names_roundtrip() {
        for c in [
            Capability::GoogleProfile,
            Capability::Website,
            Capability::Citations,
            Capability::VoiceSearch,
        ] {
            assert_eq!(c.as_str().parse::<Capability>().unwrap(), c);
        }
    }
}
