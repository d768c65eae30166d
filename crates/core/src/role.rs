//! Agent roles and rank comparisons.
//!
//! Roles are ordered 1..5; authorization checks compare ranks
//! (`rank(r) >= rank(min)`) rather than matching exact roles, per the data
//! model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An agent's role within its organization.
///
/// Ordered by increasing privilege: `Reader < Agent < Admin < OrgOwner <
/// PlatformAdmin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Read-only access.
    Reader,
    /// Standard agent identity recording decisions.
    Agent,
    /// Administrative access within an org.
    Admin,
    /// Owns the organization.
    OrgOwner,
    /// Cross-org platform operator.
    PlatformAdmin,
}

impl Role {
    /// Numeric rank, 1..5, matching the data model's ordering.
    pub fn rank(self) -> u8 {
        match self {
            Role::Reader => 1,
            Role::Agent => 2,
            Role::Admin => 3,
            Role::OrgOwner => 4,
            Role::PlatformAdmin => 5,
        }
    }

    /// Whether this role's rank is at least `min`'s rank.
    pub fn at_least(self, min: Role) -> bool {
        self.rank() >= min.rank()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Reader => "reader",
            Role::Agent => "agent",
            Role::Admin => "admin",
            Role::OrgOwner => "org_owner",
            Role::PlatformAdmin => "platform_admin",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_are_strictly_increasing() {
        let ordered = [
            Role::Reader,
            Role::Agent,
            Role::Admin,
            Role::OrgOwner,
            Role::PlatformAdmin,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
    }

    #[test]
    fn at_least_is_reflexive_and_monotonic() {
        assert!(Role::Admin.at_least(Role::Admin));
        assert!(Role::OrgOwner.at_least(Role::Admin));
        assert!(!Role::Agent.at_least(Role::Admin));
    }
}
