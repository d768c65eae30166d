//! Newtype identifiers shared across every akashi crate.
//!
//! Each id wraps a `Uuid` (agent ids use a short opaque string per the data
//! model) the way the teacher's `BranchId` wraps one — `Copy`, serde-derived,
//! hashable, with a `new()`/`from_uuid()` pair.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// View the raw UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(OrgId, "Identifies the tenant boundary. No entity crosses this.");
uuid_id!(RunId, "Identifies an `AgentRun`.");
uuid_id!(EventId, "Identifies an `AgentEvent`.");
uuid_id!(DecisionId, "Identifies a `Decision` (stable across bi-temporal revisions).");
uuid_id!(AlternativeId, "Identifies an `Alternative`.");
uuid_id!(EvidenceId, "Identifies an `Evidence` row.");
uuid_id!(ConflictId, "Identifies a `DecisionConflict`.");

/// An agent identity: a short opaque string, unique within an org.
///
/// Unlike the other ids, agents are not UUIDs — the spec calls them "short
/// opaque strings" (e.g. assigned by the agent fleet operator), so this is a
/// thin newtype over `String` rather than a UUID wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(String);

impl AgentId {
    /// Wrap a raw agent-id string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_uuid() {
        let id = OrgId::new();
        let round_tripped = OrgId::from_uuid(id.as_uuid());
        assert_eq!(id, round_tripped);
    }

    #[test]
    fn agent_id_preserves_raw_string() {
        let a = AgentId::from("agent-7");
        assert_eq!(a.as_str(), "agent-7");
        assert_eq!(a.to_string(), "agent-7");
    }

    #[test]
    fn ids_are_distinct_types() {
        // Compile-time guarantee mostly, but exercise Display/Eq here.
        let a = DecisionId::new();
        let b = DecisionId::new();
        assert_ne!(a, b);
    }
}
