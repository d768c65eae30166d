//! Request-scoped authentication claims.
//!
//! Per the "context-carried claims" design note (specification §9):
//! credentials are never encoded into domain types. Both signed tokens and
//! API keys (specification §4.10) resolve to this common shape, which
//! transport layers inject into the request context and authorization
//! boundaries read back out.

use crate::ids::{AgentId, OrgId};
use crate::role::Role;
use serde::{Deserialize, Serialize};

/// Claims carried by an authenticated request, regardless of which
/// credential type produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Stable subject identifier (a UUID for signed tokens).
    pub subject: String,
    pub agent_id: AgentId,
    pub org_id: OrgId,
    pub role: Role,
    /// JWT-style unique token id, present only for signed tokens.
    pub jti: Option<String>,
    /// Present for scoped tokens: the subject that issued a narrower-scope
    /// token on its own behalf.
    pub scoped_by: Option<String>,
}

impl Claims {
    /// Convenience check used at every authorization boundary.
    pub fn has_role_at_least(&self, min: Role) -> bool {
        self.role.at_least(min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_check_delegates_to_rank() {
        let claims = Claims {
            subject: "11111111-1111-1111-1111-111111111111".into(),
            agent_id: AgentId::from("agent-1"),
            org_id: OrgId::new(),
            role: Role::Agent,
            jti: None,
            scoped_by: None,
        };
        assert!(claims.has_role_at_least(Role::Reader));
        assert!(!claims.has_role_at_least(Role::Admin));
    }
}
