//! Credential resolution into request [`Claims`] (component C10).
//!
//! Two credential types, both named in specification §4.10, both resolving
//! to the same `Claims` shape transport layers inject into request
//! context: signed tokens ([`tokens`]) and API keys ([`api_key`]), backed
//! by [`keys`] for the token keypair. `akashi-auth` has no dependency on
//! `akashi-storage` — looking an agent up by id is wired in by whichever
//! crate composes auth with storage, through [`CredentialSource`], the same
//! decoupling `akashi-authz` uses for its own storage-backed lookups.

mod api_key;
mod keys;
mod tokens;

pub use api_key::{generate_api_key, hash_api_key, verify_api_key};
pub use keys::TokenKeys;
pub use tokens::{issue_token, validate_token, TokenRequest};

use akashi_core::{Agent, AgentId, Claims, Error, OrgId, Result, Role};
use std::future::Future;
use std::pin::Pin;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Resolves an agent record by id, for API-key validation. Implemented by
/// the composing crate around `akashi_storage::Storage::get_agent`.
pub trait CredentialSource: Send + Sync {
    fn load_agent<'a>(&'a self, org_id: OrgId, agent_id: &'a AgentId) -> BoxFuture<'a, Option<Agent>>;
}

/// Validate a presented API key against the agent it claims to belong to
/// and produce [`Claims`] for it. Fails with [`Error::Auth`] if the agent
/// doesn't exist, has no API key configured, or the key doesn't match.
pub async fn resolve_api_key_claims(
    source: &dyn CredentialSource,
    org_id: OrgId,
    agent_id: &AgentId,
    presented_key: &str,
) -> Result<Claims> {
    let agent = source
        .load_agent(org_id, agent_id)
        .await?
        .ok_or_else(|| Error::Auth("unknown agent".into()))?;
    let stored = agent.hashed_api_key.as_deref().ok_or_else(|| Error::Auth("agent has no api key configured".into()))?;
    if !verify_api_key(presented_key, stored) {
        return Err(Error::Auth("api key mismatch".into()));
    }
    Ok(Claims {
        subject: agent.agent_id.as_str().to_string(),
        agent_id: agent.agent_id,
        org_id: agent.org_id,
        role: agent.role,
        jti: None,
        scoped_by: None,
    })
}

/// Well-known route prefixes the specification requires to bypass auth
/// entirely: `/health`, token issuance, signup/verify, billing webhooks.
/// This crate owns no router, so this is a prefix check a transport layer
/// can call before attempting credential resolution at all, not a full
/// routing table.
pub fn is_bypass_route(path: &str) -> bool {
    const BYPASS_PREFIXES: &[&str] =
        &["/health", "/auth/token", "/signup", "/billing/webhook"];
    BYPASS_PREFIXES.iter().any(|prefix| path == *prefix || path.starts_with(&format!("{prefix}/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSource {
        agent: Option<Agent>,
    }

    impl CredentialSource for FakeSource {
        fn load_agent<'a>(&'a self, _org_id: OrgId, _agent_id: &'a AgentId) -> BoxFuture<'a, Option<Agent>> {
            let agent = self.agent.clone();
            Box::pin(async move { Ok(agent) })
        }
    }

    fn agent_with_key(stored_key: &str) -> Agent {
        Agent {
            agent_id: AgentId::from("agent-1"),
            org_id: OrgId::new(),
            role: Role::Agent,
            tags: Default::default(),
            hashed_api_key: Some(stored_key.to_string()),
        }
    }

    #[tokio::test]
    async fn valid_api_key_resolves_claims() {
        let (plaintext, stored) = generate_api_key().unwrap();
        let agent = agent_with_key(&stored);
        let org_id = agent.org_id;
        let source = FakeSource { agent: Some(agent) };

        let claims = resolve_api_key_claims(&source, org_id, &AgentId::from("agent-1"), &plaintext).await.unwrap();
        assert_eq!(claims.agent_id, AgentId::from("agent-1"));
    }

    #[tokio::test]
    async fn wrong_api_key_is_rejected() {
        let (_plaintext, stored) = generate_api_key().unwrap();
        let agent = agent_with_key(&stored);
        let org_id = agent.org_id;
        let source = FakeSource { agent: Some(agent) };

        let err = resolve_api_key_claims(&source, org_id, &AgentId::from("agent-1"), "wrong-key").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn unknown_agent_is_rejected() {
        let source = FakeSource { agent: None };
        let err = resolve_api_key_claims(&source, OrgId::new(), &AgentId::from("nobody"), "key").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn bypass_routes_are_recognized() {
        assert!(is_bypass_route("/health"));
        assert!(is_bypass_route("/auth/token"));
        assert!(is_bypass_route("/signup/verify"));
        assert!(is_bypass_route("/billing/webhook/stripe"));
        assert!(!is_bypass_route("/decisions"));
    }
}
