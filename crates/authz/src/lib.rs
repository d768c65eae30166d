//! Agent-to-agent access control (component C8).
//!
//! `akashi-authz` has no dependency on `akashi-storage` — the granted-set
//! cache-miss path (`akashi_storage::Storage::list_grantors`) and the tag
//! lookup (`akashi_storage::Storage::get_agent`) are wired in by whichever
//! crate composes authorization with storage, through the [`GrantSource`]
//! and [`TagSource`] traits defined here. Grounded on the teacher's
//! `TransactionManager` (`concurrency/src/manager.rs`) for the
//! `dashmap`/`parking_lot` cache shape; see [`cache`].

mod cache;

pub use cache::GrantedSetCache;

use akashi_core::{AgentId, Claims, DecisionConflict, OrgId, Result, Role};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Default TTL for cached granted sets. Short enough that a revoked grant
/// stops applying within a request or two; callers needing an immediate
/// cutover should call [`AuthzService::invalidate`] on revoke.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// The resource type and permission name `CanAccessAgent` checks grants
/// against. Kept as constants rather than free-form strings so every call
/// site agrees on the exact grant shape to look up.
pub const AGENT_RESOURCE_TYPE: &str = "agent";
pub const AGENT_ACCESS_PERMISSION: &str = "access";

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Resolves the set of agents a given agent has been granted access to.
/// Implemented by `akashi-storage`'s `Storage` (via `list_grantors`) for
/// production wiring; fakeable in tests. Hand-written boxed-future signature
/// rather than an `async fn` in the trait, since this needs to be callable
/// through `&dyn GrantSource` and this workspace's MSRV predates native
/// dyn-unsafe async trait methods.
pub trait GrantSource: Send + Sync {
    fn list_grantors<'a>(
        &'a self,
        org_id: OrgId,
        grantee_id: &'a AgentId,
        resource_type: &'a str,
        permission: &'a str,
    ) -> BoxFuture<'a, Vec<AgentId>>;
}

/// Resolves an agent's tags for the tag-sharing access rule. Implemented by
/// `akashi-storage`'s `Storage` (via `get_agent`) for production wiring.
pub trait TagSource: Send + Sync {
    fn agent_tags<'a>(&'a self, org_id: OrgId, agent_id: &'a AgentId) -> BoxFuture<'a, BTreeSet<String>>;
}

/// Authorization engine for agent-to-agent access, decision/search/conflict
/// filtering, and the granted-set cache behind them.
pub struct AuthzService {
    cache: GrantedSetCache,
}

impl AuthzService {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self { cache: GrantedSetCache::new(ttl) }
    }

    /// Whether `caller` may access `target_agent_id`'s data, applying
    /// specification §4.8's short-circuit rule order: admin-or-above sees
    /// everything, an agent always sees its own data, shared tags grant
    /// access, and anything left falls through to an explicit grant lookup.
    pub async fn can_access_agent(
        &self,
        caller: &Claims,
        target_agent_id: &AgentId,
        grants: &dyn GrantSource,
        tags: &dyn TagSource,
    ) -> Result<bool> {
        if caller.has_role_at_least(Role::Admin) {
            return Ok(true);
        }
        if &caller.agent_id == target_agent_id {
            return Ok(true);
        }

        let caller_tags = tags.agent_tags(caller.org_id, &caller.agent_id).await?;
        if !caller_tags.is_empty() {
            let target_tags = tags.agent_tags(caller.org_id, target_agent_id).await?;
            if caller_tags.intersection(&target_tags).next().is_some() {
                return Ok(true);
            }
        }

        let granted = self.load_granted_set(caller, grants).await?;
        Ok(match granted {
            None => true,
            Some(set) => set.contains(target_agent_id),
        })
    }

    /// The set of agents `caller` may access beyond its own identity, or
    /// `None` for "unrestricted" (admin rank and above). Cached per
    /// `org_id:subject` for [`Self::cache_ttl`]; `None` is cached exactly
    /// like any other value, distinguishable from a cache miss.
    pub async fn load_granted_set(
        &self,
        caller: &Claims,
        grants: &dyn GrantSource,
    ) -> Result<Option<HashSet<AgentId>>> {
        if caller.has_role_at_least(Role::Admin) {
            return Ok(None);
        }

        let key = GrantedSetCache::key(&caller.org_id.as_uuid().to_string(), &caller.subject);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let grantors = grants
            .list_grantors(caller.org_id, &caller.agent_id, AGENT_RESOURCE_TYPE, AGENT_ACCESS_PERMISSION)
            .await?;
        let mut set: HashSet<AgentId> = grantors.into_iter().collect();
        set.insert(caller.agent_id.clone());
        let value = Some(set);
        self.cache.put(key, value.clone());
        Ok(value)
    }

    /// Drop any cached granted set for `caller`, forcing the next lookup to
    /// hit [`GrantSource`] again. Callers invoke this right after granting
    /// or revoking access so the change takes effect without waiting out
    /// the TTL.
    pub fn invalidate(&self, org_id: OrgId, subject: &str) {
        let key = GrantedSetCache::key(&org_id.as_uuid().to_string(), subject);
        self.cache.invalidate(&key);
    }

    /// Sweep expired cache entries. Intended to be driven by a periodic
    /// background task alongside the other supervised loops in this system.
    pub fn evict_expired(&self) {
        self.cache.evict_expired();
    }

    /// Keep only the items whose `agent_id` the caller may access.
    pub async fn filter_by_agent<T>(
        &self,
        caller: &Claims,
        items: Vec<T>,
        agent_id_of: impl Fn(&T) -> &AgentId,
        grants: &dyn GrantSource,
    ) -> Result<Vec<T>> {
        let granted = self.load_granted_set(caller, grants).await?;
        Ok(match granted {
            None => items,
            Some(set) => items.into_iter().filter(|item| set.contains(agent_id_of(item))).collect(),
        })
    }

    /// Keep only conflicts where the caller may access both `agent_a` and
    /// `agent_b` — a conflict naming an agent the caller can't see would
    /// otherwise leak that agent's existence.
    pub async fn filter_conflicts(
        &self,
        caller: &Claims,
        conflicts: Vec<DecisionConflict>,
        grants: &dyn GrantSource,
    ) -> Result<Vec<DecisionConflict>> {
        let granted = self.load_granted_set(caller, grants).await?;
        Ok(match granted {
            None => conflicts,
            Some(set) => conflicts
                .into_iter()
                .filter(|c| set.contains(&c.agent_a) && set.contains(&c.agent_b))
                .collect(),
        })
    }
}

impl Default for AuthzService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use akashi_core::DecisionId;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn claims(org_id: OrgId, agent_id: &str, role: Role) -> Claims {
        Claims {
            subject: format!("subj-{agent_id}"),
            agent_id: AgentId::from(agent_id),
            org_id,
            role,
            jti: None,
            scoped_by: None,
        }
    }

    struct FakeGrants {
        by_grantee: HashMap<String, Vec<AgentId>>,
        calls: Mutex<u32>,
    }

    impl GrantSource for FakeGrants {
        fn list_grantors<'a>(
            &'a self,
            _org_id: OrgId,
            grantee_id: &'a AgentId,
            _resource_type: &'a str,
            _permission: &'a str,
        ) -> BoxFuture<'a, Vec<AgentId>> {
            *self.calls.lock().unwrap() += 1;
            let result = self.by_grantee.get(grantee_id.as_str()).cloned().unwrap_or_default();
            Box::pin(async move { Ok(result) })
        }
    }

    struct FakeTags {
        by_agent: HashMap<String, BTreeSet<String>>,
    }

    impl TagSource for FakeTags {
        fn agent_tags<'a>(&'a self, _org_id: OrgId, agent_id: &'a AgentId) -> BoxFuture<'a, BTreeSet<String>> {
            let result = self.by_agent.get(agent_id.as_str()).cloned().unwrap_or_default();
            Box::pin(async move { Ok(result) })
        }
    }

    #[tokio::test]
    async fn admin_sees_everything_without_consulting_grants() {
        let svc = AuthzService::new();
        let org = OrgId::new();
        let caller = claims(org, "admin-1", Role::Admin);
        let grants = FakeGrants { by_grantee: HashMap::new(), calls: Mutex::new(0) };
        let tags = FakeTags { by_agent: HashMap::new() };

        let ok = svc.can_access_agent(&caller, &AgentId::from("anyone"), &grants, &tags).await.unwrap();
        assert!(ok);
        assert_eq!(*grants.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn agent_always_sees_its_own_data() {
        let svc = AuthzService::new();
        let org = OrgId::new();
        let caller = claims(org, "agent-1", Role::Agent);
        let grants = FakeGrants { by_grantee: HashMap::new(), calls: Mutex::new(0) };
        let tags = FakeTags { by_agent: HashMap::new() };

        let ok = svc.can_access_agent(&caller, &AgentId::from("agent-1"), &grants, &tags).await.unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn shared_tag_grants_access() {
        let svc = AuthzService::new();
        let org = OrgId::new();
        let caller = claims(org, "agent-1", Role::Agent);
        let grants = FakeGrants { by_grantee: HashMap::new(), calls: Mutex::new(0) };
        let mut by_agent = HashMap::new();
        by_agent.insert("agent-1".to_string(), BTreeSet::from(["team-a".to_string()]));
        by_agent.insert("agent-2".to_string(), BTreeSet::from(["team-a".to_string(), "team-b".to_string()]));
        let tags = FakeTags { by_agent };

        let ok = svc.can_access_agent(&caller, &AgentId::from("agent-2"), &grants, &tags).await.unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn no_tag_or_grant_denies_access() {
        let svc = AuthzService::new();
        let org = OrgId::new();
        let caller = claims(org, "agent-1", Role::Agent);
        let grants = FakeGrants { by_grantee: HashMap::new(), calls: Mutex::new(0) };
        let tags = FakeTags { by_agent: HashMap::new() };

        let ok = svc.can_access_agent(&caller, &AgentId::from("agent-2"), &grants, &tags).await.unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn explicit_grant_allows_access_and_is_cached() {
        let svc = AuthzService::new();
        let org = OrgId::new();
        let caller = claims(org, "agent-1", Role::Agent);
        let mut by_grantee = HashMap::new();
        by_grantee.insert("agent-1".to_string(), vec![AgentId::from("agent-2")]);
        let grants = FakeGrants { by_grantee, calls: Mutex::new(0) };
        let tags = FakeTags { by_agent: HashMap::new() };

        assert!(svc.can_access_agent(&caller, &AgentId::from("agent-2"), &grants, &tags).await.unwrap());
        assert!(svc.can_access_agent(&caller, &AgentId::from("agent-2"), &grants, &tags).await.unwrap());
        assert_eq!(*grants.calls.lock().unwrap(), 1, "second lookup should hit the cache");
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_lookup() {
        let svc = AuthzService::new();
        let org = OrgId::new();
        let caller = claims(org, "agent-1", Role::Agent);
        let mut by_grantee = HashMap::new();
        by_grantee.insert("agent-1".to_string(), vec![AgentId::from("agent-2")]);
        let grants = FakeGrants { by_grantee, calls: Mutex::new(0) };
        let tags = FakeTags { by_agent: HashMap::new() };

        svc.load_granted_set(&caller, &grants).await.unwrap();
        svc.invalidate(org, &caller.subject);
        svc.load_granted_set(&caller, &grants).await.unwrap();
        assert_eq!(*grants.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn filter_conflicts_requires_access_to_both_agents() {
        let svc = AuthzService::new();
        let org = OrgId::new();
        let caller = claims(org, "agent-1", Role::Agent);
        let mut by_grantee = HashMap::new();
        by_grantee.insert("agent-1".to_string(), vec![AgentId::from("agent-2"), AgentId::from("agent-3")]);
        let grants = FakeGrants { by_grantee, calls: Mutex::new(0) };

        let visible = DecisionConflict {
            id: akashi_core::ConflictId::new(),
            decision_a_id: DecisionId::new(),
            decision_b_id: DecisionId::new(),
            agent_a: AgentId::from("agent-2"),
            agent_b: AgentId::from("agent-3"),
            category: akashi_core::ConflictCategory::Factual,
            severity: akashi_core::ConflictSeverity::Medium,
            status: akashi_core::ConflictStatus::Open,
            resolution_note: None,
            resolved_by: None,
            resolved_at: None,
        };
        let hidden = DecisionConflict {
            id: akashi_core::ConflictId::new(),
            decision_a_id: DecisionId::new(),
            decision_b_id: DecisionId::new(),
            agent_a: AgentId::from("agent-2"),
            agent_b: AgentId::from("stranger"),
            category: akashi_core::ConflictCategory::Factual,
            severity: akashi_core::ConflictSeverity::Medium,
            status: akashi_core::ConflictStatus::Open,
            resolution_note: None,
            resolved_by: None,
            resolved_at: None,
        };

        let filtered = svc.filter_conflicts(&caller, vec![visible.clone(), hidden], &grants).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, visible.id);
    }
}
