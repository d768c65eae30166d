//! Adapter wiring `akashi-storage` into `akashi-authz`'s [`GrantSource`]/
//! [`TagSource`] seams. `akashi-authz` has no dependency on
//! `akashi-storage`, so whichever crate holds both wires them together;
//! since `TraceService` already composes a `Storage` handle, it's the
//! natural place for this adapter rather than pushing it up to the
//! composition root.

use akashi_authz::{GrantSource, TagSource};
use akashi_core::{AgentId, OrgId, Result};
use akashi_storage::Storage;
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

pub struct StorageGrants<'a>(pub &'a Storage);

impl GrantSource for StorageGrants<'_> {
    fn list_grantors<'a>(
        &'a self,
        org_id: OrgId,
        grantee_id: &'a AgentId,
        resource_type: &'a str,
        permission: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<AgentId>>> + Send + 'a>> {
        Box::pin(self.0.list_grantors(org_id, grantee_id, resource_type, permission))
    }
}

impl TagSource for StorageGrants<'_> {
    fn agent_tags<'a>(
        &'a self,
        org_id: OrgId,
        agent_id: &'a AgentId,
    ) -> Pin<Box<dyn Future<Output = Result<BTreeSet<String>>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self.0.get_agent(org_id, agent_id).await?.map(|a| a.tags).unwrap_or_default())
        })
    }
}

