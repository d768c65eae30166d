//! Adapter wiring `akashi-storage` into `akashi-auth`'s [`CredentialSource`]
//! seam, the root-crate counterpart to `akashi-trace`'s `StorageGrants`.
//! `akashi-auth` has no dependency on `akashi-storage` by design, and
//! unlike the authz grant/tag lookups this one has no natural home inside
//! `akashi-trace` (API-key resolution happens before a request reaches
//! `TraceService` at all), so it lives here at the composition root.

use akashi_auth::CredentialSource;
use akashi_core::{Agent, AgentId, OrgId, Result};
use akashi_storage::Storage;
use std::future::Future;
use std::pin::Pin;

pub struct StorageCredentials<'a>(pub &'a Storage);

impl CredentialSource for StorageCredentials<'_> {
    fn load_agent<'a>(
        &'a self,
        org_id: OrgId,
        agent_id: &'a AgentId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Agent>>> + Send + 'a>> {
        Box::pin(self.0.get_agent(org_id, agent_id))
    }
}
