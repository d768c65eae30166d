//! Agent identity lookups and auto-registration.

use crate::retry::map_sqlx_error;
use crate::Storage;
use akashi_core::{Agent, AgentId, Error, OrgId, Result, Role};
use sqlx::Row;
use std::collections::BTreeSet;

impl Storage {
    /// Look up an agent by `(org_id, agent_id)`. `None` if it doesn't exist.
    pub async fn get_agent(&self, org_id: OrgId, agent_id: &AgentId) -> Result<Option<Agent>> {
        let row = sqlx::query(
            r#"
            select agent_id, org_id, role, tags, hashed_api_key
            from agents
            where org_id = $1 and agent_id = $2
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(agent_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(row_to_agent).transpose()
    }

    /// `ResolveOrCreateAgent` (specification §4.4): an existing agent is
    /// returned as-is. A missing agent is created with `role = agent` only
    /// if `caller_role` is at least [`Role::Admin`]; otherwise the caller
    /// gets [`Error::NotFound`]. Creation is idempotent against a racing
    /// duplicate insert.
    pub async fn resolve_or_create_agent(
        &self,
        org_id: OrgId,
        agent_id: &AgentId,
        caller_role: Role,
    ) -> Result<Agent> {
        if let Some(agent) = self.get_agent(org_id, agent_id).await? {
            return Ok(agent);
        }

        if !caller_role.at_least(Role::Admin) {
            return Err(Error::NotFound(format!("agent {agent_id} not found")));
        }

        sqlx::query(
            r#"
            insert into agents (agent_id, org_id, role, tags, hashed_api_key)
            values ($1, $2, 'agent', '{}', null)
            on conflict (org_id, agent_id) do nothing
            "#,
        )
        .bind(agent_id.as_str())
        .bind(org_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        self.get_agent(org_id, agent_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id} not found after insert")))
    }
}

fn row_to_agent(row: sqlx::postgres::PgRow) -> Result<Agent> {
    let role_str: String = row.try_get("role").map_err(map_sqlx_error)?;
    let role = parse_role(&role_str)?;
    let tags: Vec<String> = row.try_get("tags").map_err(map_sqlx_error)?;

    Ok(Agent {
        agent_id: AgentId::new(row.try_get::<String, _>("agent_id").map_err(map_sqlx_error)?),
        org_id: OrgId::from_uuid(row.try_get("org_id").map_err(map_sqlx_error)?),
        role,
        tags: tags.into_iter().collect::<BTreeSet<_>>(),
        hashed_api_key: row.try_get("hashed_api_key").map_err(map_sqlx_error)?,
    })
}

fn parse_role(s: &str) -> Result<Role> {
    match s {
        "reader" => Ok(Role::Reader),
        "agent" => Ok(Role::Agent),
        "admin" => Ok(Role::Admin),
        "org_owner" => Ok(Role::OrgOwner),
        "platform_admin" => Ok(Role::PlatformAdmin),
        other => Err(Error::Corruption(format!("unknown role in storage row: {other:?}"))),
    }
}
