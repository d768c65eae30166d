//! `AccessGrant` storage, the source `akashi-authz`'s `LoadGrantedSet` loads
//! from (through whatever caller wires the two crates together — this crate
//! has no dependency on `akashi-authz`, only on the shared entity shape).

use crate::retry::map_sqlx_error;
use crate::Storage;
use akashi_core::{AccessGrant, AgentId, OrgId, Result};
use sqlx::Row;

impl Storage {
    /// Grant `grantor_id` -> `grantee_id` permission on a resource type
    /// (optionally scoped to one `resource_id`). Never crosses `org_id`.
    pub async fn insert_grant(&self, grant: &AccessGrant) -> Result<()> {
        sqlx::query(
            r#"
            insert into access_grants
                (grantor_id, grantee_id, org_id, resource_type, resource_id, permission, expires_at)
            values ($1, $2, $3, $4, $5, $6, $7)
            on conflict (grantor_id, grantee_id, org_id, resource_type, resource_id, permission)
            do update set expires_at = excluded.expires_at
            "#,
        )
        .bind(grant.grantor_id.as_str())
        .bind(grant.grantee_id.as_str())
        .bind(grant.org_id.as_uuid())
        .bind(&grant.resource_type)
        .bind(&grant.resource_id)
        .bind(&grant.permission)
        .bind(grant.expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Every agent `grantee_id` has granted `permission` on `resource_type`
    /// to, not yet expired. This is the query `akashi-authz`'s
    /// `LoadGrantedSet` cache-miss path runs before caching the result.
    pub async fn list_grantors(
        &self,
        org_id: OrgId,
        grantee_id: &AgentId,
        resource_type: &str,
        permission: &str,
    ) -> Result<Vec<AgentId>> {
        let rows = sqlx::query(
            r#"
            select distinct grantor_id
            from access_grants
            where org_id = $1
              and grantee_id = $2
              and resource_type = $3
              and permission = $4
              and (expires_at is null or expires_at > now())
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(grantee_id.as_str())
        .bind(resource_type)
        .bind(permission)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| Ok(AgentId::new(row.try_get::<String, _>("grantor_id").map_err(map_sqlx_error)?)))
            .collect()
    }

    /// Revoke a previously-granted permission. A no-op if it doesn't exist.
    pub async fn revoke_grant(
        &self,
        org_id: OrgId,
        grantor_id: &AgentId,
        grantee_id: &AgentId,
        resource_type: &str,
        permission: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            delete from access_grants
            where org_id = $1 and grantor_id = $2 and grantee_id = $3
              and resource_type = $4 and permission = $5
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(grantor_id.as_str())
        .bind(grantee_id.as_str())
        .bind(resource_type)
        .bind(permission)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}
