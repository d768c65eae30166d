//! `AgentRun` lookups, used by the trace write path to locate-or-create the
//! run a decision belongs to.

use crate::retry::map_sqlx_error;
use crate::Storage;
use akashi_core::{AgentId, AgentRun, OrgId, Result, RunId, RunStatus};
use sqlx::Row;

impl Storage {
    /// Fetch a run by id, scoped to its org.
    pub async fn get_run(&self, org_id: OrgId, run_id: RunId) -> Result<Option<AgentRun>> {
        let row = sqlx::query(
            r#"
            select id, agent_id, org_id, trace_id, parent_run_id, status,
                   started_at, completed_at, metadata
            from agent_runs
            where org_id = $1 and id = $2
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(run_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(row_to_run).transpose()
    }

    /// Insert a new run row inside the caller's transaction. The trace
    /// write path calls this when `run_id` wasn't supplied by the caller;
    /// it never updates an existing run.
    pub(crate) async fn insert_run(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        run: &AgentRun,
    ) -> Result<()> {
        sqlx::query(
            r#"
            insert into agent_runs
                (id, agent_id, org_id, trace_id, parent_run_id, status, started_at, completed_at, metadata)
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(run.id.as_uuid())
        .bind(run.agent_id.as_str())
        .bind(run.org_id.as_uuid())
        .bind(&run.trace_id)
        .bind(run.parent_run_id.map(|id| id.as_uuid()))
        .bind(run_status_str(run.status))
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(&run.metadata)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Mark a run completed or failed. Terminal; callers should not
    /// transition a run twice.
    pub async fn complete_run(&self, org_id: OrgId, run_id: RunId, status: RunStatus) -> Result<()> {
        sqlx::query(
            r#"
            update agent_runs
            set status = $3, completed_at = now()
            where org_id = $1 and id = $2
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(run_id.as_uuid())
        .bind(run_status_str(status))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

fn row_to_run(row: sqlx::postgres::PgRow) -> Result<AgentRun> {
    let status_str: String = row.try_get("status").map_err(map_sqlx_error)?;
    Ok(AgentRun {
        id: RunId::from_uuid(row.try_get("id").map_err(map_sqlx_error)?),
        agent_id: AgentId::new(row.try_get::<String, _>("agent_id").map_err(map_sqlx_error)?),
        org_id: OrgId::from_uuid(row.try_get("org_id").map_err(map_sqlx_error)?),
        trace_id: row.try_get("trace_id").map_err(map_sqlx_error)?,
        parent_run_id: row
            .try_get::<Option<uuid::Uuid>, _>("parent_run_id")
            .map_err(map_sqlx_error)?
            .map(RunId::from_uuid),
        status: parse_run_status(&status_str)?,
        started_at: row.try_get("started_at").map_err(map_sqlx_error)?,
        completed_at: row.try_get("completed_at").map_err(map_sqlx_error)?,
        metadata: row.try_get("metadata").map_err(map_sqlx_error)?,
    })
}

fn run_status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
    }
}

fn parse_run_status(s: &str) -> Result<RunStatus> {
    match s {
        "running" => Ok(RunStatus::Running),
        "completed" => Ok(RunStatus::Completed),
        "failed" => Ok(RunStatus::Failed),
        other => Err(akashi_core::Error::Corruption(format!(
            "unknown run status in storage row: {other:?}"
        ))),
    }
}
