//! `DecisionConflict` storage: `ListConflicts` plus insert/status-transition
//! for the background conflict scorer (§4.4 step 7).

use crate::retry::map_sqlx_error;
use crate::Storage;
use akashi_core::{
    AgentId, ConflictCategory, ConflictId, ConflictSeverity, ConflictStatus, DecisionConflict,
    DecisionId, Error, Result,
};
use chrono::Utc;
use sqlx::Row;

impl Storage {
    /// Conflicts touching any of `decision_ids`, used by `Check` (filtering
    /// to `open`/`acknowledged` is the caller's job, per §4.4 — this
    /// returns every status so callers that need history still can).
    pub async fn list_conflicts_for_decisions(
        &self,
        decision_ids: &[DecisionId],
    ) -> Result<Vec<DecisionConflict>> {
        if decision_ids.is_empty() {
            return Ok(Vec::new());
        }
        let uuids: Vec<uuid::Uuid> = decision_ids.iter().map(|id| id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            select id, decision_a_id, decision_b_id, agent_a, agent_b, category, severity,
                   status, resolution_note, resolved_by, resolved_at
            from decision_conflicts
            where decision_a_id = any($1) or decision_b_id = any($1)
            order by resolved_at desc nulls first
            "#,
        )
        .bind(&uuids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(row_to_conflict).collect()
    }

    /// Insert a newly-scored conflict. Starts in `open`.
    pub async fn insert_conflict(&self, conflict: &DecisionConflict) -> Result<()> {
        sqlx::query(
            r#"
            insert into decision_conflicts
                (id, decision_a_id, decision_b_id, agent_a, agent_b, category, severity, status,
                 resolution_note, resolved_by, resolved_at)
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(conflict.id.as_uuid())
        .bind(conflict.decision_a_id.as_uuid())
        .bind(conflict.decision_b_id.as_uuid())
        .bind(conflict.agent_a.as_str())
        .bind(conflict.agent_b.as_str())
        .bind(category_str(conflict.category))
        .bind(severity_str(conflict.severity))
        .bind(status_str(conflict.status))
        .bind(&conflict.resolution_note)
        .bind(conflict.resolved_by.as_ref().map(AgentId::as_str))
        .bind(conflict.resolved_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Transition a conflict's status, enforcing the state machine in
    /// `ConflictStatus::can_transition_to`. Resolving or marking `wont_fix`
    /// stamps `resolved_by`/`resolved_at`.
    pub async fn update_conflict_status(
        &self,
        id: ConflictId,
        next: ConflictStatus,
        resolved_by: Option<AgentId>,
        resolution_note: Option<String>,
    ) -> Result<()> {
        let current = sqlx::query("select status from decision_conflicts where id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| Error::NotFound(format!("conflict {id} not found")))?;
        let current_status = parse_status(&current.try_get::<String, _>("status").map_err(map_sqlx_error)?)?;

        if !current_status.can_transition_to(next) {
            return Err(Error::Conflict(format!(
                "illegal conflict status transition {current_status:?} -> {next:?}"
            )));
        }

        let resolved_at = next.is_terminal().then(Utc::now);
        sqlx::query(
            r#"
            update decision_conflicts
            set status = $2, resolution_note = $3, resolved_by = $4, resolved_at = $5
            where id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(status_str(next))
        .bind(resolution_note)
        .bind(resolved_by.as_ref().map(AgentId::as_str))
        .bind(resolved_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

fn row_to_conflict(row: sqlx::postgres::PgRow) -> Result<DecisionConflict> {
    let category_str: String = row.try_get("category").map_err(map_sqlx_error)?;
    let severity_str: String = row.try_get("severity").map_err(map_sqlx_error)?;
    let status_str: String = row.try_get("status").map_err(map_sqlx_error)?;

    Ok(DecisionConflict {
        id: ConflictId::from_uuid(row.try_get("id").map_err(map_sqlx_error)?),
        decision_a_id: DecisionId::from_uuid(row.try_get("decision_a_id").map_err(map_sqlx_error)?),
        decision_b_id: DecisionId::from_uuid(row.try_get("decision_b_id").map_err(map_sqlx_error)?),
        agent_a: AgentId::new(row.try_get::<String, _>("agent_a").map_err(map_sqlx_error)?),
        agent_b: AgentId::new(row.try_get::<String, _>("agent_b").map_err(map_sqlx_error)?),
        category: parse_category(&category_str)?,
        severity: parse_severity(&severity_str)?,
        status: parse_status(&status_str)?,
        resolution_note: row.try_get("resolution_note").map_err(map_sqlx_error)?,
        resolved_by: row
            .try_get::<Option<String>, _>("resolved_by")
            .map_err(map_sqlx_error)?
            .map(AgentId::new),
        resolved_at: row.try_get("resolved_at").map_err(map_sqlx_error)?,
    })
}

fn category_str(category: ConflictCategory) -> &'static str {
    match category {
        ConflictCategory::Factual => "factual",
        ConflictCategory::Assessment => "assessment",
        ConflictCategory::Strategic => "strategic",
        ConflictCategory::Temporal => "temporal",
    }
}

fn parse_category(s: &str) -> Result<ConflictCategory> {
    match s {
        "factual" => Ok(ConflictCategory::Factual),
        "assessment" => Ok(ConflictCategory::Assessment),
        "strategic" => Ok(ConflictCategory::Strategic),
        "temporal" => Ok(ConflictCategory::Temporal),
        other => Err(Error::Corruption(format!("unknown conflict category: {other:?}"))),
    }
}

fn severity_str(severity: ConflictSeverity) -> &'static str {
    match severity {
        ConflictSeverity::Low => "low",
        ConflictSeverity::Medium => "medium",
        ConflictSeverity::High => "high",
        ConflictSeverity::Critical => "critical",
    }
}

fn parse_severity(s: &str) -> Result<ConflictSeverity> {
    match s {
        "low" => Ok(ConflictSeverity::Low),
        "medium" => Ok(ConflictSeverity::Medium),
        "high" => Ok(ConflictSeverity::High),
        "critical" => Ok(ConflictSeverity::Critical),
        other => Err(Error::Corruption(format!("unknown conflict severity: {other:?}"))),
    }
}

fn status_str(status: ConflictStatus) -> &'static str {
    match status {
        ConflictStatus::Open => "open",
        ConflictStatus::Acknowledged => "acknowledged",
        ConflictStatus::Resolved => "resolved",
        ConflictStatus::WontFix => "wont_fix",
    }
}

fn parse_status(s: &str) -> Result<ConflictStatus> {
    match s {
        "open" => Ok(ConflictStatus::Open),
        "acknowledged" => Ok(ConflictStatus::Acknowledged),
        "resolved" => Ok(ConflictStatus::Resolved),
        "wont_fix" => Ok(ConflictStatus::WontFix),
        other => Err(Error::Corruption(format!("unknown conflict status: {other:?}"))),
    }
}
