//! Read/write surfaces behind `akashi-trace`'s `BackfillEmbeddings`/
//! `BackfillOutcomeEmbeddings`/`BackfillClaims` operations (specification
//! §4.4): find decisions missing a vector or claim set, then write the
//! vector back once the embedding provider has produced it. Kept separate
//! from `decisions.rs`'s write-path transaction since these run outside any
//! single trace call, scanning across rows instead of writing one.

use crate::retry::map_sqlx_error;
use crate::Storage;
use akashi_core::{Decision, DecisionId, OrgId, Result};
use sqlx::Row;

impl Storage {
    /// Current-revision decisions in `org_id` with no composed embedding
    /// yet, oldest first so a backfill sweep makes steady progress.
    pub async fn list_decisions_missing_embedding(&self, org_id: OrgId, limit: i64) -> Result<Vec<Decision>> {
        let rows = sqlx::query(
            r#"
            select id, run_id, agent_id, org_id, decision_type, outcome, confidence, reasoning,
                   embedding, outcome_embedding, quality_score, precedent_ref, valid_from, valid_to,
                   transaction_time, metadata
            from decisions
            where org_id = $1 and valid_to is null and embedding is null
            order by valid_from asc
            limit $2
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(row_to_decision).collect()
    }

    /// Same as [`Self::list_decisions_missing_embedding`] but for the
    /// separately-stored `outcome_embedding`.
    pub async fn list_decisions_missing_outcome_embedding(&self, org_id: OrgId, limit: i64) -> Result<Vec<Decision>> {
        let rows = sqlx::query(
            r#"
            select id, run_id, agent_id, org_id, decision_type, outcome, confidence, reasoning,
                   embedding, outcome_embedding, quality_score, precedent_ref, valid_from, valid_to,
                   transaction_time, metadata
            from decisions
            where org_id = $1 and valid_to is null and outcome_embedding is null
            order by valid_from asc
            limit $2
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(row_to_decision).collect()
    }

    /// Current-revision decisions in `org_id` with zero rows in
    /// `decision_claims`, oldest first.
    pub async fn list_decisions_missing_claims(&self, org_id: OrgId, limit: i64) -> Result<Vec<Decision>> {
        let rows = sqlx::query(
            r#"
            select d.id, d.run_id, d.agent_id, d.org_id, d.decision_type, d.outcome, d.confidence,
                   d.reasoning, d.embedding, d.outcome_embedding, d.quality_score, d.precedent_ref,
                   d.valid_from, d.valid_to, d.transaction_time, d.metadata
            from decisions d
            where d.org_id = $1
              and d.valid_to is null
              and not exists (select 1 from decision_claims c where c.decision_id = d.id)
            order by d.valid_from asc
            limit $2
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(row_to_decision).collect()
    }

    /// Write a freshly computed composed embedding back onto a decision.
    pub async fn update_decision_embedding(&self, decision_id: DecisionId, embedding: &[f32]) -> Result<()> {
        sqlx::query("update decisions set embedding = $2 where id = $1")
            .bind(decision_id.as_uuid())
            .bind(embedding)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Write a freshly computed outcome-only embedding back onto a decision.
    pub async fn update_decision_outcome_embedding(&self, decision_id: DecisionId, embedding: &[f32]) -> Result<()> {
        sqlx::query("update decisions set outcome_embedding = $2 where id = $1")
            .bind(decision_id.as_uuid())
            .bind(embedding)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

fn row_to_decision(row: sqlx::postgres::PgRow) -> Result<Decision> {
    use akashi_core::{AgentId, RunId};
    Ok(Decision {
        id: DecisionId::from_uuid(row.try_get("id").map_err(map_sqlx_error)?),
        run_id: RunId::from_uuid(row.try_get("run_id").map_err(map_sqlx_error)?),
        agent_id: AgentId::new(row.try_get::<String, _>("agent_id").map_err(map_sqlx_error)?),
        org_id: OrgId::from_uuid(row.try_get("org_id").map_err(map_sqlx_error)?),
        decision_type: row.try_get("decision_type").map_err(map_sqlx_error)?,
        outcome: row.try_get("outcome").map_err(map_sqlx_error)?,
        confidence: row.try_get("confidence").map_err(map_sqlx_error)?,
        reasoning: row.try_get("reasoning").map_err(map_sqlx_error)?,
        embedding: row
            .try_get::<Option<Vec<f32>>, _>("embedding")
            .map_err(map_sqlx_error)?,
        outcome_embedding: row
            .try_get::<Option<Vec<f32>>, _>("outcome_embedding")
            .map_err(map_sqlx_error)?,
        quality_score: row.try_get("quality_score").map_err(map_sqlx_error)?,
        precedent_ref: row
            .try_get::<Option<uuid::Uuid>, _>("precedent_ref")
            .map_err(map_sqlx_error)?
            .map(DecisionId::from_uuid),
        valid_from: row.try_get("valid_from").map_err(map_sqlx_error)?,
        valid_to: row.try_get("valid_to").map_err(map_sqlx_error)?,
        transaction_time: row.try_get("transaction_time").map_err(map_sqlx_error)?,
        metadata: row.try_get("metadata").map_err(map_sqlx_error)?,
    })
}
