//! Decision writes (the composed C9 transaction) and the read surfaces
//! named in §4.3: `QueryDecisions`, `SearchDecisionsByText`,
//! `GetDecisionsByIDs`, and the bi-temporal `QueryDecisionsTemporal`.

use crate::outbox::enqueue_outbox_row_tx;
use crate::retry::map_sqlx_error;
use crate::Storage;
use akashi_core::{
    AgentEvent, AgentId, AgentRun, Alternative, Decision, DecisionId, Evidence, OrgId, Result, RunId,
};
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Row, Transaction};

/// Whether the run a decision belongs to already exists or needs to be
/// created as part of the same transaction.
pub enum RunWrite {
    Existing(RunId),
    New(AgentRun),
}

/// Everything the C4 trace algorithm assembles for one `Trace` call,
/// persisted atomically: run (if new), decision, alternatives, evidence,
/// one run-event per item written, and a search-outbox row.
pub struct DecisionTraceWrite {
    pub run: RunWrite,
    pub decision: Decision,
    pub alternatives: Vec<Alternative>,
    pub evidence: Vec<Evidence>,
    pub events: Vec<AgentEvent>,
}

/// Filters for `QueryDecisions`. `None` fields are unconstrained.
#[derive(Debug, Clone, Default)]
pub struct DecisionQuery {
    pub agent_id: Option<AgentId>,
    pub decision_type: Option<String>,
    pub limit: i64,
}

impl Storage {
    /// Step 5 of the `Trace` algorithm (specification §4.4): insert/locate
    /// the run, the decision, its alternatives and evidence, one run-event
    /// per item written, and a search-outbox row, all inside one
    /// transaction wrapped in `WithRetry` for serialization/deadlock
    /// recovery. The returned `usize` is `write.events.len()`, the
    /// `event_count` the `Trace` contract promises.
    pub async fn write_decision_trace(
        &self,
        write: &DecisionTraceWrite,
    ) -> Result<(RunId, DecisionId, usize)> {
        crate::retry::with_retry(|| async {
            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

            let run_id = match &write.run {
                RunWrite::Existing(id) => *id,
                RunWrite::New(run) => {
                    Storage::insert_run(&mut tx, run).await?;
                    run.id
                }
            };

            insert_decision_tx(&mut tx, &write.decision).await?;
            for alt in &write.alternatives {
                insert_alternative_tx(&mut tx, alt).await?;
            }
            for ev in &write.evidence {
                insert_evidence_tx(&mut tx, ev).await?;
            }
            for event in &write.events {
                insert_event_tx(&mut tx, event).await?;
            }
            enqueue_outbox_row_tx(&mut tx, write.decision.id).await?;

            tx.commit().await.map_err(map_sqlx_error)?;
            Ok((run_id, write.decision.id, write.events.len()))
        })
        .await
    }

    /// `QueryDecisions`: current revisions only (`valid_to IS NULL`),
    /// newest first, filtered by the non-`None` fields of `query`.
    pub async fn query_decisions(&self, org_id: OrgId, query: &DecisionQuery) -> Result<Vec<Decision>> {
        let mut builder: sqlx::QueryBuilder<Postgres> = sqlx::QueryBuilder::new(
            "select id, run_id, agent_id, org_id, decision_type, outcome, confidence, reasoning, \
             embedding, outcome_embedding, quality_score, precedent_ref, valid_from, valid_to, \
             transaction_time, metadata \
             from decisions where org_id = ",
        );
        builder.push_bind(org_id.as_uuid());
        builder.push(" and valid_to is null");

        if let Some(agent_id) = &query.agent_id {
            builder.push(" and agent_id = ");
            builder.push_bind(agent_id.as_str());
        }
        if let Some(decision_type) = &query.decision_type {
            builder.push(" and decision_type = ");
            builder.push_bind(decision_type.clone());
        }
        builder.push(" order by valid_from desc limit ");
        builder.push_bind(query.limit.max(1));

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.into_iter().map(row_to_decision).collect()
    }

    /// `SearchDecisionsByText`: a plain-text full-text fallback over
    /// `outcome`/`reasoning`, ranked by `ts_rank`. This is the text leg of
    /// the C5 ANN-then-text fallback chain, not the ANN path itself.
    pub async fn search_decisions_by_text(
        &self,
        org_id: OrgId,
        query_text: &str,
        limit: i64,
    ) -> Result<Vec<Decision>> {
        let rows = sqlx::query(
            r#"
            select id, run_id, agent_id, org_id, decision_type, outcome, confidence, reasoning,
                   embedding, outcome_embedding, quality_score, precedent_ref, valid_from, valid_to,
                   transaction_time, metadata
            from decisions
            where org_id = $1
              and valid_to is null
              and to_tsvector('english', outcome || ' ' || coalesce(reasoning, ''))
                  @@ plainto_tsquery('english', $2)
            order by ts_rank(
                to_tsvector('english', outcome || ' ' || coalesce(reasoning, '')),
                plainto_tsquery('english', $2)
            ) desc
            limit $3
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(query_text)
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(row_to_decision).collect()
    }

    /// `GetDecisionsByIDs`: current revisions for the given ids, in
    /// whatever order Postgres returns them (callers re-sort if order
    /// matters, e.g. to match the order search scores came back in).
    pub async fn get_decisions_by_ids(&self, org_id: OrgId, ids: &[DecisionId]) -> Result<Vec<Decision>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let uuids: Vec<uuid::Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
        let rows = sqlx::query(
            r#"
            select id, run_id, agent_id, org_id, decision_type, outcome, confidence, reasoning,
                   embedding, outcome_embedding, quality_score, precedent_ref, valid_from, valid_to,
                   transaction_time, metadata
            from decisions
            where org_id = $1 and id = any($2) and valid_to is null
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(&uuids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(row_to_decision).collect()
    }

    /// Fetch one decision by id regardless of org, for the outbox worker —
    /// a backend task that drains mutations across every tenant, not a
    /// tenant-scoped caller. Returns `None` if the decision was hard-deleted
    /// (a race with the outbox row that referenced it).
    pub async fn get_decision_by_id(&self, decision_id: DecisionId) -> Result<Option<Decision>> {
        let row = sqlx::query(
            r#"
            select id, run_id, agent_id, org_id, decision_type, outcome, confidence, reasoning,
                   embedding, outcome_embedding, quality_score, precedent_ref, valid_from, valid_to,
                   transaction_time, metadata
            from decisions
            where id = $1 and valid_to is null
            "#,
        )
        .bind(decision_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(row_to_decision).transpose()
    }

    /// `QueryDecisionsTemporal(asOf)`: decisions visible at a point in
    /// transaction time, per the bi-temporal predicate in §4.3.
    pub async fn query_decisions_temporal(
        &self,
        org_id: OrgId,
        as_of: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Decision>> {
        let rows = sqlx::query(
            r#"
            select id, run_id, agent_id, org_id, decision_type, outcome, confidence, reasoning,
                   embedding, outcome_embedding, quality_score, precedent_ref, valid_from, valid_to,
                   transaction_time, metadata
            from decisions
            where org_id = $1
              and transaction_time <= $2
              and (valid_to is null or valid_to > $2)
            order by valid_from desc
            limit $3
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(as_of)
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(row_to_decision).collect()
    }
}

async fn insert_decision_tx(tx: &mut Transaction<'_, Postgres>, decision: &Decision) -> Result<()> {
    sqlx::query(
        r#"
        insert into decisions
            (id, run_id, agent_id, org_id, decision_type, outcome, confidence, reasoning,
             embedding, outcome_embedding, quality_score, precedent_ref, valid_from, valid_to,
             transaction_time, metadata)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
    )
    .bind(decision.id.as_uuid())
    .bind(decision.run_id.as_uuid())
    .bind(decision.agent_id.as_str())
    .bind(decision.org_id.as_uuid())
    .bind(&decision.decision_type)
    .bind(&decision.outcome)
    .bind(decision.confidence)
    .bind(&decision.reasoning)
    .bind(decision.embedding.as_ref().map(|v| v.as_slice()))
    .bind(decision.outcome_embedding.as_ref().map(|v| v.as_slice()))
    .bind(decision.quality_score)
    .bind(decision.precedent_ref.map(|id| id.as_uuid()))
    .bind(decision.valid_from)
    .bind(decision.valid_to)
    .bind(decision.transaction_time)
    .bind(&decision.metadata)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

async fn insert_alternative_tx(tx: &mut Transaction<'_, Postgres>, alt: &Alternative) -> Result<()> {
    sqlx::query(
        r#"
        insert into alternatives (id, decision_id, label, score, selected, rejection_reason)
        values ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(alt.id.as_uuid())
    .bind(alt.decision_id.as_uuid())
    .bind(&alt.label)
    .bind(alt.score)
    .bind(alt.selected)
    .bind(&alt.rejection_reason)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

async fn insert_evidence_tx(tx: &mut Transaction<'_, Postgres>, evidence: &Evidence) -> Result<()> {
    sqlx::query(
        r#"
        insert into evidence
            (id, decision_id, org_id, source_type, source_uri, content, relevance_score, embedding)
        values ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(evidence.id.as_uuid())
    .bind(evidence.decision_id.as_uuid())
    .bind(evidence.org_id.as_uuid())
    .bind(&evidence.source_type)
    .bind(&evidence.source_uri)
    .bind(&evidence.content)
    .bind(evidence.relevance_score)
    .bind(evidence.embedding.as_ref().map(|v| v.as_slice()))
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

async fn insert_event_tx(tx: &mut Transaction<'_, Postgres>, event: &AgentEvent) -> Result<()> {
    sqlx::query(
        r#"
        insert into agent_events
            (id, run_id, org_id, agent_id, event_type, sequence_num, occurred_at, payload, created_at)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(event.id.as_uuid())
    .bind(event.run_id.as_uuid())
    .bind(event.org_id.as_uuid())
    .bind(event.agent_id.as_str())
    .bind(&event.event_type)
    .bind(event.sequence_num)
    .bind(event.occurred_at)
    .bind(&event.payload)
    .bind(event.created_at)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

fn row_to_decision(row: sqlx::postgres::PgRow) -> Result<Decision> {
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
