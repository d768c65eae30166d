//! Sentence-level `DecisionClaim` rows, written by the background claim
//! task (§4.4 step 7) and read back by the conflict scorer.

use crate::retry::map_sqlx_error;
use crate::Storage;
use akashi_core::{DecisionClaim, DecisionId, Result};
use sqlx::Row;

impl Storage {
    /// Bulk-insert the sentence-level claims generated for one decision.
    /// Small batches (one decision's worth of sentences), so a plain
    /// multi-row insert is used rather than `COPY`.
    pub async fn insert_claims(&self, claims: &[DecisionClaim]) -> Result<()> {
        if claims.is_empty() {
            return Ok(());
        }
        let mut builder: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new("insert into decision_claims (decision_id, claim_idx, claim_text, embedding) ");
        builder.push_values(claims, |mut row, claim| {
            row.push_bind(claim.decision_id.as_uuid())
                .push_bind(claim.claim_idx)
                .push_bind(&claim.claim_text)
                .push_bind(claim.embedding.as_slice());
        });

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Every claim for one decision, ordered by sentence position. Used by
    /// the conflict scorer to compare two decisions claim-by-claim.
    pub async fn get_claims_for_decision(&self, decision_id: DecisionId) -> Result<Vec<DecisionClaim>> {
        let rows = sqlx::query(
            r#"
            select decision_id, claim_idx, claim_text, embedding
            from decision_claims
            where decision_id = $1
            order by claim_idx asc
            "#,
        )
        .bind(decision_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| {
                Ok(DecisionClaim {
                    decision_id: DecisionId::from_uuid(row.try_get("decision_id").map_err(map_sqlx_error)?),
                    claim_idx: row.try_get("claim_idx").map_err(map_sqlx_error)?,
                    claim_text: row.try_get("claim_text").map_err(map_sqlx_error)?,
                    embedding: row.try_get("embedding").map_err(map_sqlx_error)?,
                })
            })
            .collect()
    }
}
