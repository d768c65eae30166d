//! Search outbox (feeds component C6): enqueue on every decision write,
//! claim-batch/mark-sent/release-claim for the at-least-once drain worker.

use crate::retry::map_sqlx_error;
use crate::Storage;
use akashi_core::{DecisionId, OutboxOp, Result, SearchOutboxRow};
use sqlx::{Postgres, Row, Transaction};

/// Insert an `upsert` outbox row for `decision_id` inside the caller's
/// transaction. Part of the §4.4 "Trace algorithm" step 5 composition.
pub(crate) async fn enqueue_outbox_row_tx(
    tx: &mut Transaction<'_, Postgres>,
    decision_id: DecisionId,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into search_outbox (decision_id, op, created_at, attempts)
        values ($1, 'upsert', now(), 0)
        "#,
    )
    .bind(decision_id.as_uuid())
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

impl Storage {
    /// Atomically claim up to `batch_size` outbox rows for exclusive drain,
    /// oldest first. `FOR UPDATE SKIP LOCKED` keeps concurrent outbox
    /// workers from claiming the same row.
    pub async fn claim_outbox_batch(&self, batch_size: i64) -> Result<Vec<SearchOutboxRow>> {
        let rows = sqlx::query(
            r#"
            with to_claim as (
                select id
                from search_outbox
                order by id asc
                limit $1
                for update skip locked
            )
            select id, decision_id, op, created_at, attempts
            from search_outbox
            where id in (select id from to_claim)
            "#,
        )
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(row_to_outbox_row).collect()
    }

    /// Drop a row after its mutation landed in the ANN index.
    pub async fn mark_outbox_sent(&self, id: i64) -> Result<()> {
        sqlx::query("delete from search_outbox where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// A claimed row failed to apply: bump its attempts counter and leave
    /// it in the table for the next drain pass (never dropped, even past
    /// the deadletter threshold — an operator-facing queue is out of
    /// scope).
    pub async fn release_outbox_claim(&self, id: i64) -> Result<i32> {
        let row = sqlx::query(
            r#"
            update search_outbox
            set attempts = attempts + 1
            where id = $1
            returning attempts
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.try_get("attempts").map_err(map_sqlx_error)
    }
}

fn row_to_outbox_row(row: sqlx::postgres::PgRow) -> Result<SearchOutboxRow> {
    let op_str: String = row.try_get("op").map_err(map_sqlx_error)?;
    Ok(SearchOutboxRow {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        decision_id: DecisionId::from_uuid(row.try_get("decision_id").map_err(map_sqlx_error)?),
        op: parse_outbox_op(&op_str)?,
        created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
        attempts: row.try_get("attempts").map_err(map_sqlx_error)?,
    })
}

fn parse_outbox_op(s: &str) -> Result<OutboxOp> {
    match s {
        "upsert" => Ok(OutboxOp::Upsert),
        "delete" => Ok(OutboxOp::Delete),
        other => Err(akashi_core::Error::Corruption(format!(
            "unknown outbox op in storage row: {other:?}"
        ))),
    }
}
