//! `EventStore` (component C3): append-only `AgentEvent` writes and reads.
//!
//! Primary insertion uses a protocol-level `COPY FROM STDIN`, per the
//! storage invariant that bulk insertion never goes through per-row
//! `INSERT`. The recovery path (`insert_events_idempotent`) can't use `COPY`
//! — Postgres has no `COPY ... ON CONFLICT` — so it falls back to a
//! multi-row `INSERT ... ON CONFLICT DO NOTHING`, acceptable since replay
//! batches are small compared to steady-state ingest flushes.

use crate::retry::map_sqlx_error;
use crate::Storage;
use akashi_core::{AgentEvent, AgentId, OrgId, Result, RunId};
use sqlx::Row;
use std::fmt::Write as _;

impl Storage {
    /// Bulk-insert `events` via `COPY FROM STDIN`. Callers are responsible
    /// for ensuring primary keys are fresh; a conflicting key aborts the
    /// whole copy (Postgres has no partial-success COPY).
    pub async fn insert_events(&self, events: &[AgentEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        let mut copy_in = conn
            .copy_in_raw(
                "COPY agent_events \
                 (id, run_id, org_id, agent_id, event_type, sequence_num, occurred_at, payload, created_at) \
                 FROM STDIN WITH (FORMAT csv)",
            )
            .await
            .map_err(map_sqlx_error)?;

        let mut buf = String::new();
        for event in events {
            write_event_csv_row(&mut buf, event);
        }
        copy_in.send(buf.into_bytes()).await.map_err(map_sqlx_error)?;
        copy_in.finish().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Idempotent variant for WAL replay at startup: tolerates events whose
    /// primary key already made it into the store before the crash.
    pub async fn insert_events_idempotent(&self, events: &[AgentEvent]) -> Result<u64> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut builder: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(
            "insert into agent_events \
             (id, run_id, org_id, agent_id, event_type, sequence_num, occurred_at, payload, created_at) ",
        );
        builder.push_values(events, |mut row, event| {
            row.push_bind(event.id.as_uuid())
                .push_bind(event.run_id.as_uuid())
                .push_bind(event.org_id.as_uuid())
                .push_bind(event.agent_id.as_str())
                .push_bind(&event.event_type)
                .push_bind(event.sequence_num)
                .push_bind(event.occurred_at)
                .push_bind(&event.payload)
                .push_bind(event.created_at);
        });
        builder.push(" on conflict (id, occurred_at) do nothing");

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    /// `ReserveSequenceNums(n)`: `n` strictly increasing, globally unique
    /// sequence numbers from the shared `event_sequence_num` sequence.
    /// Gaps are expected and allowed (specification §4.2) when a caller
    /// reserves numbers and then fails before writing them.
    pub async fn reserve_sequence_nums(&self, n: u32) -> Result<Vec<i64>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("select nextval('event_sequence_num') from generate_series(1, $1)")
            .bind(n as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| row.try_get::<i64, _>(0).map_err(map_sqlx_error))
            .collect()
    }

    /// `GetEventsByRun(org, run, sinceSeq)`: events for one run, ordered by
    /// sequence number, strictly after `since_seq`.
    pub async fn get_events_by_run(
        &self,
        org_id: OrgId,
        run_id: RunId,
        since_seq: i64,
    ) -> Result<Vec<AgentEvent>> {
        let rows = sqlx::query(
            r#"
            select id, run_id, org_id, agent_id, event_type, sequence_num,
                   occurred_at, payload, created_at
            from agent_events
            where org_id = $1 and run_id = $2 and sequence_num > $3
            order by sequence_num asc
            "#,
        )
        .bind(org_id.as_uuid())
        .bind(run_id.as_uuid())
        .bind(since_seq)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(row_to_event).collect()
    }
}

fn row_to_event(row: sqlx::postgres::PgRow) -> Result<AgentEvent> {
    use akashi_core::EventId;
    Ok(AgentEvent {
        id: EventId::from_uuid(row.try_get("id").map_err(map_sqlx_error)?),
        run_id: RunId::from_uuid(row.try_get("run_id").map_err(map_sqlx_error)?),
        org_id: OrgId::from_uuid(row.try_get("org_id").map_err(map_sqlx_error)?),
        agent_id: AgentId::new(row.try_get::<String, _>("agent_id").map_err(map_sqlx_error)?),
        event_type: row.try_get("event_type").map_err(map_sqlx_error)?,
        sequence_num: row.try_get("sequence_num").map_err(map_sqlx_error)?,
        occurred_at: row.try_get("occurred_at").map_err(map_sqlx_error)?,
        payload: row.try_get("payload").map_err(map_sqlx_error)?,
        created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
    })
}

/// Append one CSV row for `event` to `buf`. Every field is quoted; the only
/// field that can itself contain a quote or comma is the JSON payload, so
/// quotes are doubled per RFC 4180.
fn write_event_csv_row(buf: &mut String, event: &AgentEvent) {
    csv_field(buf, &event.id.as_uuid().to_string());
    buf.push(',');
    csv_field(buf, &event.run_id.as_uuid().to_string());
    buf.push(',');
    csv_field(buf, &event.org_id.as_uuid().to_string());
    buf.push(',');
    csv_field(buf, event.agent_id.as_str());
    buf.push(',');
    csv_field(buf, &event.event_type);
    buf.push(',');
    let _ = write!(buf, "{}", event.sequence_num);
    buf.push(',');
    csv_field(buf, &event.occurred_at.to_rfc3339());
    buf.push(',');
    csv_field(buf, &event.payload.to_string());
    buf.push(',');
    csv_field(buf, &event.created_at.to_rfc3339());
    buf.push('\n');
}

fn csv_field(buf: &mut String, value: &str) {
    buf.push('"');
    for ch in value.chars() {
        if ch == '"' {
            buf.push('"');
        }
        buf.push(ch);
    }
    buf.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use akashi_core::{AgentId, EventId};
    use chrono::Utc;

    #[test]
    fn csv_row_quotes_and_escapes_json_payload() {
        let event = AgentEvent {
            id: EventId::new(),
            run_id: RunId::new(),
            org_id: OrgId::new(),
            agent_id: AgentId::from("agent-1"),
            event_type: "decision.traced".into(),
            sequence_num: 7,
            occurred_at: Utc::now(),
            payload: serde_json::json!({"key": "has \"quotes\", and commas"}),
            created_at: Utc::now(),
        };
        let mut buf = String::new();
        write_event_csv_row(&mut buf, &event);
        assert!(buf.contains("\"\"quotes\"\""));
        assert!(buf.ends_with('\n'));
    }
}
