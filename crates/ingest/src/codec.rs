//! WAL payload encoding for buffered events. The WAL itself is opaque to
//! payload contents (`akashi_wal::format::WalRecord`); this is the one place
//! that decides `AgentEvent` <-> bytes.

use akashi_core::{AgentEvent, Error, Result};

/// Encode one event as a WAL record payload.
pub fn encode(event: &AgentEvent) -> Result<Vec<u8>> {
    serde_json::to_vec(event).map_err(|e| Error::Validation(format!("event does not serialize: {e}")))
}

/// Decode a WAL record payload back into an event. A `Corruption` error
/// here (rather than `Validation`) since it only ever runs against bytes we
/// ourselves wrote to disk.
pub fn decode(bytes: &[u8]) -> Result<AgentEvent> {
    serde_json::from_slice(bytes).map_err(|e| Error::Corruption(format!("bad WAL event payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use akashi_core::{AgentId, EventId, OrgId, RunId};
    use chrono::Utc;

    #[test]
    fn round_trips_through_bytes() {
        let event = AgentEvent {
            id: EventId::new(),
            run_id: RunId::new(),
            org_id: OrgId::new(),
            agent_id: AgentId::from("agent-1"),
            event_type: "decision.traced".into(),
            sequence_num: 3,
            occurred_at: Utc::now(),
            payload: serde_json::json!({"a": 1}),
            created_at: Utc::now(),
        };
        let bytes = encode(&event).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.id, event.id);
        assert_eq!(decoded.sequence_num, event.sequence_num);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode(b"not json").is_err());
    }
}
