//! The decision-trace data model (specification §3).
//!
//! Storage representation is each downstream crate's choice; these are the
//! semantic, `serde`-transportable shapes every crate agrees on.

use crate::ids::{AgentId, AlternativeId, ConflictId, DecisionId, EvidenceId, EventId, OrgId, RunId};
use crate::role::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// An agent identity within an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: AgentId,
    pub org_id: OrgId,
    pub role: Role,
    pub tags: BTreeSet<String>,
    /// `base64(salt)$base64(hash)`, present only for agents that authenticate
    /// with an API key rather than a signed token.
    pub hashed_api_key: Option<String>,
}

/// Lifecycle status of an [`AgentRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// An execution context grouping decisions and events for one agent
/// activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: RunId,
    pub agent_id: AgentId,
    pub org_id: OrgId,
    pub trace_id: Option<String>,
    pub parent_run_id: Option<RunId>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

/// An append-only log record within a run.
///
/// **Invariant:** `sequence_num` is globally monotonic; gaps are permitted
/// (they indicate concurrency, not loss). Never updated or deleted while
/// hot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub id: EventId,
    pub run_id: RunId,
    pub org_id: OrgId,
    pub agent_id: AgentId,
    pub event_type: String,
    pub sequence_num: i64,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A single decision record, bi-temporal.
///
/// **Invariant:** `(id, transaction_time)` uniquely identifies a revision;
/// the current revision has `valid_to = None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: DecisionId,
    pub run_id: RunId,
    pub agent_id: AgentId,
    pub org_id: OrgId,
    pub decision_type: String,
    pub outcome: String,
    pub confidence: f64,
    pub reasoning: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub outcome_embedding: Option<Vec<f32>>,
    pub quality_score: f64,
    pub precedent_ref: Option<DecisionId>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub transaction_time: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl Decision {
    /// The eight standard decision types that contribute to the quality
    /// score (specification §4.4).
    pub const STANDARD_TYPES: [&'static str; 8] = [
        "model_selection",
        "architecture",
        "data_source",
        "error_handling",
        "feature_scope",
        "trade_off",
        "deployment",
        "security",
    ];

    /// Whether `decision_type` is one of the closed set of standard types.
    pub fn is_standard_type(decision_type: &str) -> bool {
        Self::STANDARD_TYPES.contains(&decision_type)
    }

    /// Whether this revision is the current one (`valid_to` unset).
    pub fn is_current(&self) -> bool {
        self.valid_to.is_none()
    }
}

/// One considered alternative for a [`Decision`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alternative {
    pub id: AlternativeId,
    pub decision_id: DecisionId,
    pub label: String,
    pub score: Option<f64>,
    pub selected: bool,
    pub rejection_reason: Option<String>,
}

/// A piece of evidence backing a [`Decision`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: EvidenceId,
    pub decision_id: DecisionId,
    pub org_id: OrgId,
    pub source_type: String,
    pub source_uri: Option<String>,
    pub content: String,
    pub relevance_score: Option<f64>,
    pub embedding: Option<Vec<f32>>,
}

/// A sentence-level split of a decision's outcome, used for fine-grained
/// conflict scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionClaim {
    pub decision_id: DecisionId,
    pub claim_idx: i32,
    pub claim_text: String,
    pub embedding: Vec<f32>,
}

/// A permission granted by one agent to another.
///
/// **Invariant:** grants never cross `org_id`. `resource_id = None` means a
/// wildcard over all resources of `resource_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub grantor_id: AgentId,
    pub grantee_id: AgentId,
    pub org_id: OrgId,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub permission: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessGrant {
    /// Whether this grant is currently valid (not expired).
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(exp) => exp > now,
            None => true,
        }
    }
}

/// Category of a pairwise disagreement between two decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictCategory {
    Factual,
    Assessment,
    Strategic,
    Temporal,
}

/// Severity of a [`DecisionConflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Status in the conflict resolution state machine:
/// `open -> acknowledged -> resolved | wont_fix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Open,
    Acknowledged,
    Resolved,
    WontFix,
}

impl ConflictStatus {
    /// Terminal states are hidden from precedent checks.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConflictStatus::Resolved | ConflictStatus::WontFix)
    }

    /// Whether `next` is a legal transition from `self`.
    pub fn can_transition_to(self, next: ConflictStatus) -> bool {
        use ConflictStatus::*;
        matches!(
            (self, next),
            (Open, Acknowledged) | (Open, Resolved) | (Open, WontFix) | (Acknowledged, Resolved) | (Acknowledged, WontFix)
        )
    }
}

/// A pairwise disagreement between two decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConflict {
    pub id: ConflictId,
    pub decision_a_id: DecisionId,
    pub decision_b_id: DecisionId,
    pub agent_a: AgentId,
    pub agent_b: AgentId,
    pub category: ConflictCategory,
    pub severity: ConflictSeverity,
    pub status: ConflictStatus,
    pub resolution_note: Option<String>,
    pub resolved_by: Option<AgentId>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// The operation a [`SearchOutboxRow`] requests against the ANN index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxOp {
    Upsert,
    Delete,
}

/// A transient row in the search outbox, drained by the outbox worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutboxRow {
    pub id: i64,
    pub decision_id: DecisionId,
    pub op: OutboxOp,
    pub created_at: DateTime<Utc>,
    pub attempts: i32,
}

impl SearchOutboxRow {
    /// Deadletter threshold decided in DESIGN.md's Open Question #2: rows
    /// past this many attempts are logged loudly but never dropped from the
    /// table (an operator-facing deadletter queue is out of scope).
    pub const DEADLETTER_THRESHOLD: i32 = 10;

    /// Whether this row has exceeded the deadletter threshold.
    pub fn is_deadletter(&self) -> bool {
        self.attempts >= Self::DEADLETTER_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_types_closed_set() {
        assert!(Decision::is_standard_type("architecture"));
        assert!(!Decision::is_standard_type("vibes"));
    }

    #[test]
    fn conflict_status_machine_rejects_resurrection() {
        assert!(ConflictStatus::Open.can_transition_to(ConflictStatus::Acknowledged));
        assert!(ConflictStatus::Acknowledged.can_transition_to(ConflictStatus::Resolved));
        assert!(!ConflictStatus::Resolved.can_transition_to(ConflictStatus::Open));
        assert!(!ConflictStatus::WontFix.can_transition_to(ConflictStatus::Acknowledged));
    }

    #[test]
    fn terminal_states_hidden_from_precedent() {
        assert!(ConflictStatus::Resolved.is_terminal());
        assert!(ConflictStatus::WontFix.is_terminal());
        assert!(!ConflictStatus::Open.is_terminal());
        assert!(!ConflictStatus::Acknowledged.is_terminal());
    }

    #[test]
    fn grant_expiry() {
        let now = Utc::now();
        let mut grant = AccessGrant {
            grantor_id: AgentId::from("a"),
            grantee_id: AgentId::from("b"),
            org_id: OrgId::new(),
            resource_type: "agent".into(),
            resource_id: None,
            permission: "read".into(),
            expires_at: Some(now - chrono::Duration::seconds(1)),
        };
        assert!(!grant.is_active(now));
        grant.expires_at = Some(now + chrono::Duration::seconds(60));
        assert!(grant.is_active(now));
        grant.expires_at = None;
        assert!(grant.is_active(now));
    }

    #[test]
    fn outbox_deadletter_threshold() {
        let mut row = SearchOutboxRow {
            id: 1,
            decision_id: DecisionId::new(),
            op: OutboxOp::Upsert,
            created_at: Utc::now(),
            attempts: 9,
        };
        assert!(!row.is_deadletter());
        row.attempts = 10;
        assert!(row.is_deadletter());
    }
}
