//! Shared types for the decision-trace ingestion and query service: ids,
//! roles, the data model, claims, configuration, errors, and metrics.
//!
//! Every other `akashi-*` crate depends on this one and none of them
//! depend on each other's internals — cross-crate contracts live here.

pub mod claims;
pub mod config;
pub mod entities;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod role;

pub use claims::Claims;
pub use config::{BufferConfig, Config, EmbeddingConfig, EmbeddingProviderKind, WalConfig, WalSyncMode};
pub use entities::{
    AccessGrant, Agent, AgentEvent, AgentRun, Alternative, ConflictCategory, ConflictSeverity,
    ConflictStatus, Decision, DecisionClaim, DecisionConflict, Evidence, OutboxOp, RunStatus,
    SearchOutboxRow,
};
pub use error::{Error, Result};
pub use ids::{AgentId, AlternativeId, ConflictId, DecisionId, EvidenceId, EventId, OrgId, RunId};
pub use metrics::Metrics;
pub use role::Role;
