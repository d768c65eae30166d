//! Step 7 of the trace algorithm (specification §4.4): the supervised
//! background task that generates sentence-level claims and then invokes
//! conflict scoring, neither of which the caller waits on.
//!
//! Grounded on the teacher's supervised-background-task shape
//! (`engine/src/background.rs`'s panic-contained worker loop), adapted from
//! sync `catch_unwind` to `tokio::spawn`'s own panic isolation: a panic
//! inside a spawned task turns its `JoinHandle` into `Err` rather than
//! taking down the process, so the outer task here only needs to join and
//! log rather than hand-roll unwind catching.

use crate::claims;
use akashi_core::{DecisionId, OrgId, Result};
use akashi_embedding::EmbeddingProvider;
use akashi_storage::Storage;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

const CLAIMS_TIMEOUT: Duration = Duration::from_secs(60);
const SCORER_TIMEOUT: Duration = Duration::from_secs(30);

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// External collaborator contract (specification §6): scores a freshly
/// traced decision against its precedents and inserts any conflicts it
/// finds. Fire-and-forget from `TraceService`'s perspective — the LLM-based
/// (or otherwise) implementation owns its own conflict-insertion and
/// notification.
pub trait ConflictScorer: Send + Sync {
    fn score_for_decision<'a>(&'a self, decision_id: DecisionId, org_id: OrgId) -> BoxFuture<'a, ()>;
}

/// Spawn the claims-then-scoring background task. Never awaited by the
/// caller; both legs run under their own timeout and a panic in either
/// leg is logged, not propagated.
pub fn spawn_claims_and_scoring(
    storage: Storage,
    embedder: Arc<dyn EmbeddingProvider>,
    scorer: Option<Arc<dyn ConflictScorer>>,
    decision_id: DecisionId,
    org_id: OrgId,
    outcome: String,
) {
    tokio::spawn(async move {
        let handle = tokio::spawn(run(storage, embedder, scorer, decision_id, org_id, outcome));
        if let Err(join_err) = handle.await {
            tracing::error!(
                %decision_id,
                panicked = join_err.is_panic(),
                "background claims/conflict-scoring task failed"
            );
        }
    });
}

async fn run(
    storage: Storage,
    embedder: Arc<dyn EmbeddingProvider>,
    scorer: Option<Arc<dyn ConflictScorer>>,
    decision_id: DecisionId,
    org_id: OrgId,
    outcome: String,
) {
    match tokio::time::timeout(CLAIMS_TIMEOUT, generate_and_store_claims(&storage, embedder.as_ref(), decision_id, &outcome)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(%decision_id, error = %e, "claim generation failed"),
        Err(_) => tracing::warn!(%decision_id, "claim generation timed out after 60s"),
    }

    let Some(scorer) = scorer else { return };
    match tokio::time::timeout(SCORER_TIMEOUT, scorer.score_for_decision(decision_id, org_id)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(%decision_id, error = %e, "conflict scoring failed"),
        Err(_) => tracing::warn!(%decision_id, "conflict scoring timed out after 30s"),
    }
}

async fn generate_and_store_claims(
    storage: &Storage,
    embedder: &dyn EmbeddingProvider,
    decision_id: DecisionId,
    outcome: &str,
) -> Result<()> {
    let claims = claims::build_claims(decision_id, outcome, embedder)?;
    storage.insert_claims(&claims).await
}
