//! Hybrid ANN/text search fallback chain (C5) and quality/recency
//! re-scoring.
//!
//! Grounded on `crates/search/src/hybrid.rs` (orchestrator-over-primitives
//! shape: a stateless struct holding references to the things it composes,
//! with one `search` entry point that tries its sources and fuses the
//! result) and `crates/search/src/fuser.rs` (score-fusion-then-truncate
//! pattern), generalized from "fuse N primitives" to "fall through an
//! ordered chain, first non-empty wins".

mod rescore;

pub use rescore::{ReScoreWeights, ReScorer};

use akashi_core::{Decision, DecisionId, OrgId, Result};
use akashi_embedding::EmbeddingProvider;
use akashi_storage::Storage;
use std::sync::Arc;

/// One hit from the ANN backend: a decision id plus a raw similarity score
/// in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct AnnHit {
    pub decision_id: DecisionId,
    pub score: f64,
}

/// Free-text filters applied by an ANN search, kept deliberately small:
/// ANN backends vary widely in what they can push down, so this only
/// carries what every fallback leg can honor.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub decision_type: Option<String>,
    pub agent_id: Option<String>,
}

/// External ANN index contract (specification §6). Implementations are
/// external collaborators; this crate only defines the seam and the noop/
/// text-only fallback behavior when none is configured or it's unhealthy.
pub trait Searcher: Send + Sync {
    fn search(
        &self,
        org_id: OrgId,
        embedding: &[f32],
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<AnnHit>>;

    /// Cheap liveness check; `false` skips straight to the text fallback.
    fn healthy(&self) -> bool;
}

/// The write side of the ANN index: what `akashi-outbox` drains outbox rows
/// into. Kept separate from [`Searcher`] since a deployment's write and read
/// paths to the index are often different clients (e.g. a batch upsert API
/// versus a query API).
pub trait AnnIndexWriter: Send + Sync {
    /// Idempotent upsert keyed by `decision.id` (specification §4.6).
    fn upsert(&self, decision: &Decision) -> Result<()>;

    /// Idempotent delete; deleting an id that isn't present is not an error.
    fn delete(&self, decision_id: DecisionId) -> Result<()>;
}

/// Which backend actually answered a `search` call — the "observability
/// header naming the backend actually used" from specification §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBackend {
    Ann,
    FullText,
    Empty,
}

/// One ranked, hydrated search result.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub decision: Decision,
    pub raw_score: f64,
    pub final_score: f64,
}

/// Orchestrates the ANN-then-text fallback chain and the post-hoc
/// re-scoring pass. Stateless beyond its collaborators, so cheap to clone.
#[derive(Clone)]
pub struct HybridSearcher {
    storage: Storage,
    embedder: Arc<dyn EmbeddingProvider>,
    ann: Option<Arc<dyn Searcher>>,
    rescorer: ReScorer,
}

impl HybridSearcher {
    pub fn new(storage: Storage, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            storage,
            embedder,
            ann: None,
            rescorer: ReScorer::default(),
        }
    }

    pub fn with_ann(mut self, ann: Arc<dyn Searcher>) -> Self {
        self.ann = Some(ann);
        self
    }

    pub fn with_rescore_weights(mut self, weights: ReScoreWeights) -> Self {
        self.rescorer = ReScorer::new(weights);
        self
    }

    /// `SemanticSearchAvailable`: whether a healthy ANN backend is
    /// configured at all, independent of any particular query's outcome.
    pub fn semantic_search_available(&self) -> bool {
        self.ann.as_ref().map(|ann| ann.healthy()).unwrap_or(false)
    }

    /// Run the fallback chain and return the final re-scored, hydrated
    /// list, truncated to `limit`.
    ///
    /// `want_semantic` is the caller's request to try the ANN leg at all;
    /// even when true, the chain still requires a configured, healthy
    /// `Searcher` and a non-zero query embedding before it's attempted.
    pub async fn search(
        &self,
        org_id: OrgId,
        query_text: &str,
        filters: &SearchFilters,
        want_semantic: bool,
        limit: usize,
    ) -> Result<(Vec<SearchResult>, SearchBackend)> {
        if let Some((decisions, scores)) = self.try_ann(org_id, query_text, filters, want_semantic, limit).await? {
            if !decisions.is_empty() {
                return Ok((self.rescorer.rescore(decisions, scores, limit), SearchBackend::Ann));
            }
        }

        let text_hits = self
            .storage
            .search_decisions_by_text(org_id, query_text, limit as i64)
            .await?;
        if text_hits.is_empty() {
            return Ok((Vec::new(), SearchBackend::Empty));
        }
        let scores: std::collections::HashMap<DecisionId, f64> =
            text_hits.iter().map(|d| (d.id, 1.0)).collect();
        Ok((self.rescorer.rescore(text_hits, scores, limit), SearchBackend::FullText))
    }

    /// Step 1-2 of the fallback chain: embed, call the ANN backend, hydrate
    /// by id. Returns `None` (not an error) for every condition the chain
    /// treats as "fall through": no searcher configured, unhealthy, zero
    /// embedding, an ANN-side error, or an empty result set.
    async fn try_ann(
        &self,
        org_id: OrgId,
        query_text: &str,
        filters: &SearchFilters,
        want_semantic: bool,
        limit: usize,
    ) -> Result<Option<(Vec<Decision>, std::collections::HashMap<DecisionId, f64>)>> {
        if !want_semantic {
            return Ok(None);
        }
        let Some(ann) = &self.ann else { return Ok(None) };
        if !ann.healthy() {
            return Ok(None);
        }

        let embedding = match self.embedder.embed(query_text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, falling back to text search");
                return Ok(None);
            }
        };
        if embedding.iter().all(|x| *x == 0.0) {
            return Ok(None);
        }

        let hits = match ann.search(org_id, &embedding, filters, limit) {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "ann search failed, falling back to text search");
                return Ok(None);
            }
        };
        if hits.is_empty() {
            return Ok(None);
        }

        let ids: Vec<DecisionId> = hits.iter().map(|h| h.decision_id).collect();
        let decisions = self.storage.get_decisions_by_ids(org_id, &ids).await?;
        let scores: std::collections::HashMap<DecisionId, f64> =
            hits.into_iter().map(|h| (h.decision_id, h.score)).collect();
        Ok(Some((decisions, scores)))
    }
}
