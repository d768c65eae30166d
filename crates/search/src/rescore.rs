//! Re-scoring: blends raw similarity, decision quality, and recency into
//! one ranking (specification §4.5). Grounded on
//! `crates/search/src/scorer.rs`'s weighted-sum-then-sort shape.

use crate::SearchResult;
use akashi_core::{Decision, DecisionId};
use chrono::Utc;
use std::collections::HashMap;

/// Weights for the three re-scoring terms. Must sum to 1.0; the defaults
/// are a deployment choice recorded in this crate's owning ledger, not a
/// spec-mandated constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReScoreWeights {
    pub similarity: f64,
    pub quality: f64,
    pub recency: f64,
    /// Recency half-life-ish decay constant (days) in `exp(-age_days / tau)`.
    pub recency_tau_days: f64,
}

impl Default for ReScoreWeights {
    fn default() -> Self {
        Self {
            similarity: 0.5,
            quality: 0.3,
            recency: 0.2,
            recency_tau_days: 14.0,
        }
    }
}

/// Applies [`ReScoreWeights`] to a batch of hydrated decisions plus their
/// raw per-backend scores, producing the final sorted, truncated list.
#[derive(Debug, Clone, Default)]
pub struct ReScorer {
    weights: ReScoreWeights,
}

impl ReScorer {
    pub fn new(weights: ReScoreWeights) -> Self {
        Self { weights }
    }

    /// `final = w_s * similarity + w_q * quality + w_r * recency(age_days)`,
    /// sorted descending by `final` and truncated to `limit`. Decisions with
    /// no raw score entry (shouldn't happen — every hydrated decision came
    /// from a scored hit) are treated as similarity `0.0` rather than
    /// panicking.
    pub fn rescore(
        &self,
        decisions: Vec<Decision>,
        raw_scores: HashMap<DecisionId, f64>,
        limit: usize,
    ) -> Vec<SearchResult> {
        let now = Utc::now();
        let mut results: Vec<SearchResult> = decisions
            .into_iter()
            .map(|decision| {
                let raw_score = raw_scores.get(&decision.id).copied().unwrap_or(0.0);
                let age_days = (now - decision.transaction_time).num_seconds() as f64 / 86_400.0;
                let recency = (-age_days.max(0.0) / self.weights.recency_tau_days).exp();
                let final_score = self.weights.similarity * raw_score
                    + self.weights.quality * decision.quality_score
                    + self.weights.recency * recency;
                SearchResult { decision, raw_score, final_score }
            })
            .collect();

        results.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        results.truncate(limit);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use akashi_core::{AgentId, OrgId, RunId};
    use chrono::Duration;

    fn decision(quality_score: f64, age_days: i64) -> Decision {
        Decision {
            id: DecisionId::new(),
            run_id: RunId::new(),
            agent_id: AgentId::from("agent-1"),
            org_id: OrgId::new(),
            decision_type: "architecture".into(),
            outcome: "chose postgres".into(),
            confidence: 0.8,
            reasoning: None,
            embedding: None,
            outcome_embedding: None,
            quality_score,
            precedent_ref: None,
            valid_from: Utc::now() - Duration::days(age_days),
            valid_to: None,
            transaction_time: Utc::now() - Duration::days(age_days),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn higher_quality_and_fresher_wins_at_equal_similarity() {
        let d_good = decision(0.9, 1);
        let d_bad = decision(0.1, 365);
        let mut scores = HashMap::new();
        scores.insert(d_good.id, 0.5);
        scores.insert(d_bad.id, 0.5);

        let rescorer = ReScorer::default();
        let ranked = rescorer.rescore(vec![d_bad.clone(), d_good.clone()], scores, 10);
        assert_eq!(ranked[0].decision.id, d_good.id);
    }

    #[test]
    fn truncates_to_limit() {
        let decisions: Vec<Decision> = (0..5).map(|i| decision(0.5, i)).collect();
        let scores: HashMap<DecisionId, f64> = decisions.iter().map(|d| (d.id, 0.5)).collect();
        let ranked = ReScorer::default().rescore(decisions, scores, 2);
        assert_eq!(ranked.len(), 2);
    }

    #[test]
    fn default_weights_sum_to_one() {
        let w = ReScoreWeights::default();
        assert!((w.similarity + w.quality + w.recency - 1.0).abs() < 1e-9);
    }
}
