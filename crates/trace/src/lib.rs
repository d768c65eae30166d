//! `TraceService` (component C4): the write path that turns one recorded
//! decision into a durable, searchable, conflict-checked record, and the
//! read paths (`Check`, `Search`, `Query`, `Recent`, backfills) that sit on
//! top of the same storage.
//!
//! Grounded loosely on the teacher's facade-over-collaborators shape
//! (`crates/executor/src/api/*.rs`: a struct holding everything it
//! composes, one method per contract operation, doc comments on the public
//! surface), generalized from "forward a `Command` to an in-process
//! executor" to "orchestrate storage, an embedding provider, the hybrid
//! searcher, and the notify broker directly", since this crate has no
//! command/executor layer of its own to forward through.

mod authz;
mod background;
mod claims;
mod quality;

pub use background::ConflictScorer;

use akashi_authz::AuthzService;
use akashi_core::{
    Agent, AgentEvent, AgentId, AgentRun, Alternative, Claims, Decision, DecisionConflict, DecisionId,
    Error, Evidence, OrgId, Result, Role, RunId, RunStatus,
};
use akashi_core::metrics::Metrics;
use akashi_embedding::EmbeddingProvider;
use akashi_notify::{NotifyBroker, Topic};
use akashi_search::{HybridSearcher, SearchBackend, SearchFilters, SearchResult};
use akashi_storage::decisions::{DecisionQuery, DecisionTraceWrite, RunWrite};
use akashi_storage::Storage;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// One considered-but-maybe-not-chosen alternative, as supplied to `Trace`.
#[derive(Debug, Clone)]
pub struct AlternativeInput {
    pub label: String,
    pub score: Option<f64>,
    pub selected: bool,
    pub rejection_reason: Option<String>,
}

/// One piece of supporting evidence, as supplied to `Trace`.
#[derive(Debug, Clone)]
pub struct EvidenceInput {
    pub source_type: String,
    pub source_uri: Option<String>,
    pub content: String,
    pub relevance_score: Option<f64>,
}

/// Everything one `Trace` call records. `run_id` names an existing run to
/// append to; `None` starts a new one scoped to `trace_id`/`parent_run_id`.
#[derive(Debug, Clone)]
pub struct TraceInput {
    pub run_id: Option<RunId>,
    pub trace_id: Option<String>,
    pub parent_run_id: Option<RunId>,
    pub agent_id: AgentId,
    pub decision_type: String,
    pub outcome: String,
    pub confidence: f64,
    pub reasoning: Option<String>,
    pub alternatives: Vec<AlternativeInput>,
    pub evidence: Vec<EvidenceInput>,
    pub metadata: serde_json::Value,
}

/// `Check`'s response: precedent decisions plus any live (non-terminal)
/// conflicts touching them.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub has_precedent: bool,
    pub precedents: Vec<Decision>,
    pub conflicts: Vec<DecisionConflict>,
}

/// The C4 trace/query/backfill facade. Cheap to clone — every field is
/// either `Clone`-cheap itself (`Storage`, `HybridSearcher`, `NotifyBroker`
/// are all `Arc`-backed handles) or an `Arc` directly.
#[derive(Clone)]
pub struct TraceService {
    storage: Storage,
    embedder: Arc<dyn EmbeddingProvider>,
    searcher: HybridSearcher,
    notify: NotifyBroker,
    conflict_scorer: Option<Arc<dyn ConflictScorer>>,
    metrics: Metrics,
    authz: Arc<AuthzService>,
}

impl TraceService {
    pub fn new(
        storage: Storage,
        embedder: Arc<dyn EmbeddingProvider>,
        searcher: HybridSearcher,
        notify: NotifyBroker,
        metrics: Metrics,
    ) -> Self {
        Self {
            storage,
            embedder,
            searcher,
            notify,
            conflict_scorer: None,
            metrics,
            authz: Arc::new(AuthzService::new()),
        }
    }

    pub fn with_conflict_scorer(mut self, scorer: Arc<dyn ConflictScorer>) -> Self {
        self.conflict_scorer = Some(scorer);
        self
    }

    /// `ResolveOrCreateAgent` (specification §4.4), delegated directly to
    /// storage: it already implements the auto-registration rule.
    pub async fn resolve_or_create_agent(&self, org_id: OrgId, agent_id: &AgentId, caller_role: Role) -> Result<Agent> {
        self.storage.resolve_or_create_agent(org_id, agent_id, caller_role).await
    }

    /// `SemanticSearchAvailable`.
    pub fn semantic_search_available(&self) -> bool {
        self.searcher.semantic_search_available()
    }

    /// The full trace algorithm (specification §4.4 steps 2-7; step 1,
    /// billing quota metering, is an external collaborator per §1 and is a
    /// no-op here).
    pub async fn trace(&self, org_id: OrgId, input: TraceInput) -> Result<(RunId, DecisionId, usize)> {
        let composed_text = compose_embedding_text(&input.decision_type, &input.outcome, input.reasoning.as_deref());
        let embedding = self.embed_non_fatal(&composed_text).await?;
        let outcome_embedding = self.embed_non_fatal(&input.outcome).await?;

        let quality = quality::score(&quality::QualityInputs {
            decision_type: &input.decision_type,
            outcome: &input.outcome,
            confidence: input.confidence,
            reasoning: input.reasoning.as_deref(),
            alternative_count: input.alternatives.len(),
            any_alternative_has_long_rejection_reason: input
                .alternatives
                .iter()
                .any(|a| quality::has_long_rejection_reason(a.rejection_reason.as_deref())),
            evidence_count: input.evidence.len(),
        });

        let now = Utc::now();
        let run = match input.run_id {
            Some(existing) => RunWrite::Existing(existing),
            None => RunWrite::New(AgentRun {
                id: RunId::new(),
                agent_id: input.agent_id.clone(),
                org_id,
                trace_id: input.trace_id.clone(),
                parent_run_id: input.parent_run_id,
                status: RunStatus::Running,
                started_at: now,
                completed_at: None,
                metadata: serde_json::json!({}),
            }),
        };
        let run_id_for_event = match &run {
            RunWrite::Existing(id) => *id,
            RunWrite::New(run) => run.id,
        };

        let decision_id = DecisionId::new();
        let decision = Decision {
            id: decision_id,
            run_id: run_id_for_event,
            agent_id: input.agent_id.clone(),
            org_id,
            decision_type: input.decision_type.clone(),
            outcome: input.outcome.clone(),
            confidence: input.confidence,
            reasoning: input.reasoning.clone(),
            embedding,
            outcome_embedding,
            quality_score: quality,
            precedent_ref: None,
            valid_from: now,
            valid_to: None,
            transaction_time: now,
            metadata: input.metadata.clone(),
        };

        let alternatives: Vec<Alternative> = input
            .alternatives
            .iter()
            .map(|alt| Alternative {
                id: akashi_core::AlternativeId::new(),
                decision_id,
                label: alt.label.clone(),
                score: alt.score,
                selected: alt.selected,
                rejection_reason: alt.rejection_reason.clone(),
            })
            .collect();

        let mut evidence = Vec::with_capacity(input.evidence.len());
        for ev in &input.evidence {
            let embedding = if ev.content.trim().is_empty() {
                None
            } else {
                self.embed_non_fatal(&ev.content).await?
            };
            evidence.push(Evidence {
                id: akashi_core::EvidenceId::new(),
                decision_id,
                org_id,
                source_type: ev.source_type.clone(),
                source_uri: ev.source_uri.clone(),
                content: ev.content.clone(),
                relevance_score: ev.relevance_score,
                embedding,
            });
        }

        // One run-event per item written (specification §4.4 step 5): the
        // decision itself, then each alternative, then each evidence row.
        // `event_count` in the returned tuple is exactly this count.
        let total_events = 1 + alternatives.len() + evidence.len();
        let sequence_nums = self.storage.reserve_sequence_nums(total_events as u32).await?;
        if sequence_nums.len() != total_events {
            return Err(Error::Corruption(format!(
                "ReserveSequenceNums({total_events}) returned {} sequence numbers",
                sequence_nums.len()
            )));
        }
        let mut seqs = sequence_nums.into_iter();
        let mut events = Vec::with_capacity(total_events);
        events.push(AgentEvent {
            id: akashi_core::EventId::new(),
            run_id: run_id_for_event,
            org_id,
            agent_id: input.agent_id.clone(),
            event_type: "decision.traced".to_string(),
            sequence_num: seqs.next().expect("reserved one sequence number per event"),
            occurred_at: now,
            payload: serde_json::json!({"decision_id": decision_id}),
            created_at: now,
        });
        for alt in &alternatives {
            events.push(AgentEvent {
                id: akashi_core::EventId::new(),
                run_id: run_id_for_event,
                org_id,
                agent_id: input.agent_id.clone(),
                event_type: "alternative.recorded".to_string(),
                sequence_num: seqs.next().expect("reserved one sequence number per event"),
                occurred_at: now,
                payload: serde_json::json!({"decision_id": decision_id, "alternative_id": alt.id}),
                created_at: now,
            });
        }
        for ev in &evidence {
            events.push(AgentEvent {
                id: akashi_core::EventId::new(),
                run_id: run_id_for_event,
                org_id,
                agent_id: input.agent_id.clone(),
                event_type: "evidence.recorded".to_string(),
                sequence_num: seqs.next().expect("reserved one sequence number per event"),
                occurred_at: now,
                payload: serde_json::json!({"decision_id": decision_id, "evidence_id": ev.id}),
                created_at: now,
            });
        }

        let write = DecisionTraceWrite { run, decision, alternatives, evidence, events };
        let (run_id, decision_id, event_count) = self.storage.write_decision_trace(&write).await?;

        if let Err(e) = self
            .notify
            .notify(
                Topic::Decisions,
                &serde_json::json!({
                    "decision_id": decision_id,
                    "agent_id": input.agent_id.as_str(),
                    "org_id": org_id,
                    "outcome": input.outcome,
                }),
            )
            .await
        {
            tracing::warn!(%decision_id, error = %e, "post-commit decision notification failed");
        }

        background::spawn_claims_and_scoring(
            self.storage.clone(),
            Arc::clone(&self.embedder),
            self.conflict_scorer.clone(),
            decision_id,
            org_id,
            input.outcome,
        );

        Ok((run_id, decision_id, event_count))
    }

    /// `Check(org, decision_type, query, agent_id, limit)`: precedent
    /// decisions plus their live (non-terminal) conflicts, both filtered to
    /// what `caller` may see (specification §4.8).
    pub async fn check(
        &self,
        caller: &Claims,
        org_id: OrgId,
        decision_type: Option<&str>,
        query: Option<&str>,
        agent_id: Option<&AgentId>,
        limit: i64,
    ) -> Result<CheckResult> {
        let precedents = match query {
            Some(text) if !text.trim().is_empty() => {
                let filters = SearchFilters {
                    decision_type: decision_type.map(str::to_string),
                    agent_id: agent_id.map(|a| a.as_str().to_string()),
                };
                let (results, _backend) = self.searcher.search(org_id, text, &filters, true, limit.max(1) as usize).await?;
                results.into_iter().map(|r| r.decision).collect()
            }
            _ => {
                self.storage
                    .query_decisions(
                        org_id,
                        &DecisionQuery { agent_id: agent_id.cloned(), decision_type: decision_type.map(str::to_string), limit },
                    )
                    .await?
            }
        };
        let precedents = self.filter_decisions(caller, precedents).await?;

        if precedents.is_empty() {
            return Ok(CheckResult { has_precedent: false, precedents, conflicts: Vec::new() });
        }

        let ids: Vec<DecisionId> = precedents.iter().map(|d| d.id).collect();
        let conflicts: Vec<DecisionConflict> = self
            .storage
            .list_conflicts_for_decisions(&ids)
            .await?
            .into_iter()
            .filter(|c| !c.status.is_terminal())
            .collect();
        let conflicts = self.authz.filter_conflicts(caller, conflicts, &authz::StorageGrants(&self.storage)).await?;

        Ok(CheckResult { has_precedent: true, precedents, conflicts })
    }

    /// `Search`, delegated to the hybrid searcher and then filtered to what
    /// `caller` may see.
    pub async fn search(
        &self,
        caller: &Claims,
        org_id: OrgId,
        query_text: &str,
        filters: &SearchFilters,
        want_semantic: bool,
        limit: usize,
    ) -> Result<(Vec<SearchResult>, SearchBackend)> {
        let (results, backend) = self.searcher.search(org_id, query_text, filters, want_semantic, limit).await?;
        let granted = self.authz.load_granted_set(caller, &authz::StorageGrants(&self.storage)).await?;
        let results = match granted {
            None => results,
            Some(set) => results.into_iter().filter(|r| set.contains(&r.decision.agent_id)).collect(),
        };
        Ok((results, backend))
    }

    /// `Query`, filtered to what `caller` may see.
    pub async fn query(&self, caller: &Claims, org_id: OrgId, query: &DecisionQuery) -> Result<Vec<Decision>> {
        let decisions = self.storage.query_decisions(org_id, query).await?;
        self.filter_decisions(caller, decisions).await
    }

    /// `QueryTemporal(asOf)`, filtered to what `caller` may see.
    pub async fn query_temporal(
        &self,
        caller: &Claims,
        org_id: OrgId,
        as_of: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Decision>> {
        let decisions = self.storage.query_decisions_temporal(org_id, as_of, limit).await?;
        self.filter_decisions(caller, decisions).await
    }

    /// `Recent`: the newest current-revision decisions, filtered to what
    /// `caller` may see.
    pub async fn recent(&self, caller: &Claims, org_id: OrgId, limit: i64) -> Result<Vec<Decision>> {
        let decisions = self
            .storage
            .query_decisions(org_id, &DecisionQuery { agent_id: None, decision_type: None, limit })
            .await?;
        self.filter_decisions(caller, decisions).await
    }

    async fn filter_decisions(&self, caller: &Claims, decisions: Vec<Decision>) -> Result<Vec<Decision>> {
        self.authz
            .filter_by_agent(caller, decisions, |d| &d.agent_id, &authz::StorageGrants(&self.storage))
            .await
    }

    /// `BackfillEmbeddings`: composed-text embeddings for decisions that
    /// don't have one yet. Returns how many were updated.
    pub async fn backfill_embeddings(&self, org_id: OrgId, batch_size: i64) -> Result<usize> {
        let decisions = self.storage.list_decisions_missing_embedding(org_id, batch_size).await?;
        let mut updated = 0;
        for decision in decisions {
            let text = compose_embedding_text(&decision.decision_type, &decision.outcome, decision.reasoning.as_deref());
            if let Some(embedding) = self.embed_non_fatal(&text).await? {
                self.storage.update_decision_embedding(decision.id, &embedding).await?;
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// `BackfillOutcomeEmbeddings`.
    pub async fn backfill_outcome_embeddings(&self, org_id: OrgId, batch_size: i64) -> Result<usize> {
        let decisions = self.storage.list_decisions_missing_outcome_embedding(org_id, batch_size).await?;
        let mut updated = 0;
        for decision in decisions {
            if let Some(embedding) = self.embed_non_fatal(&decision.outcome).await? {
                self.storage.update_decision_outcome_embedding(decision.id, &embedding).await?;
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// `BackfillClaims`.
    pub async fn backfill_claims(&self, org_id: OrgId, batch_size: i64) -> Result<usize> {
        let decisions = self.storage.list_decisions_missing_claims(org_id, batch_size).await?;
        let mut updated = 0;
        for decision in decisions {
            let rows = claims::build_claims(decision.id, &decision.outcome, self.embedder.as_ref())?;
            if !rows.is_empty() {
                self.storage.insert_claims(&rows).await?;
                updated += 1;
            }
        }
        Ok(updated)
    }

    /// Embed `text`, recording `embedding.duration`. A provider failure is
    /// non-fatal (returns `Ok(None)`) except when it's a dimension
    /// mismatch, which the provider itself reports as `Error::Fatal` and
    /// which this method propagates: that's a misconfiguration, not a
    /// per-call hiccup.
    async fn embed_non_fatal(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let embedder = Arc::clone(&self.embedder);
        let text = text.to_string();
        let started = std::time::Instant::now();
        let result = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| Error::Fatal(format!("embedding task panicked: {e}")))?;
        self.metrics.record_embedding_duration_ms(started.elapsed().as_millis() as u64);

        match result {
            Ok(vector) => Ok(Some(vector)),
            Err(err @ Error::Fatal(_)) => Err(err),
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed, proceeding without a vector");
                Ok(None)
            }
        }
    }
}

/// Compose the text embedded for a decision's main vector (specification
/// §4.4 step 2): `decision_type + ": " + outcome [+ " " + reasoning]`.
fn compose_embedding_text(decision_type: &str, outcome: &str, reasoning: Option<&str>) -> String {
    let mut text = format!("{decision_type}: {outcome}");
    if let Some(reasoning) = reasoning {
        if !reasoning.is_empty() {
            text.push(' ');
            text.push_str(reasoning);
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_embedding_text_without_reasoning() {
        assert_eq!(compose_embedding_text("architecture", "chose redis", None), "architecture: chose redis");
    }

    #[test]
    fn compose_embedding_text_with_reasoning() {
        assert_eq!(
            compose_embedding_text("architecture", "chose redis", Some("lower latency")),
            "architecture: chose redis lower latency"
        );
    }

    #[test]
    fn compose_embedding_text_skips_empty_reasoning() {
        assert_eq!(compose_embedding_text("architecture", "chose redis", Some("")), "architecture: chose redis");
    }
}
