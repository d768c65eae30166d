//! # akashi
//!
//! Multi-tenant decision-trace ingestion and query service for AI-agent
//! fleets: agents record why they chose what they chose, other agents (and
//! humans) check precedent before acting, and disagreements between agents
//! surface as first-class conflicts instead of silent overwrites.
//!
//! This crate is the composition root. Every subsystem — WAL, ingest
//! buffer, storage, embedding, hybrid search, the outbox drain worker, the
//! notification broker, authorization, credential resolution, and the
//! trace service that ties them together — lives in its own `akashi-*`
//! crate with no dependency on this one. [`Akashi::open`] wires them into
//! one running process and [`Akashi::shutdown`] tears them down in the
//! order specification §5 requires.
//!
//! ```no_run
//! # async fn run() -> akashi::Result<()> {
//! let akashi = akashi::AkashiBuilder::new(akashi::Config::default())
//!     .pooled_url("postgres://localhost/akashi")
//!     .open()
//!     .await?;
//!
//! // ... serve requests via akashi.trace(), akashi.ingest(), ... ...
//!
//! akashi.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod authn;

pub use authn::StorageCredentials;

pub use akashi_auth::{is_bypass_route, TokenKeys, TokenRequest};
pub use akashi_core::config::Config;
pub use akashi_core::{Claims, Error, Result, Role};
pub use akashi_ingest::IngestBuffer;
pub use akashi_notify::NotifyBroker;
pub use akashi_outbox::OutboxWorker;
pub use akashi_search::{AnnIndexWriter, HybridSearcher, Searcher};
pub use akashi_storage::Storage;
pub use akashi_trace::{ConflictScorer, TraceService};
pub use akashi_wal::Wal;

use akashi_core::metrics::Metrics;
use akashi_embedding::{build_provider, EmbeddingProvider};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_OUTBOX_BATCH_SIZE: i64 = 100;
const DEFAULT_OUTBOX_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Fluent configuration for [`Akashi::open`], mirroring the teacher's
/// `DatabaseBuilder`: every external collaborator (a real embedding
/// provider, an ANN backend, an LLM-backed conflict scorer, a loaded
/// signing key) is optional and defaults to the in-process stand-in this
/// workspace carries for development and tests.
pub struct AkashiBuilder {
    config: Config,
    pooled_url: Option<String>,
    direct_connect_url: Option<String>,
    signing_key: Option<TokenKeys>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    ann: Option<Arc<dyn Searcher>>,
    ann_writer: Option<Arc<dyn AnnIndexWriter>>,
    conflict_scorer: Option<Arc<dyn ConflictScorer>>,
}

impl AkashiBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            pooled_url: None,
            direct_connect_url: None,
            signing_key: None,
            embedder: None,
            ann: None,
            ann_writer: None,
            conflict_scorer: None,
        }
    }

    /// Postgres URL for the pooled connection path (specification §4.9).
    /// Required for `open()`.
    pub fn pooled_url(mut self, url: impl Into<String>) -> Self {
        self.pooled_url = Some(url.into());
        self
    }

    /// Postgres URL for the direct long-lived connection C7 listens on.
    /// Absent by default, which disables the notify broker (specification
    /// §4.9) rather than failing startup.
    pub fn direct_connect_url(mut self, url: impl Into<String>) -> Self {
        self.direct_connect_url = Some(url.into());
        self
    }

    /// Signing key for C10 tokens. Defaults to a fresh in-memory keypair —
    /// fine for development, useless across a restart — with a startup log
    /// warning.
    pub fn signing_key(mut self, keys: TokenKeys) -> Self {
        self.signing_key = Some(keys);
        self
    }

    /// Override the embedding provider built from `config.embedding`.
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Wire a real ANN backend into the C5 search fallback chain's first
    /// leg. Absent by default, which means every search answers from the
    /// full-text fallback.
    pub fn ann(mut self, ann: Arc<dyn Searcher>) -> Self {
        self.ann = Some(ann);
        self
    }

    /// Wire the write side of the same ANN backend, starting the C6 outbox
    /// drain worker. Absent by default: outbox rows still get enqueued by
    /// every trace write, they just accumulate undrained until an index is
    /// configured.
    pub fn ann_writer(mut self, writer: Arc<dyn AnnIndexWriter>) -> Self {
        self.ann_writer = Some(writer);
        self
    }

    /// Wire an async conflict scorer for the post-write background pass
    /// (specification §4.4 step 7). Absent by default: conflicts are never
    /// raised automatically, only `DecisionConflict`s created through other
    /// means are served back.
    pub fn conflict_scorer(mut self, scorer: Arc<dyn ConflictScorer>) -> Self {
        self.conflict_scorer = Some(scorer);
        self
    }

    /// Connect, recover, and start every background task. Returns once the
    /// process is ready to accept traffic.
    pub async fn open(self) -> Result<Akashi> {
        self.config.validate()?;

        let pooled_url = self.pooled_url.ok_or_else(|| {
            Error::Fatal("AkashiBuilder::open() requires pooled_url".into())
        })?;
        let storage = Storage::connect(&pooled_url, self.direct_connect_url).await?;
        storage.ping().await?;

        let wal = Wal::open(&self.config.wal.dir, self.config.wal.clone())?;
        let metrics = Metrics::new();

        let embedder: Arc<dyn EmbeddingProvider> = match self.embedder {
            Some(e) => e,
            None => Arc::new(build_provider(&self.config.embedding)?),
        };

        let ingest = IngestBuffer::new(
            storage.clone(),
            wal.clone(),
            self.config.buffer.clone(),
            metrics.clone(),
        );
        ingest.start().await?;

        let mut searcher = HybridSearcher::new(storage.clone(), Arc::clone(&embedder));
        if self.config.searcher_enabled {
            if let Some(ann) = self.ann {
                searcher = searcher.with_ann(ann);
            }
        } else {
            tracing::info!("searcher disabled by configuration: every search answers from full text");
        }

        let notify = NotifyBroker::new(storage.clone());
        if self.config.notify_enabled {
            notify.start().await;
        } else {
            tracing::info!("notify broker disabled by configuration");
        }

        let outbox = self.ann_writer.map(|writer| {
            OutboxWorker::new(storage.clone(), writer, DEFAULT_OUTBOX_BATCH_SIZE, DEFAULT_OUTBOX_POLL_INTERVAL)
        });
        if let Some(outbox) = &outbox {
            outbox.start().await;
        } else {
            tracing::info!("no ann writer configured: outbox rows will accumulate undrained");
        }

        let mut trace = TraceService::new(
            storage.clone(),
            Arc::clone(&embedder),
            searcher.clone(),
            notify.clone(),
            metrics.clone(),
        );
        if let Some(scorer) = self.conflict_scorer {
            trace = trace.with_conflict_scorer(scorer);
        }

        let signing_key = self.signing_key.unwrap_or_else(|| {
            tracing::warn!("no token signing key configured, generating an in-memory dev keypair");
            TokenKeys::generate_dev()
        });

        Ok(Akashi {
            config: self.config,
            storage,
            wal,
            ingest,
            searcher,
            notify,
            outbox,
            trace,
            signing_key: Arc::new(signing_key),
            metrics,
        })
    }
}

/// The running process: every singleton named in specification §5, already
/// wired together. Cheap to clone (every field is itself `Clone` over
/// shared state), so a transport layer can hand a clone to each connection
/// handler.
#[derive(Clone)]
pub struct Akashi {
    config: Config,
    storage: Storage,
    wal: Wal,
    ingest: IngestBuffer,
    searcher: HybridSearcher,
    notify: NotifyBroker,
    outbox: Option<OutboxWorker>,
    trace: TraceService,
    signing_key: Arc<TokenKeys>,
    metrics: Metrics,
}

impl Akashi {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn ingest(&self) -> &IngestBuffer {
        &self.ingest
    }

    pub fn searcher(&self) -> &HybridSearcher {
        &self.searcher
    }

    pub fn notify(&self) -> &NotifyBroker {
        &self.notify
    }

    pub fn trace(&self) -> &TraceService {
        &self.trace
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Validate a presented API key into [`Claims`] (specification §4.10),
    /// adapting [`Storage`] into `akashi-auth`'s [`akashi_auth::CredentialSource`]
    /// seam.
    pub async fn authenticate_api_key(
        &self,
        org_id: akashi_core::OrgId,
        agent_id: &akashi_core::AgentId,
        presented_key: &str,
    ) -> Result<Claims> {
        let source = StorageCredentials(&self.storage);
        akashi_auth::resolve_api_key_claims(&source, org_id, agent_id, presented_key).await
    }

    /// Issue a signed token under this process's keypair, clamping the TTL
    /// for scoped tokens per `config.scoped_token_ttl_cap`.
    pub fn issue_token(&self, request: TokenRequest) -> Result<String> {
        akashi_auth::issue_token(
            &self.signing_key,
            request,
            self.config.token_ttl,
            self.config.scoped_token_ttl_cap,
        )
    }

    /// Validate a signed token string against this process's keypair.
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        akashi_auth::validate_token(&self.signing_key, token)
    }

    /// Tear everything down in the order specification §5 requires: broker
    /// close, buffer drain, storage close, WAL close. Consumes `self` since
    /// nothing is usable afterward.
    pub async fn shutdown(self) -> Result<()> {
        Shutdown {
            notify: self.notify,
            outbox: self.outbox,
            ingest: self.ingest,
            storage: self.storage,
            wal: self.wal,
            drain_timeout: DEFAULT_SHUTDOWN_DRAIN_TIMEOUT,
        }
        .run()
        .await
    }
}

/// The graceful-teardown sequence itself, split out from [`Akashi::shutdown`]
/// so the ordering is a named, testable thing rather than prose buried in a
/// method body — mirrors the teacher's explicit `DatabaseBuilder`/`shutdown`
/// split in `engine/src/database/{builder,mod}.rs`.
struct Shutdown {
    notify: NotifyBroker,
    outbox: Option<OutboxWorker>,
    ingest: IngestBuffer,
    storage: Storage,
    wal: Wal,
    drain_timeout: Duration,
}

impl Shutdown {
    async fn run(self) -> Result<()> {
        tracing::info!("shutdown: closing notify broker");
        self.notify.stop().await;

        if let Some(outbox) = &self.outbox {
            tracing::info!("shutdown: stopping outbox drain worker");
            outbox.stop().await;
        }

        tracing::info!("shutdown: draining ingest buffer");
        self.ingest.drain(self.drain_timeout).await?;

        tracing::info!("shutdown: closing storage pool");
        self.storage.close().await;

        tracing::info!("shutdown: closing wal");
        self.wal.close()?;

        Ok(())
    }
}
