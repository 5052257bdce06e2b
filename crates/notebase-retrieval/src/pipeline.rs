//! End-to-end query pipeline orchestration.
//!
//! Stage order: access check → session lock → memory read → query embed →
//! retrieve → rerank → synthesize → memory append. Each stage is timed for
//! the response metadata, and the whole run sits under one timeout; a timed
//! out request discards any partial output.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};
use uuid::Uuid;

use notebase_core::config::{RetrievalConfig, SessionConfig};
use notebase_core::{
    Candidate, EmbeddingBackend, Error, ModelResolver, NotebookRepository, QueryMetadata,
    QueryRequest, QueryResponse, QueryTimings, Result, Tokenizer,
};

use crate::memory::{MemoryWindow, SessionMemory};
use crate::rerank::Reranker;
use crate::retriever::Retriever;
use crate::synthesis::{assemble_prompt, Synthesizer};

/// Pipeline tunables.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub retrieval: RetrievalConfig,
    pub session: SessionConfig,
}

/// The query pipeline. One instance serves all requests concurrently.
pub struct QueryPipeline {
    notebooks: Arc<dyn NotebookRepository>,
    retriever: Retriever,
    memory: SessionMemory,
    embed: Arc<dyn EmbeddingBackend>,
    resolver: Arc<dyn ModelResolver>,
    tokenizer: Arc<dyn Tokenizer>,
    synthesizer: Synthesizer,
    config: RetrievalConfig,
}

impl QueryPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        notebooks: Arc<dyn NotebookRepository>,
        retriever: Retriever,
        sessions: Arc<dyn notebase_core::SessionRepository>,
        embed: Arc<dyn EmbeddingBackend>,
        resolver: Arc<dyn ModelResolver>,
        tokenizer: Arc<dyn Tokenizer>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            notebooks,
            retriever,
            memory: SessionMemory::new(sessions, config.session.clone()),
            embed,
            resolver,
            tokenizer,
            synthesizer: Synthesizer::new(),
            config: config.retrieval,
        }
    }

    /// Override the synthesizer (tests shorten the retry backoff).
    pub fn with_synthesizer(mut self, synthesizer: Synthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    /// Execute a query for an authenticated user.
    pub async fn execute(&self, mut request: QueryRequest, user_id: Uuid) -> Result<QueryResponse> {
        request.validate()?;
        let started = Instant::now();
        let timeout = Duration::from_secs(self.config.query_timeout_secs);

        match tokio::time::timeout(timeout, self.run(request, user_id, started)).await {
            Ok(result) => result,
            Err(_) => {
                info!(
                    subsystem = "retrieval",
                    component = "pipeline",
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Query timed out, partial output discarded"
                );
                Err(Error::Timeout(self.config.query_timeout_secs))
            }
        }
    }

    async fn run(
        &self,
        request: QueryRequest,
        user_id: Uuid,
        started: Instant,
    ) -> Result<QueryResponse> {
        // Fail closed: an invisible notebook and a missing notebook are the
        // same answer.
        let access = self
            .notebooks
            .access_level(request.notebook_id, user_id)
            .await?;
        if access.is_none() {
            return Err(Error::NotebookNotFound(request.notebook_id));
        }

        // Turns on one session run strictly in arrival order; the lock is
        // held for the rest of the turn by design.
        let session_lock = request.session_id.map(|id| self.memory.lock_for(id));
        let _session_guard = match &session_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let window = match request.session_id {
            Some(session_id) => {
                self.memory
                    .read(
                        session_id,
                        request.notebook_id,
                        user_id,
                        request.max_history,
                    )
                    .await?
            }
            None => MemoryWindow::default(),
        };

        let mut timings = QueryTimings::default();

        // Embed the query
        let stage = Instant::now();
        let query_vec = self
            .embed
            .embed_texts(std::slice::from_ref(&request.query))
            .await?
            .pop()
            .ok_or_else(|| Error::Embedding("no query embedding returned".to_string()))?;
        timings.embed_ms = stage.elapsed().as_millis() as u64;

        // Retrieve
        let stage = Instant::now();
        let candidates = self
            .retriever
            .retrieve(
                request.notebook_id,
                &query_vec,
                request.top_k,
                !request.skip_raptor,
            )
            .await?;
        timings.retrieval_ms = stage.elapsed().as_millis() as u64;

        // Rerank
        let stage = Instant::now();
        let judge = if request.reranker_enabled {
            Some(self.resolver.resolve(
                request.reranker_model.as_deref().or(request.model.as_deref()),
            )?)
        } else {
            None
        };
        let outcome = Reranker::rerank(
            judge.as_deref(),
            &request.query,
            candidates,
            request.max_sources,
        )
        .await;
        timings.rerank_ms = stage.elapsed().as_millis() as u64;

        // Synthesize
        let stage = Instant::now();
        let backend = self.resolver.resolve(request.model.as_deref())?;
        let assembled = assemble_prompt(
            &request.query,
            &outcome.candidates,
            &window.turns,
            self.tokenizer.as_ref(),
            self.config.context_token_budget,
        );
        let answer = self
            .synthesizer
            .synthesize(backend.as_ref(), &assembled)
            .await?;
        timings.synthesis_ms = stage.elapsed().as_millis() as u64;

        // Record the turn. Expired sessions stay frozen: the client was told
        // and should mint a fresh session id.
        if let Some(session_id) = request.session_id {
            if !window.expired {
                self.memory
                    .append(session_id, &request.query, &answer, &assembled.included_sources)
                    .await?;
            }
        }

        let sources = if request.include_sources {
            outcome
                .candidates
                .iter()
                .map(Candidate::to_source)
                .collect()
        } else {
            vec![]
        };

        let stateless = request.session_id.is_none() || window.expired;
        let response = QueryResponse {
            response: answer,
            sources,
            metadata: QueryMetadata {
                execution_time_ms: started.elapsed().as_millis() as u64,
                model: backend.model_name().to_string(),
                stateless,
                node_count: outcome.candidates.len(),
                history_messages_used: assembled.history_used,
                session_expired: window.expired,
                timings,
            },
        };

        debug!(
            subsystem = "retrieval",
            component = "pipeline",
            op = "query",
            notebook_id = %request.notebook_id,
            result_count = response.sources.len(),
            stateless,
            duration_ms = response.metadata.execution_time_ms,
            "Query complete"
        );
        Ok(response)
    }
}
