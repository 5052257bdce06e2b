//! Document ingestion: extract → chunk → embed → atomic store.
//!
//! Transient failures (embedding provider, database) retry with backoff up to
//! the job's retry budget; the document is marked `failed` only when the
//! budget is exhausted, and is never silently dropped. Permanent failures
//! (unsupported format, size limits) fail immediately. Visibility is
//! all-or-nothing: chunks and the `ready` flip commit together.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use notebase_core::config::IngestionConfig;
use notebase_core::{
    defaults, ChunkRepository, DocumentRepository, DocumentStatus, EmbeddingBackend, Error,
    JobRepository, JobType, NewChunk, Tokenizer,
};
use notebase_db::chunking::{ChunkerConfig, TextChunker, TokenWindowChunker};
use notebase_db::extraction::ExtractorRegistry;

use crate::handler::{JobContext, JobHandler, JobResult};

/// Handler for `ingest` jobs.
pub struct IngestHandler {
    documents: Arc<dyn DocumentRepository>,
    chunks: Arc<dyn ChunkRepository>,
    jobs: Arc<dyn JobRepository>,
    embed: Arc<dyn EmbeddingBackend>,
    tokenizer: Arc<dyn Tokenizer>,
    extractors: ExtractorRegistry,
    chunker: TokenWindowChunker,
    config: IngestionConfig,
    /// Queue a RAPTOR rebuild after successful ingestion.
    queue_raptor_build: bool,
}

impl IngestHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        chunks: Arc<dyn ChunkRepository>,
        jobs: Arc<dyn JobRepository>,
        embed: Arc<dyn EmbeddingBackend>,
        tokenizer: Arc<dyn Tokenizer>,
        config: IngestionConfig,
        queue_raptor_build: bool,
    ) -> Self {
        let chunker = TokenWindowChunker::new(ChunkerConfig {
            chunk_tokens: config.chunk_tokens,
            overlap_tokens: config.chunk_overlap_tokens,
            min_tokens: defaults::CHUNK_MIN_TOKENS,
        });
        Self {
            documents,
            chunks,
            jobs,
            embed,
            tokenizer,
            extractors: ExtractorRegistry::new(),
            chunker,
            config,
            queue_raptor_build,
        }
    }

    /// Permanent failure: record it on the document, fail the job.
    async fn fail_document(&self, document_id: Uuid, message: String) -> JobResult {
        if let Err(e) = self
            .documents
            .set_status(document_id, DocumentStatus::Failed, Some(&message))
            .await
        {
            warn!(
                document_id = %document_id,
                error = %e,
                "Failed to record document failure"
            );
        }
        JobResult::Failed(message)
    }

    /// Transient failure: retry while budget remains, else fail the document.
    async fn retry_or_fail(
        &self,
        ctx: &JobContext,
        document_id: Uuid,
        message: String,
    ) -> JobResult {
        if ctx.is_final_attempt() {
            self.fail_document(document_id, format!("retries exhausted: {}", message))
                .await
        } else {
            JobResult::Retry(message)
        }
    }

    async fn run(&self, ctx: &JobContext, document_id: Uuid) -> JobResult {
        let document = match self.documents.get(document_id).await {
            Ok(Some(document)) => document,
            Ok(None) => return JobResult::Failed(format!("document {} not found", document_id)),
            Err(e) => return self.retry_or_fail(ctx, document_id, e.to_string()).await,
        };

        if let Err(e) = self
            .documents
            .set_status(document_id, DocumentStatus::Processing, None)
            .await
        {
            return self.retry_or_fail(ctx, document_id, e.to_string()).await;
        }

        let data = match self.documents.load_blob(document_id).await {
            Ok(data) => data,
            Err(e) => return self.retry_or_fail(ctx, document_id, e.to_string()).await,
        };

        if data.len() > self.config.max_upload_bytes {
            return self
                .fail_document(
                    document_id,
                    format!(
                        "document exceeds size limit ({} > {} bytes)",
                        data.len(),
                        self.config.max_upload_bytes
                    ),
                )
                .await;
        }

        // Unsupported formats are permanent, not retryable
        let text = match self
            .extractors
            .extract(&data, &document.filename, &document.content_type)
            .await
        {
            Ok(text) => text,
            Err(e) => return self.fail_document(document_id, e.to_string()).await,
        };

        let pieces = self.chunker.chunk(&text, self.tokenizer.as_ref());
        if pieces.is_empty() {
            return self
                .fail_document(document_id, "document produced no text".to_string())
                .await;
        }
        if pieces.len() > self.config.max_chunks_per_document {
            return self
                .fail_document(
                    document_id,
                    format!(
                        "document produced {} chunks (limit {})",
                        pieces.len(),
                        self.config.max_chunks_per_document
                    ),
                )
                .await;
        }

        debug!(
            subsystem = "jobs",
            component = "ingest",
            document_id = %document_id,
            chunk_count = pieces.len(),
            "Document chunked"
        );

        // Embed in batches. Any batch failure aborts the whole document:
        // nothing has been persisted yet, so no partial set is visible.
        let model = self.embed.model_name().to_string();
        let expected_dim = self.embed.dimension();
        let mut new_chunks: Vec<NewChunk> = Vec::with_capacity(pieces.len());

        for batch in pieces.chunks(self.config.embed_batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            let vectors = match self.embed.embed_texts(&texts).await {
                Ok(vectors) => vectors,
                Err(e) => {
                    return self
                        .retry_or_fail(ctx, document_id, format!("embedding failed: {}", e))
                        .await
                }
            };

            if vectors.len() != batch.len() {
                return self
                    .retry_or_fail(
                        ctx,
                        document_id,
                        format!(
                            "embedding count mismatch: {} texts, {} vectors",
                            batch.len(),
                            vectors.len()
                        ),
                    )
                    .await;
            }

            for (piece, vector) in batch.iter().zip(vectors) {
                if vector.as_slice().len() != expected_dim {
                    return self
                        .fail_document(
                            document_id,
                            format!(
                                "embedding dimension mismatch: got {}, index expects {}",
                                vector.as_slice().len(),
                                expected_dim
                            ),
                        )
                        .await;
                }
                new_chunks.push(NewChunk {
                    seq: piece.seq,
                    text: piece.text.clone(),
                    token_count: piece.token_count as i32,
                    embedding: vector,
                    model: model.clone(),
                });
            }
        }

        let chunk_count = new_chunks.len();
        if let Err(e) = self.chunks.store_ready(document_id, new_chunks).await {
            return self.retry_or_fail(ctx, document_id, e.to_string()).await;
        }

        info!(
            subsystem = "jobs",
            component = "ingest",
            document_id = %document_id,
            notebook_id = %document.notebook_id,
            chunk_count,
            "Document ingested"
        );

        if self.queue_raptor_build {
            match self
                .jobs
                .queue_deduplicated(
                    JobType::RaptorBuild,
                    Some(document.notebook_id),
                    None,
                    JobType::RaptorBuild.default_priority(),
                )
                .await
            {
                Ok(Some(job_id)) => debug!(
                    job_id = %job_id,
                    notebook_id = %document.notebook_id,
                    "Queued summary tree rebuild"
                ),
                Ok(None) => {}
                Err(e) => warn!(
                    notebook_id = %document.notebook_id,
                    error = %e,
                    "Failed to queue summary tree rebuild"
                ),
            }
        }

        JobResult::Success
    }
}

#[async_trait]
impl JobHandler for IngestHandler {
    fn job_type(&self) -> JobType {
        JobType::Ingest
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let Some(document_id) = ctx.document_id() else {
            return JobResult::Failed("ingest job has no document id".to_string());
        };
        self.run(&ctx, document_id).await
    }
}

/// Convenience: queue an ingest job for a freshly uploaded document.
pub async fn queue_ingest(
    jobs: &dyn JobRepository,
    notebook_id: Uuid,
    document_id: Uuid,
) -> Result<Uuid, Error> {
    jobs.queue(
        JobType::Ingest,
        Some(notebook_id),
        Some(document_id),
        JobType::Ingest.default_priority(),
    )
    .await
}
