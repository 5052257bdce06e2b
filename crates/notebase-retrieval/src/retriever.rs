//! Candidate retrieval over chunks and summary nodes.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error};
use uuid::Uuid;

use notebase_core::{
    Candidate, ChunkRepository, Error, Result, SummaryNodeRepository, Vector,
};

/// Retrieves top-k candidates for a query embedding, scoped to one notebook.
///
/// Chunk hits and (optionally) summary-node hits from the active RAPTOR build
/// are merged and re-ranked by score. Ordering is fully deterministic: score
/// descending, then insertion order (`seq`, then id) on ties.
pub struct Retriever {
    chunks: Arc<dyn ChunkRepository>,
    summaries: Arc<dyn SummaryNodeRepository>,
}

impl Retriever {
    /// Create a retriever over the given repositories.
    pub fn new(
        chunks: Arc<dyn ChunkRepository>,
        summaries: Arc<dyn SummaryNodeRepository>,
    ) -> Self {
        Self { chunks, summaries }
    }

    /// Retrieve up to `top_k` candidates for the query embedding.
    ///
    /// When `include_summaries` is false the summary tree is never consulted
    /// (the `skip_raptor` request flag).
    pub async fn retrieve(
        &self,
        notebook_id: Uuid,
        query: &Vector,
        top_k: usize,
        include_summaries: bool,
    ) -> Result<Vec<Candidate>> {
        let start = Instant::now();
        let limit = top_k as i64;

        let mut candidates = self.chunks.find_similar(notebook_id, query, limit).await?;

        if include_summaries {
            let summaries = self
                .summaries
                .find_similar(notebook_id, query, limit)
                .await?;
            candidates.extend(summaries);
        }

        // Isolation invariant: a hit from another notebook is a security bug,
        // not a ranking problem. Fail the request loudly rather than leak.
        if let Some(stray) = candidates.iter().find(|c| c.notebook_id != notebook_id) {
            error!(
                subsystem = "retrieval",
                component = "retriever",
                notebook_id = %notebook_id,
                stray_notebook_id = %stray.notebook_id,
                candidate_id = %stray.id,
                "Notebook isolation violation in retrieval results"
            );
            return Err(Error::Internal(
                "notebook isolation violation in retrieval results".to_string(),
            ));
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.seq.cmp(&b.seq))
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(top_k);

        debug!(
            subsystem = "retrieval",
            component = "retriever",
            op = "retrieve",
            notebook_id = %notebook_id,
            result_count = candidates.len(),
            include_summaries,
            duration_ms = start.elapsed().as_millis() as u64,
            "Retrieval complete"
        );
        Ok(candidates)
    }
}
