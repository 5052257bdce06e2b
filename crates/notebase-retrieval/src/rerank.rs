//! LLM relevance reranking.
//!
//! Pointwise scoring: each candidate is judged against the query on a 0-10
//! scale by a generation model, then candidates are re-sorted by that score.
//! Disabled or failing reranking degrades to pass-through retriever order —
//! a reranker problem must never fail a query.

use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use notebase_core::{Candidate, Error, GenerationBackend, Result};

/// System prompt for relevance judging.
const RERANK_SYSTEM: &str = "You judge how relevant a passage is to a query. \
Respond with a single number from 0 (irrelevant) to 10 (directly answers the query). \
Respond with the number only.";

static SCORE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^\d.])(\d+(?:\.\d+)?)").expect("score regex compiles")
});

/// Parse a 0-10 relevance score from a model response.
///
/// Takes the first number in the response and clamps it to the scale, so
/// chatty judges ("Score: 8/10") still parse.
pub fn parse_relevance_score(response: &str) -> Option<f32> {
    let trimmed = response.trim();
    // Fast path: the whole response is the number, as instructed.
    if let Ok(score) = trimmed.parse::<f32>() {
        return Some(score.clamp(0.0, 10.0));
    }
    SCORE_RE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f32>().ok())
        .map(|s| s.clamp(0.0, 10.0))
}

/// Outcome of a rerank pass.
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    /// Candidates in final order, truncated to `max_sources`.
    pub candidates: Vec<Candidate>,
    /// Whether rerank scores were actually applied (false for pass-through).
    pub applied: bool,
}

/// Reranks retrieval candidates with an LLM judge.
pub struct Reranker;

impl Reranker {
    /// Rerank `candidates` for `query`, truncating to `max_sources`.
    ///
    /// `judge: None` (reranking disabled) short-circuits to pass-through.
    /// Any scoring failure logs a warning and also degrades to pass-through.
    pub async fn rerank(
        judge: Option<&dyn GenerationBackend>,
        query: &str,
        candidates: Vec<Candidate>,
        max_sources: usize,
    ) -> RerankOutcome {
        let Some(backend) = judge else {
            return Self::pass_through(candidates, max_sources);
        };
        if candidates.len() <= 1 {
            return Self::pass_through(candidates, max_sources);
        }

        let start = Instant::now();
        match Self::score_all(backend, query, &candidates).await {
            Ok(scores) => {
                let mut indexed: Vec<(usize, f32)> =
                    scores.into_iter().enumerate().collect();
                // Retriever rank is the tie-break, so equal judge scores keep
                // their original relative order.
                indexed.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(&b.0))
                });

                let mut reranked: Vec<Candidate> = indexed
                    .into_iter()
                    .map(|(i, _)| candidates[i].clone())
                    .collect();
                reranked.truncate(max_sources);

                debug!(
                    subsystem = "retrieval",
                    component = "reranker",
                    op = "rerank",
                    result_count = reranked.len(),
                    model = backend.model_name(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Rerank applied"
                );
                RerankOutcome {
                    candidates: reranked,
                    applied: true,
                }
            }
            Err(e) => {
                warn!(
                    subsystem = "retrieval",
                    component = "reranker",
                    error = %e,
                    "Reranker failed, passing through retriever order"
                );
                Self::pass_through(candidates, max_sources)
            }
        }
    }

    fn pass_through(mut candidates: Vec<Candidate>, max_sources: usize) -> RerankOutcome {
        candidates.truncate(max_sources);
        RerankOutcome {
            candidates,
            applied: false,
        }
    }

    async fn score_all(
        backend: &dyn GenerationBackend,
        query: &str,
        candidates: &[Candidate],
    ) -> Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let prompt = format!(
                "Query: {}\n\nPassage:\n{}\n\nRelevance score (0-10):",
                query, candidate.text
            );
            let response = backend.generate_with_system(RERANK_SYSTEM, &prompt).await?;
            let score = parse_relevance_score(&response).ok_or_else(|| {
                Error::Rerank(format!("unparseable relevance score: {:?}", response))
            })?;
            scores.push(score);
        }
        Ok(scores)
    }
}
