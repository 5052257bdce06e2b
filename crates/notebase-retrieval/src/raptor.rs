//! RAPTOR hierarchical summary tree construction.
//!
//! The builder works over an explicit node arena and a per-level worklist
//! instead of recursing: each pass clusters the current level's items,
//! summarizes and embeds each cluster, and promotes the summaries to the next
//! level's worklist until one item remains or the depth bound is hit.
//!
//! Clustering is deterministic greedy centroid assignment in insertion order,
//! with no randomness: identical input embeddings always produce a
//! structurally identical tree, which makes builds cacheable and testable.
//!
//! A cluster whose summary or embedding fails is degraded, not fatal: its
//! members simply carry forward unmerged and end up as independent top-level
//! nodes if nothing later absorbs them. Tree building never blocks ingestion.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use notebase_core::config::RaptorConfig;
use notebase_core::{defaults, Chunk, EmbeddingBackend, GenerationBackend, Result};

/// System prompt for cluster summarization.
const SUMMARY_SYSTEM: &str = "You condense document passages for a retrieval index. \
Write one cohesive summary paragraph covering the key facts, entities, and claims \
of the passages. Do not add information that is not in the passages.";

/// Tree build parameters.
#[derive(Debug, Clone)]
pub struct TreeConfig {
    /// Maximum summary levels above the chunk layer.
    pub max_depth: usize,
    /// Maximum children per summary node.
    pub branching_factor: usize,
    /// Minimum cluster size worth summarizing.
    pub min_cluster_size: usize,
    /// Cosine similarity floor for joining an existing cluster.
    pub similarity_threshold: f32,
    /// Token budget for one cluster's summary input.
    pub summary_input_tokens: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: defaults::RAPTOR_MAX_DEPTH,
            branching_factor: defaults::RAPTOR_BRANCHING_FACTOR,
            min_cluster_size: defaults::RAPTOR_MIN_CLUSTER_SIZE,
            similarity_threshold: defaults::RAPTOR_SIMILARITY_THRESHOLD,
            summary_input_tokens: defaults::RAPTOR_SUMMARY_INPUT_TOKENS,
        }
    }
}

impl From<&RaptorConfig> for TreeConfig {
    fn from(config: &RaptorConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            branching_factor: config.branching_factor,
            min_cluster_size: config.min_cluster_size,
            similarity_threshold: config.similarity_threshold,
            summary_input_tokens: config.summary_input_tokens,
        }
    }
}

/// A summary node produced by a build, ready for persistence.
#[derive(Debug, Clone)]
pub struct BuiltNode {
    pub id: Uuid,
    /// 1 = summarizes chunks directly, higher levels summarize summaries.
    pub level: i32,
    pub parent_id: Option<Uuid>,
    /// Child summary nodes (empty for level 1).
    pub child_ids: Vec<Uuid>,
    /// Chunks wrapped by a level-1 node (empty above level 1).
    pub child_chunk_ids: Vec<Uuid>,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// One entry in the current level's worklist.
#[derive(Clone)]
struct WorkItem {
    embedding: Vec<f32>,
    text: String,
    /// Arena index when this item is a summary node.
    node_idx: Option<usize>,
    /// Chunk id when this item is a raw chunk.
    chunk_id: Option<Uuid>,
}

/// Builds RAPTOR trees from a notebook's chunks.
pub struct RaptorBuilder {
    gen: Arc<dyn GenerationBackend>,
    embed: Arc<dyn EmbeddingBackend>,
    config: TreeConfig,
}

impl RaptorBuilder {
    /// Create a builder with the given backends and configuration.
    pub fn new(
        gen: Arc<dyn GenerationBackend>,
        embed: Arc<dyn EmbeddingBackend>,
        config: TreeConfig,
    ) -> Self {
        Self { gen, embed, config }
    }

    /// Build the summary tree for a set of chunks.
    ///
    /// Chunks must be passed in insertion order; the order is part of the
    /// deterministic clustering contract. Returns the full node arena.
    pub async fn build(&self, chunks: &[Chunk]) -> Result<Vec<BuiltNode>> {
        if chunks.len() < self.config.min_cluster_size {
            return Ok(vec![]);
        }
        let start = Instant::now();

        let mut arena: Vec<BuiltNode> = Vec::new();
        let mut work: Vec<WorkItem> = chunks
            .iter()
            .map(|c| WorkItem {
                embedding: c.embedding.as_slice().to_vec(),
                text: c.text.clone(),
                node_idx: None,
                chunk_id: Some(c.id),
            })
            .collect();

        for level in 1..=self.config.max_depth as i32 {
            if work.len() <= 1 {
                break;
            }

            let embeddings: Vec<&[f32]> = work.iter().map(|w| w.embedding.as_slice()).collect();
            let clusters = cluster_level(
                &embeddings,
                self.config.branching_factor,
                self.config.similarity_threshold,
            );

            let mut next: Vec<WorkItem> = Vec::new();
            let mut merged_any = false;

            for cluster in clusters {
                if cluster.len() < self.config.min_cluster_size {
                    for idx in cluster {
                        next.push(work[idx].clone());
                    }
                    continue;
                }

                let members: Vec<&WorkItem> = cluster.iter().map(|&i| &work[i]).collect();
                match self.summarize_cluster(&members).await {
                    Ok((summary, embedding)) => {
                        let id = Uuid::new_v4();
                        let child_ids: Vec<Uuid> = members
                            .iter()
                            .filter_map(|m| m.node_idx.map(|i| arena[i].id))
                            .collect();
                        let child_chunk_ids: Vec<Uuid> =
                            members.iter().filter_map(|m| m.chunk_id).collect();

                        for m in &members {
                            if let Some(i) = m.node_idx {
                                arena[i].parent_id = Some(id);
                            }
                        }

                        let node_idx = arena.len();
                        arena.push(BuiltNode {
                            id,
                            level,
                            parent_id: None,
                            child_ids,
                            child_chunk_ids,
                            text: summary.clone(),
                            embedding: embedding.clone(),
                        });

                        next.push(WorkItem {
                            embedding,
                            text: summary,
                            node_idx: Some(node_idx),
                            chunk_id: None,
                        });
                        merged_any = true;
                    }
                    Err(e) => {
                        warn!(
                            subsystem = "retrieval",
                            component = "raptor",
                            level,
                            cluster_size = cluster.len(),
                            error = %e,
                            "Cluster summarization failed, members carry forward unmerged"
                        );
                        for idx in cluster {
                            next.push(work[idx].clone());
                        }
                    }
                }
            }

            if !merged_any {
                debug!(
                    subsystem = "retrieval",
                    component = "raptor",
                    level,
                    items = work.len(),
                    "No clusters merged, stopping climb"
                );
                break;
            }
            work = next;
        }

        info!(
            subsystem = "retrieval",
            component = "raptor",
            op = "build",
            chunk_count = chunks.len(),
            node_count = arena.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Summary tree built"
        );
        Ok(arena)
    }

    /// Summarize a cluster's texts and embed the summary.
    async fn summarize_cluster(&self, members: &[&WorkItem]) -> Result<(String, Vec<f32>)> {
        let mut joined = String::new();
        for (i, member) in members.iter().enumerate() {
            joined.push_str(&format!("--- Passage {} ---\n{}\n\n", i + 1, member.text));
        }

        // Cap the summary input; estimation is plenty here.
        let budget_chars = self.config.summary_input_tokens * 4;
        if joined.len() > budget_chars {
            let mut cut = budget_chars;
            while cut > 0 && !joined.is_char_boundary(cut) {
                cut -= 1;
            }
            joined.truncate(cut);
        }

        let prompt = format!(
            "Summarize the following passages into one paragraph:\n\n{}",
            joined
        );
        let summary = self.gen.generate_with_system(SUMMARY_SYSTEM, &prompt).await?;
        let summary = summary.trim().to_string();
        if summary.is_empty() {
            return Err(notebase_core::Error::Inference(
                "empty cluster summary".to_string(),
            ));
        }

        let mut vectors = self.embed.embed_texts(&[summary.clone()]).await?;
        let embedding = vectors
            .pop()
            .ok_or_else(|| notebase_core::Error::Embedding("no embedding returned".to_string()))?;

        Ok((summary, embedding.as_slice().to_vec()))
    }
}

/// Deterministic greedy centroid clustering.
///
/// Items are visited in order; each joins the most similar existing cluster
/// that is below the branching bound and above the similarity threshold,
/// else it opens a new cluster. First-created cluster wins similarity ties.
fn cluster_level(embeddings: &[&[f32]], branching: usize, threshold: f32) -> Vec<Vec<usize>> {
    struct Cluster {
        sum: Vec<f32>,
        members: Vec<usize>,
    }

    let mut clusters: Vec<Cluster> = Vec::new();

    for (i, embedding) in embeddings.iter().enumerate() {
        let mut best: Option<(usize, f32)> = None;
        for (ci, cluster) in clusters.iter().enumerate() {
            if cluster.members.len() >= branching {
                continue;
            }
            let n = cluster.members.len() as f32;
            let centroid: Vec<f32> = cluster.sum.iter().map(|v| v / n).collect();
            let sim = cosine_similarity(&centroid, embedding);
            if best.map_or(true, |(_, bs)| sim > bs) {
                best = Some((ci, sim));
            }
        }

        match best {
            Some((ci, sim)) if sim >= threshold => {
                for (slot, v) in clusters[ci].sum.iter_mut().zip(embedding.iter()) {
                    *slot += v;
                }
                clusters[ci].members.push(i);
            }
            _ => clusters.push(Cluster {
                sum: embedding.to_vec(),
                members: vec![i],
            }),
        }
    }

    clusters.into_iter().map(|c| c.members).collect()
}
