//! # notebase-retrieval
//!
//! The retrieval-augmented query pipeline for notebase:
//!
//! - [`retriever`]: notebook-scoped vector retrieval over chunks and
//!   summary nodes
//! - [`rerank`]: LLM relevance reranking with pass-through degradation
//! - [`raptor`]: hierarchical summary tree construction
//! - [`memory`]: per-session conversation memory with strict turn ordering
//! - [`synthesis`]: prompt assembly and answer generation
//! - [`pipeline`]: the end-to-end query orchestration

pub mod memory;
pub mod pipeline;
pub mod raptor;
pub mod rerank;
pub mod retriever;
pub mod synthesis;

// Re-export core types
pub use notebase_core::*;

pub use memory::{MemoryWindow, SessionLocks, SessionMemory};
pub use pipeline::{PipelineConfig, QueryPipeline};
pub use raptor::{cosine_similarity, BuiltNode, RaptorBuilder, TreeConfig};
pub use rerank::{parse_relevance_score, RerankOutcome, Reranker};
pub use retriever::Retriever;
pub use synthesis::{AssembledPrompt, Synthesizer};
