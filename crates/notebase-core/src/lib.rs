//! # notebase-core
//!
//! Core types, traits, and abstractions for the notebase query pipeline.
//!
//! This crate provides the foundational data structures and trait definitions
//! that other notebase crates depend on.

pub mod auth;
pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod tokenizer;
pub mod traits;

// Re-export commonly used types at crate root
pub use auth::AuthPrincipal;
pub use config::{
    AppConfig, IngestionConfig, RaptorConfig, RetrievalConfig, SessionConfig, SimilarityMetric,
};
pub use error::{Error, Result};
pub use models::*;
pub use tokenizer::{estimate_tokens, likely_exceeds_limit, TiktokenTokenizer, Tokenizer};
pub use traits::*;

/// Vector type used for embeddings throughout the workspace.
pub use pgvector::Vector;
