//! # notebase-inference
//!
//! Embedding and LLM provider abstraction for notebase.
//!
//! This crate provides:
//! - Pluggable backend traits (defined in `notebase-core`)
//! - Provider registry with slug routing and model-name auto-detection
//! - Ollama implementation (default, local)
//! - OpenAI-compatible implementation (OpenAI, Groq, Gemini compat endpoints)
//! - Anthropic Messages implementation (generation only)
//! - Deterministic mock backend for tests
//!
//! # Example
//!
//! ```rust,no_run
//! use notebase_inference::ProviderRegistry;
//! use notebase_core::ModelResolver;
//!
//! let registry = ProviderRegistry::from_env();
//! let backend = registry.resolve(Some("gpt-4.1-mini")).unwrap();
//! ```

pub mod provider;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "anthropic")]
pub mod anthropic;

// Mock inference backend for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use notebase_core::*;

pub use provider::{ProviderCapability, ProviderConfig, ProviderRegistry};

#[cfg(feature = "ollama")]
pub use ollama::OllamaBackend;

#[cfg(feature = "openai")]
pub use openai::{OpenAIBackend, OpenAIConfig};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicBackend, AnthropicConfig};

#[cfg(any(test, feature = "mock"))]
pub use mock::MockBackend;
