//! Runtime configuration for the query pipeline.
//!
//! Configuration is layered: compiled defaults from [`crate::defaults`], then
//! optional YAML files (`ingestion.yaml`, `raptor.yaml` in the config
//! directory), then environment variables. Env always wins so deployments can
//! override a mounted config file without editing it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};

/// Similarity metric for vector search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    Cosine,
    InnerProduct,
}

impl Default for SimilarityMetric {
    fn default() -> Self {
        Self::Cosine
    }
}

impl SimilarityMetric {
    /// Parse from string (case-insensitive, accepts hyphens/underscores).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "cosine" => Some(Self::Cosine),
            "inner_product" | "ip" | "dot" => Some(Self::InnerProduct),
            _ => None,
        }
    }

    /// pgvector distance operator for this metric.
    pub fn operator(&self) -> &'static str {
        match self {
            Self::Cosine => "<=>",
            Self::InnerProduct => "<#>",
        }
    }
}

fn default_chunk_tokens() -> usize {
    defaults::CHUNK_TOKENS
}
fn default_chunk_overlap_tokens() -> usize {
    defaults::CHUNK_OVERLAP_TOKENS
}
fn default_embed_batch_size() -> usize {
    defaults::EMBED_BATCH_SIZE
}
fn default_max_upload_bytes() -> usize {
    defaults::MAX_UPLOAD_SIZE_BYTES
}
fn default_max_chunks() -> usize {
    defaults::MAX_CHUNKS_PER_DOCUMENT
}
fn default_max_retries() -> i32 {
    defaults::JOB_MAX_RETRIES
}

/// Document ingestion settings (`ingestion.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_chunk_tokens")]
    pub chunk_tokens: usize,
    #[serde(default = "default_chunk_overlap_tokens")]
    pub chunk_overlap_tokens: usize,
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_max_chunks")]
    pub max_chunks_per_document: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: defaults::CHUNK_TOKENS,
            chunk_overlap_tokens: defaults::CHUNK_OVERLAP_TOKENS,
            embed_batch_size: defaults::EMBED_BATCH_SIZE,
            max_upload_bytes: defaults::MAX_UPLOAD_SIZE_BYTES,
            max_chunks_per_document: defaults::MAX_CHUNKS_PER_DOCUMENT,
            max_retries: defaults::JOB_MAX_RETRIES,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_depth() -> usize {
    defaults::RAPTOR_MAX_DEPTH
}
fn default_branching() -> usize {
    defaults::RAPTOR_BRANCHING_FACTOR
}
fn default_min_cluster() -> usize {
    defaults::RAPTOR_MIN_CLUSTER_SIZE
}
fn default_similarity_threshold() -> f32 {
    defaults::RAPTOR_SIMILARITY_THRESHOLD
}
fn default_summary_input_tokens() -> usize {
    defaults::RAPTOR_SUMMARY_INPUT_TOKENS
}

/// RAPTOR tree build settings (`raptor.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaptorConfig {
    /// When false no builds are queued; `skip_raptor=false` queries simply
    /// find no summary nodes.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_branching")]
    pub branching_factor: usize,
    #[serde(default = "default_min_cluster")]
    pub min_cluster_size: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_summary_input_tokens")]
    pub summary_input_tokens: usize,
}

impl Default for RaptorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: defaults::RAPTOR_MAX_DEPTH,
            branching_factor: defaults::RAPTOR_BRANCHING_FACTOR,
            min_cluster_size: defaults::RAPTOR_MIN_CLUSTER_SIZE,
            similarity_threshold: defaults::RAPTOR_SIMILARITY_THRESHOLD,
            summary_input_tokens: defaults::RAPTOR_SUMMARY_INPUT_TOKENS,
        }
    }
}

fn default_context_budget() -> usize {
    defaults::CONTEXT_TOKEN_BUDGET
}
fn default_query_timeout() -> u64 {
    defaults::QUERY_TIMEOUT_SECS
}

/// Retrieval and synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub metric: SimilarityMetric,
    #[serde(default = "default_context_budget")]
    pub context_token_budget: usize,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            metric: SimilarityMetric::Cosine,
            context_token_budget: defaults::CONTEXT_TOKEN_BUDGET,
            query_timeout_secs: defaults::QUERY_TIMEOUT_SECS,
        }
    }
}

fn default_ttl_secs() -> u64 {
    defaults::SESSION_TTL_SECS
}
fn default_grace_secs() -> u64 {
    defaults::SESSION_GRACE_SECS
}

/// Session memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: defaults::SESSION_TTL_SECS,
            grace_secs: defaults::SESSION_GRACE_SECS,
        }
    }
}

/// Combined application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub raptor: RaptorConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl AppConfig {
    /// Load configuration: defaults → YAML files in `config_dir` → env vars.
    ///
    /// `ingestion.yaml` holds the `IngestionConfig` document and `raptor.yaml`
    /// the `RaptorConfig` document. Missing files are fine; malformed files
    /// are a hard error so a typo cannot silently fall back to defaults.
    pub fn load(config_dir: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = config_dir {
            if let Some(ingestion) = read_yaml::<IngestionConfig>(&dir.join("ingestion.yaml"))? {
                config.ingestion = ingestion;
            }
            if let Some(raptor) = read_yaml::<RaptorConfig>(&dir.join("raptor.yaml"))? {
                config.raptor = raptor;
            }
        }

        config.apply_env();
        Ok(config)
    }

    /// Apply `NOTEBASE_*` environment overrides.
    pub fn apply_env(&mut self) {
        env_usize("NOTEBASE_CHUNK_TOKENS", &mut self.ingestion.chunk_tokens);
        env_usize(
            "NOTEBASE_CHUNK_OVERLAP_TOKENS",
            &mut self.ingestion.chunk_overlap_tokens,
        );
        env_usize(
            "NOTEBASE_EMBED_BATCH_SIZE",
            &mut self.ingestion.embed_batch_size,
        );
        env_usize(
            "NOTEBASE_MAX_UPLOAD_BYTES",
            &mut self.ingestion.max_upload_bytes,
        );

        if let Ok(val) = std::env::var("NOTEBASE_RAPTOR_ENABLED") {
            self.raptor.enabled = val != "false" && val != "0";
        }
        env_usize("NOTEBASE_RAPTOR_MAX_DEPTH", &mut self.raptor.max_depth);
        env_usize(
            "NOTEBASE_RAPTOR_BRANCHING",
            &mut self.raptor.branching_factor,
        );
        if let Ok(val) = std::env::var("NOTEBASE_RAPTOR_SIMILARITY_THRESHOLD") {
            if let Ok(v) = val.parse::<f32>() {
                self.raptor.similarity_threshold = v.clamp(0.0, 1.0);
            } else {
                tracing::warn!(value = %val, "Invalid NOTEBASE_RAPTOR_SIMILARITY_THRESHOLD, keeping current");
            }
        }

        if let Ok(val) = std::env::var("SIMILARITY_METRIC") {
            if let Some(metric) = SimilarityMetric::from_str_loose(&val) {
                self.retrieval.metric = metric;
            } else {
                tracing::warn!(value = %val, "Invalid SIMILARITY_METRIC, keeping current");
            }
        }
        env_usize(
            "NOTEBASE_CONTEXT_TOKEN_BUDGET",
            &mut self.retrieval.context_token_budget,
        );
        env_u64(
            "NOTEBASE_QUERY_TIMEOUT_SECS",
            &mut self.retrieval.query_timeout_secs,
        );

        env_u64("NOTEBASE_SESSION_TTL_SECS", &mut self.session.ttl_secs);
        env_u64("NOTEBASE_SESSION_GRACE_SECS", &mut self.session.grace_secs);
    }

    /// Validate cross-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.ingestion.chunk_overlap_tokens >= self.ingestion.chunk_tokens {
            return Err(Error::Config(
                "chunk_overlap_tokens must be smaller than chunk_tokens".to_string(),
            ));
        }
        if self.raptor.branching_factor < 2 {
            return Err(Error::Config(
                "raptor branching_factor must be at least 2".to_string(),
            ));
        }
        if self.session.grace_secs < self.session.ttl_secs {
            return Err(Error::Config(
                "session grace_secs must not be shorter than ttl_secs".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let parsed = serde_yaml::from_str(&raw)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    Ok(Some(parsed))
}

fn env_usize(key: &str, slot: &mut usize) {
    if let Ok(val) = std::env::var(key) {
        if let Ok(v) = val.parse::<usize>() {
            *slot = v;
        } else {
            tracing::warn!(var = key, value = %val, "Invalid integer env override, keeping current");
        }
    }
}

fn env_u64(key: &str, slot: &mut u64) {
    if let Ok(val) = std::env::var(key) {
        if let Ok(v) = val.parse::<u64>() {
            *slot = v;
        } else {
            tracing::warn!(var = key, value = %val, "Invalid integer env override, keeping current");
        }
    }
}
