//! Inference provider registry with slug routing and model auto-detection.
//!
//! Model slugs can be provider-qualified:
//!
//! ```text
//! "llama3.1:latest"            → auto-detected (Ollama tag shape)
//! "ollama:llama3.1:latest"     → explicit Ollama
//! "openai:gpt-4o"              → OpenAI
//! "gpt-4.1-mini"               → auto-detected → OpenAI
//! "claude-3-5-haiku-latest"    → auto-detected → Anthropic
//! "meta-llama/llama-4-maverick-17b-128e-instruct" → auto-detected → Groq
//! ```
//!
//! Bare slugs are matched against well-known model-name shapes so clients can
//! pass the model names from the documentation without a provider prefix.
//! The default provider (Ollama) is always available; external providers
//! require API key configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use notebase_core::{defaults, Error, GenerationBackend, ModelResolver, Result};

// ---------------------------------------------------------------------------
// Provider capability enum
// ---------------------------------------------------------------------------

/// Capabilities a provider can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCapability {
    Generation,
    Embedding,
}

impl std::fmt::Display for ProviderCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generation => write!(f, "generation"),
            Self::Embedding => write!(f, "embedding"),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider configuration
// ---------------------------------------------------------------------------

/// Configuration for a registered inference provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Provider identifier ("ollama", "openai", "groq", "gemini", "anthropic").
    pub id: String,
    /// Base URL for the provider's API.
    pub base_url: String,
    /// API key (None for local providers like Ollama).
    pub api_key: Option<String>,
    /// Which capabilities this provider supports.
    pub capabilities: Vec<ProviderCapability>,
    /// Default timeout for requests.
    pub timeout: Duration,
    /// Default generation model for bare provider-qualified slugs.
    pub default_model: String,
    /// Whether this is the default provider.
    pub is_default: bool,
}

/// Result of parsing a model slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSlug {
    /// Provider identifier.
    pub provider_id: String,
    /// Model slug (everything after the provider prefix).
    pub model: String,
}

// ---------------------------------------------------------------------------
// Provider registry
// ---------------------------------------------------------------------------

/// Registry of configured inference providers.
///
/// Resolves model slugs to concrete generation backends. The API's
/// `model` request parameter goes straight through [`ModelResolver::resolve`].
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderConfig>,
    default_provider: String,
}

impl ProviderRegistry {
    /// Create a new empty provider registry.
    pub fn new(default_provider: String) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider,
        }
    }

    /// Register a provider.
    pub fn register(&mut self, config: ProviderConfig) {
        info!(
            provider = %config.id,
            base_url = %config.base_url,
            capabilities = ?config.capabilities,
            is_default = config.is_default,
            "Registering inference provider"
        );
        if config.is_default {
            self.default_provider = config.id.clone();
        }
        self.providers.insert(config.id.clone(), config);
    }

    /// Get the default provider ID.
    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Get all registered provider IDs.
    pub fn provider_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Get a provider config by ID.
    pub fn get_provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.get(id)
    }

    /// Check if a provider is registered.
    pub fn has_provider(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    // -----------------------------------------------------------------------
    // Slug parsing
    // -----------------------------------------------------------------------

    /// Parse a model slug into a provider and model.
    ///
    /// Explicit `provider:` prefixes win. Bare slugs are auto-detected from
    /// well-known name shapes; anything unrecognized goes to the default
    /// provider unchanged (Ollama tags contain colons, so unknown prefixes
    /// are part of the model name, not a provider).
    pub fn parse_slug(&self, slug: &str) -> ParsedSlug {
        // Explicit provider prefix
        for provider_id in self.providers.keys() {
            let prefix = format!("{}:", provider_id);
            if let Some(model) = slug.strip_prefix(&prefix) {
                if !model.is_empty() {
                    debug!(slug, provider = %provider_id, model, "Parsed provider-qualified slug");
                    return ParsedSlug {
                        provider_id: provider_id.clone(),
                        model: model.to_string(),
                    };
                }
            }
        }

        // Model-name shape detection (the documented client passes bare
        // model names like "gpt-4.1-mini" and "claude-sonnet-4-20250514").
        if let Some(provider_id) = detect_provider_for_model(slug) {
            if self.providers.contains_key(provider_id) {
                debug!(slug, provider = provider_id, "Auto-detected provider from model name");
                return ParsedSlug {
                    provider_id: provider_id.to_string(),
                    model: slug.to_string(),
                };
            }
        }

        debug!(slug, provider = %self.default_provider, "Using default provider for bare slug");
        ParsedSlug {
            provider_id: self.default_provider.clone(),
            model: slug.to_string(),
        }
    }

    // -----------------------------------------------------------------------
    // Backend resolution
    // -----------------------------------------------------------------------

    /// Resolve a slug to a boxed generation backend.
    pub fn resolve_generation(&self, slug: &str) -> Result<Box<dyn GenerationBackend>> {
        let parsed = self.parse_slug(slug);
        let config = self
            .providers
            .get(&parsed.provider_id)
            .ok_or_else(|| Error::Config(format!("Unknown provider: {}", parsed.provider_id)))?;

        if !config.capabilities.contains(&ProviderCapability::Generation) {
            return Err(Error::Config(format!(
                "Provider '{}' does not support generation",
                parsed.provider_id
            )));
        }

        match parsed.provider_id.as_str() {
            #[cfg(feature = "ollama")]
            "ollama" => {
                let mut backend = crate::OllamaBackend::from_env();
                backend.set_gen_model(parsed.model);
                Ok(Box::new(backend))
            }
            #[cfg(feature = "openai")]
            "openai" | "groq" | "gemini" => {
                let oai_config = crate::OpenAIConfig {
                    base_url: config.base_url.clone(),
                    api_key: config.api_key.clone(),
                    gen_model: parsed.model,
                    timeout_seconds: config.timeout.as_secs(),
                    ..Default::default()
                };
                Ok(Box::new(crate::OpenAIBackend::new(oai_config)?))
            }
            #[cfg(feature = "anthropic")]
            "anthropic" => {
                let config = crate::AnthropicConfig {
                    base_url: config.base_url.clone(),
                    api_key: config.api_key.clone().ok_or_else(|| {
                        Error::Config("Anthropic provider requires an API key".to_string())
                    })?,
                    model: parsed.model,
                    timeout_seconds: config.timeout.as_secs(),
                    ..Default::default()
                };
                Ok(Box::new(crate::AnthropicBackend::new(config)?))
            }
            _ => Err(Error::Config(format!(
                "Provider '{}' not compiled in (check feature flags)",
                parsed.provider_id
            ))),
        }
    }

    /// Providers and their default models, for the models listing endpoint.
    pub fn list_models(&self) -> Vec<(String, String)> {
        let mut models: Vec<(String, String)> = self
            .providers
            .values()
            .filter(|p| p.capabilities.contains(&ProviderCapability::Generation))
            .map(|p| (p.id.clone(), p.default_model.clone()))
            .collect();
        models.sort_unstable();
        models
    }

    // -----------------------------------------------------------------------
    // Construction from environment
    // -----------------------------------------------------------------------

    /// Build a provider registry from environment variables.
    ///
    /// Always registers Ollama (default). OpenAI, Groq, Gemini, and Anthropic
    /// are registered when their API keys are configured.
    pub fn from_env() -> Self {
        let mut registry = Self::new("ollama".to_string());

        let ollama_base =
            std::env::var("OLLAMA_BASE").unwrap_or_else(|_| defaults::OLLAMA_URL.to_string());
        registry.register(ProviderConfig {
            id: "ollama".to_string(),
            base_url: ollama_base,
            api_key: None,
            capabilities: vec![
                ProviderCapability::Generation,
                ProviderCapability::Embedding,
            ],
            timeout: Duration::from_secs(defaults::GEN_TIMEOUT_SECS),
            default_model: defaults::OLLAMA_GEN_MODEL.to_string(),
            is_default: true,
        });

        if let Some(api_key) = env_key("OPENAI_API_KEY") {
            let base_url = std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
            registry.register(ProviderConfig {
                id: "openai".to_string(),
                base_url,
                api_key: Some(api_key),
                capabilities: vec![
                    ProviderCapability::Generation,
                    ProviderCapability::Embedding,
                ],
                timeout: Duration::from_secs(defaults::GEN_TIMEOUT_SECS),
                default_model: defaults::OPENAI_GEN_MODEL.to_string(),
                is_default: false,
            });
        }

        if let Some(api_key) = env_key("GROQ_API_KEY") {
            let base_url = std::env::var("GROQ_BASE_URL")
                .unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string());
            registry.register(ProviderConfig {
                id: "groq".to_string(),
                base_url,
                api_key: Some(api_key),
                capabilities: vec![ProviderCapability::Generation],
                timeout: Duration::from_secs(defaults::GEN_TIMEOUT_SECS),
                default_model: "llama-3.3-70b-versatile".to_string(),
                is_default: false,
            });
        }

        if let Some(api_key) = env_key("GEMINI_API_KEY") {
            // Gemini's OpenAI-compatibility endpoint
            let base_url = std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| {
                "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
            });
            registry.register(ProviderConfig {
                id: "gemini".to_string(),
                base_url,
                api_key: Some(api_key),
                capabilities: vec![ProviderCapability::Generation],
                timeout: Duration::from_secs(defaults::GEN_TIMEOUT_SECS),
                default_model: "gemini-2.0-flash".to_string(),
                is_default: false,
            });
        }

        if let Some(api_key) = env_key("ANTHROPIC_API_KEY") {
            let base_url = std::env::var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com".to_string());
            registry.register(ProviderConfig {
                id: "anthropic".to_string(),
                base_url,
                api_key: Some(api_key),
                capabilities: vec![ProviderCapability::Generation],
                timeout: Duration::from_secs(defaults::GEN_TIMEOUT_SECS),
                default_model: "claude-3-5-haiku-latest".to_string(),
                is_default: false,
            });
        }

        info!(
            providers = ?registry.provider_ids(),
            default = %registry.default_provider,
            "Provider registry initialized from environment"
        );

        registry
    }
}

impl ModelResolver for ProviderRegistry {
    fn resolve(&self, slug: Option<&str>) -> Result<Arc<dyn GenerationBackend>> {
        let slug = match slug {
            Some(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => {
                let config = self
                    .providers
                    .get(&self.default_provider)
                    .ok_or_else(|| Error::Config("no default provider registered".to_string()))?;
                format!("{}:{}", config.id, config.default_model)
            }
        };
        self.resolve_generation(&slug).map(Arc::from)
    }
}

fn env_key(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

/// Detect a provider from a bare model name's shape.
///
/// Mirrors the documented client behavior: the query API accepts bare model
/// names and routes them to the owning provider.
pub fn detect_provider_for_model(model: &str) -> Option<&'static str> {
    let lower = model.to_lowercase();
    if lower.starts_with("gpt-") || lower.starts_with("o1") || lower.starts_with("o3") {
        return Some("openai");
    }
    if lower.starts_with("claude-") {
        return Some("anthropic");
    }
    if lower.starts_with("gemini-") {
        return Some("gemini");
    }
    // Vendor-scoped slugs like "meta-llama/llama-4-maverick-17b-128e-instruct"
    if lower.contains('/') {
        return Some("groq");
    }
    // "model:tag" is the Ollama shape
    if lower.contains(':') {
        return Some("ollama");
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
