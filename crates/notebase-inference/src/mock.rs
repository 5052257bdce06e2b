//! Mock inference backend for deterministic testing.
//!
//! Embeddings are derived from a hash of the input text, so identical inputs
//! always produce identical vectors — which is exactly what the RAPTOR
//! reproducibility tests need. Generation responses are scripted, and both
//! operations support failure injection.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use notebase_core::{
    EmbeddingBackend, Error, GenerationBackend, InferenceBackend, Result, Vector,
};

/// A recorded call against the mock backend.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: String,
    pub input: String,
}

#[derive(Debug)]
struct MockState {
    default_response: String,
    /// (substring, response) pairs checked in order before the default.
    response_mappings: Vec<(String, String)>,
    /// Scripted responses consumed before mappings/default apply.
    scripted: VecDeque<String>,
    generate_failures_remaining: usize,
    embed_failures_remaining: usize,
    /// When set, the first N embed calls succeed and every later one fails.
    embed_fail_after: Option<usize>,
    embed_calls_seen: usize,
    /// Substring that makes generation fail whenever the prompt contains it.
    fail_on_substring: Option<String>,
    calls: Vec<MockCall>,
}

/// Mock inference backend for testing.
#[derive(Clone)]
pub struct MockBackend {
    dimension: usize,
    model: String,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a new mock backend with default configuration.
    pub fn new() -> Self {
        Self {
            dimension: 8,
            model: "mock-model".to_string(),
            state: Arc::new(Mutex::new(MockState {
                default_response: "Mock response".to_string(),
                response_mappings: Vec::new(),
                scripted: VecDeque::new(),
                generate_failures_remaining: 0,
                embed_failures_remaining: 0,
                embed_fail_after: None,
                embed_calls_seen: 0,
                fail_on_substring: None,
                calls: Vec::new(),
            })),
        }
    }

    /// Set the embedding dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Set the default response for generation requests.
    pub fn with_fixed_response(self, response: impl Into<String>) -> Self {
        self.state.lock().unwrap().default_response = response.into();
        self
    }

    /// Map prompts containing `substring` to a specific response.
    pub fn with_response_for(self, substring: impl Into<String>, response: impl Into<String>) -> Self {
        self.state
            .lock()
            .unwrap()
            .response_mappings
            .push((substring.into(), response.into()));
        self
    }

    /// Queue scripted responses returned in order before any mapping applies.
    pub fn with_scripted_responses(self, responses: Vec<String>) -> Self {
        self.state.lock().unwrap().scripted = responses.into();
        self
    }

    /// Fail the next `n` generation calls.
    pub fn with_generate_failures(self, n: usize) -> Self {
        self.state.lock().unwrap().generate_failures_remaining = n;
        self
    }

    /// Fail the next `n` embedding calls.
    pub fn with_embed_failures(self, n: usize) -> Self {
        self.state.lock().unwrap().embed_failures_remaining = n;
        self
    }

    /// Let the first `n` embedding calls succeed, then fail every later one.
    pub fn with_embed_failures_after(self, n: usize) -> Self {
        self.state.lock().unwrap().embed_fail_after = Some(n);
        self
    }

    /// Fail any generation whose prompt contains `substring`.
    pub fn with_failure_on(self, substring: impl Into<String>) -> Self {
        self.state.lock().unwrap().fail_on_substring = Some(substring.into());
        self
    }

    /// All calls recorded so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of generation calls recorded.
    pub fn generate_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.operation == "generate")
            .count()
    }

    /// Number of embedding calls recorded (one per batch).
    pub fn embed_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.operation == "embed")
            .count()
    }

    /// Deterministic embedding for a text: hashed, then L2-normalized.
    pub fn embedding_for(text: &str, dimension: usize) -> Vec<f32> {
        let mut values = Vec::with_capacity(dimension);
        for i in 0..dimension {
            let mut h: u64 = 0xcbf29ce484222325;
            for byte in text.as_bytes() {
                h ^= u64::from(*byte);
                h = h.wrapping_mul(0x100000001b3);
            }
            h ^= i as u64;
            h = h.wrapping_mul(0x100000001b3);
            // Map to [-1, 1]
            values.push(((h % 2000) as f32 / 1000.0) - 1.0);
        }
        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }
        values
    }
}

#[async_trait]
impl EmbeddingBackend for MockBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall {
            operation: "embed".to_string(),
            input: texts.join("\n"),
        });

        state.embed_calls_seen += 1;
        if state.embed_failures_remaining > 0 {
            state.embed_failures_remaining -= 1;
            return Err(Error::Embedding("mock embedding failure".to_string()));
        }
        if let Some(after) = state.embed_fail_after {
            if state.embed_calls_seen > after {
                return Err(Error::Embedding("mock embedding failure".to_string()));
            }
        }
        drop(state);

        Ok(texts
            .iter()
            .map(|t| Vector::from(Self::embedding_for(t, self.dimension)))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl GenerationBackend for MockBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with_system("", prompt).await
    }

    async fn generate_with_system(&self, _system: &str, prompt: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall {
            operation: "generate".to_string(),
            input: prompt.to_string(),
        });

        if state.generate_failures_remaining > 0 {
            state.generate_failures_remaining -= 1;
            return Err(Error::Inference("mock generation failure".to_string()));
        }

        if let Some(ref substring) = state.fail_on_substring {
            if prompt.contains(substring.as_str()) {
                return Err(Error::Inference(format!(
                    "mock generation failure (matched '{}')",
                    substring
                )));
            }
        }

        if let Some(scripted) = state.scripted.pop_front() {
            return Ok(scripted);
        }

        for (substring, response) in &state.response_mappings {
            if prompt.contains(substring.as_str()) {
                return Ok(response.clone());
            }
        }

        Ok(state.default_response.clone())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embeddings_are_deterministic() {
        let backend = MockBackend::new().with_dimension(16);
        let a = backend.embed_texts(&["hello".to_string()]).await.unwrap();
        let b = backend.embed_texts(&["hello".to_string()]).await.unwrap();
        assert_eq!(a[0].as_slice(), b[0].as_slice());
        assert_eq!(a[0].as_slice().len(), 16);
    }

    #[tokio::test]
    async fn different_texts_embed_differently() {
        let backend = MockBackend::new();
        let vecs = backend
            .embed_texts(&["alpha".to_string(), "bravo".to_string()])
            .await
            .unwrap();
        assert_ne!(vecs[0].as_slice(), vecs[1].as_slice());
    }

    #[tokio::test]
    async fn embeddings_are_normalized() {
        let v = MockBackend::embedding_for("anything", 32);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn fixed_and_mapped_responses() {
        let backend = MockBackend::new()
            .with_fixed_response("default")
            .with_response_for("summarize", "a summary");

        assert_eq!(backend.generate("hello").await.unwrap(), "default");
        assert_eq!(
            backend.generate("please summarize this").await.unwrap(),
            "a summary"
        );
    }

    #[tokio::test]
    async fn scripted_responses_consumed_in_order() {
        let backend = MockBackend::new()
            .with_scripted_responses(vec!["one".to_string(), "two".to_string()]);
        assert_eq!(backend.generate("x").await.unwrap(), "one");
        assert_eq!(backend.generate("x").await.unwrap(), "two");
        assert_eq!(backend.generate("x").await.unwrap(), "Mock response");
    }

    #[tokio::test]
    async fn failure_injection_counts_down() {
        let backend = MockBackend::new().with_generate_failures(2);
        assert!(backend.generate("a").await.is_err());
        assert!(backend.generate("b").await.is_err());
        assert!(backend.generate("c").await.is_ok());
    }

    #[tokio::test]
    async fn embed_failure_injection() {
        let backend = MockBackend::new().with_embed_failures(1);
        assert!(backend.embed_texts(&["x".to_string()]).await.is_err());
        assert!(backend.embed_texts(&["x".to_string()]).await.is_ok());
    }

    #[tokio::test]
    async fn call_log_records_operations() {
        let backend = MockBackend::new();
        let _ = backend.embed_texts(&["a".to_string()]).await;
        let _ = backend.generate("b").await;
        assert_eq!(backend.embed_count(), 1);
        assert_eq!(backend.generate_count(), 1);
    }
}
