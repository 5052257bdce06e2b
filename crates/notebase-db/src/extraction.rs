//! Text extraction from uploaded documents.
//!
//! Rich multimodal extraction (PDF OCR, audio, vision) is an external
//! collaborator; this module is the seam for it. Built-in extractors cover
//! plain text and markdown, which is what notebook uploads overwhelmingly
//! are. Unknown binary formats are rejected at ingestion time.

use async_trait::async_trait;

use notebase_core::{Error, Result};

/// Detect a content type from magic bytes, falling back to the declared type.
pub fn detect_content_type(data: &[u8], declared: &str) -> String {
    match infer::get(data) {
        Some(kind) => kind.mime_type().to_string(),
        None => declared.to_string(),
    }
}

/// Adapter for extracting plain text from an uploaded document.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Content types this extractor handles.
    fn content_types(&self) -> &[&'static str];

    /// Extract text from raw file data.
    async fn extract(&self, data: &[u8], filename: &str) -> Result<String>;

    /// Human-readable name of this extractor.
    fn name(&self) -> &str;
}

/// Extractor for `text/plain` and similar textual types.
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    fn content_types(&self) -> &[&'static str] {
        &["text/plain", "text/csv", "application/json"]
    }

    async fn extract(&self, data: &[u8], filename: &str) -> Result<String> {
        String::from_utf8(data.to_vec())
            .map_err(|_| Error::Ingestion(format!("{} is not valid UTF-8 text", filename)))
    }

    fn name(&self) -> &str {
        "plain_text"
    }
}

/// Extractor for markdown. Markdown is already readable text; fenced code
/// blocks and headings are kept verbatim so chunk boundaries preserve them.
pub struct MarkdownExtractor;

#[async_trait]
impl TextExtractor for MarkdownExtractor {
    fn content_types(&self) -> &[&'static str] {
        &["text/markdown", "text/x-markdown"]
    }

    async fn extract(&self, data: &[u8], filename: &str) -> Result<String> {
        String::from_utf8(data.to_vec())
            .map_err(|_| Error::Ingestion(format!("{} is not valid UTF-8 markdown", filename)))
    }

    fn name(&self) -> &str {
        "markdown"
    }
}

/// Registry dispatching documents to extractors by content type.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn TextExtractor>>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractorRegistry {
    /// Create a registry with the built-in extractors.
    pub fn new() -> Self {
        Self {
            extractors: vec![Box::new(PlainTextExtractor), Box::new(MarkdownExtractor)],
        }
    }

    /// Register an additional extractor (external extraction facility).
    pub fn register(&mut self, extractor: Box<dyn TextExtractor>) {
        self.extractors.push(extractor);
    }

    /// Find the extractor for a content type, if any.
    fn find(&self, content_type: &str) -> Option<&dyn TextExtractor> {
        // Strip parameters like "; charset=utf-8"
        let base = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim();
        self.extractors
            .iter()
            .find(|e| e.content_types().contains(&base))
            .map(|e| e.as_ref())
    }

    /// Whether a content type is supported at all. Upload handlers use this
    /// to reject unsupported formats before persisting anything.
    pub fn supports(&self, content_type: &str) -> bool {
        self.find(content_type).is_some()
            // Filenames with textual extensions but a generic declared type
            || content_type == "application/octet-stream"
    }

    /// Extract text, failing with `Ingestion` on unsupported formats.
    pub async fn extract(&self, data: &[u8], filename: &str, content_type: &str) -> Result<String> {
        if let Some(extractor) = self.find(content_type) {
            return extractor.extract(data, filename).await;
        }

        // Generic byte streams: fall back by extension
        if content_type == "application/octet-stream" {
            let lower = filename.to_lowercase();
            if lower.ends_with(".md") || lower.ends_with(".markdown") {
                return MarkdownExtractor.extract(data, filename).await;
            }
            if lower.ends_with(".txt") || lower.ends_with(".csv") || lower.ends_with(".json") {
                return PlainTextExtractor.extract(data, filename).await;
            }
        }

        Err(Error::Ingestion(format!(
            "Unsupported document format: {} ({})",
            content_type, filename
        )))
    }
}
