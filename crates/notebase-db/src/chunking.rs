//! Document chunking strategies for embedding generation.
//!
//! Splitting happens in token space rather than characters so chunk sizes
//! line up with embedding-model limits and the synthesizer's context budget.
//!
//! # Strategies
//!
//! - `TokenWindowChunker` - Fixed token window with configurable overlap
//! - `ParagraphChunker` - Paragraph boundaries merged up to the token window
//!
//! # Example
//!
//! ```rust,ignore
//! use notebase_db::chunking::{TextChunker, TokenWindowChunker, ChunkerConfig};
//!
//! let chunker = TokenWindowChunker::new(ChunkerConfig::default());
//! let chunks = chunker.chunk("Your document text here.", &tokenizer);
//! ```

use notebase_core::{defaults, Tokenizer};

/// Configuration for chunking strategies.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Token window per chunk.
    pub chunk_tokens: usize,
    /// Token overlap between adjacent chunks.
    pub overlap_tokens: usize,
    /// Minimum tokens for a standalone chunk.
    pub min_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: defaults::CHUNK_TOKENS,
            overlap_tokens: defaults::CHUNK_OVERLAP_TOKENS,
            min_tokens: defaults::CHUNK_MIN_TOKENS,
        }
    }
}

/// A text chunk with its position and token count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// The text content of the chunk.
    pub text: String,
    /// Insertion order within the document.
    pub seq: i32,
    /// Token count of `text`.
    pub token_count: usize,
}

/// Common trait for chunking strategies.
pub trait TextChunker: Send + Sync {
    /// Chunk the given text into a list of chunks.
    fn chunk(&self, text: &str, tokenizer: &dyn Tokenizer) -> Vec<TextChunk>;

    /// Get the configuration used by this chunker.
    fn config(&self) -> &ChunkerConfig;
}

/// Fixed-size token windows with overlap.
///
/// The final window always absorbs the tail, so no chunk is ever shorter than
/// the overlap.
#[derive(Debug, Clone)]
pub struct TokenWindowChunker {
    config: ChunkerConfig,
}

impl TokenWindowChunker {
    /// Create a new TokenWindowChunker with the given configuration.
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }
}

impl TextChunker for TokenWindowChunker {
    fn chunk(&self, text: &str, tokenizer: &dyn Tokenizer) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return vec![];
        }

        let tokens = tokenizer.encode(text);
        let window = self.config.chunk_tokens.max(1);
        let step = window.saturating_sub(self.config.overlap_tokens).max(1);

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut seq = 0i32;

        loop {
            let remaining = tokens.len() - start;
            let end = if remaining <= window {
                tokens.len()
            } else {
                start + window
            };

            let piece = tokenizer.decode(&tokens[start..end]);
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                chunks.push(TextChunk {
                    text: trimmed.to_string(),
                    seq,
                    token_count: end - start,
                });
                seq += 1;
            }

            if end == tokens.len() {
                break;
            }
            start += step;
        }

        chunks
    }

    fn config(&self) -> &ChunkerConfig {
        &self.config
    }
}

/// Splits at paragraph boundaries (blank lines), merging consecutive
/// paragraphs until the token window is full. No overlap; paragraphs that
/// exceed the window on their own are delegated to a token window split.
#[derive(Debug, Clone)]
pub struct ParagraphChunker {
    config: ChunkerConfig,
}

impl ParagraphChunker {
    /// Create a new ParagraphChunker with the given configuration.
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    fn split_paragraphs(text: &str) -> Vec<&str> {
        text.split("\n\n")
            .flat_map(|p| p.split("\r\n\r\n"))
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    }
}

impl TextChunker for ParagraphChunker {
    fn chunk(&self, text: &str, tokenizer: &dyn Tokenizer) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return vec![];
        }

        let window = self.config.chunk_tokens.max(1);
        let mut chunks: Vec<TextChunk> = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0usize;
        let mut seq = 0i32;

        let mut flush = |current: &mut String, current_tokens: &mut usize, seq: &mut i32, chunks: &mut Vec<TextChunk>| {
            if !current.trim().is_empty() {
                chunks.push(TextChunk {
                    text: current.trim().to_string(),
                    seq: *seq,
                    token_count: *current_tokens,
                });
                *seq += 1;
            }
            current.clear();
            *current_tokens = 0;
        };

        for para in Self::split_paragraphs(text) {
            let para_tokens = tokenizer.count_tokens(para);

            if para_tokens > window {
                // Oversized paragraph: flush what we have, then window-split it
                flush(&mut current, &mut current_tokens, &mut seq, &mut chunks);
                let inner = TokenWindowChunker::new(self.config.clone());
                for sub in inner.chunk(para, tokenizer) {
                    chunks.push(TextChunk { seq, ..sub });
                    seq += 1;
                }
                continue;
            }

            if current_tokens + para_tokens > window {
                flush(&mut current, &mut current_tokens, &mut seq, &mut chunks);
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(para);
            current_tokens += para_tokens;
        }
        flush(&mut current, &mut current_tokens, &mut seq, &mut chunks);

        chunks
    }

    fn config(&self) -> &ChunkerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notebase_core::TiktokenTokenizer;

    fn tokenizer() -> TiktokenTokenizer {
        TiktokenTokenizer::cl100k().unwrap()
    }

    fn small_config() -> ChunkerConfig {
        ChunkerConfig {
            chunk_tokens: 20,
            overlap_tokens: 5,
            min_tokens: 2,
        }
    }

    #[test]
    fn empty_text_produces_no_chunks() {
        let tok = tokenizer();
        let chunker = TokenWindowChunker::new(small_config());
        assert!(chunker.chunk("", &tok).is_empty());
        assert!(chunker.chunk("   \n\n  ", &tok).is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let tok = tokenizer();
        let chunker = TokenWindowChunker::new(small_config());
        let chunks = chunker.chunk("A short sentence.", &tok);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].seq, 0);
        assert_eq!(chunks[0].text, "A short sentence.");
    }

    #[test]
    fn long_text_windows_respect_token_bound() {
        let tok = tokenizer();
        let chunker = TokenWindowChunker::new(small_config());
        let text = "the quick brown fox jumps over the lazy dog ".repeat(20);
        let chunks = chunker.chunk(&text, &tok);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count <= 20, "window exceeded: {}", chunk.token_count);
        }
        // Sequential numbering
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.seq, i as i32);
        }
    }

    #[test]
    fn windows_overlap() {
        let tok = tokenizer();
        let chunker = TokenWindowChunker::new(small_config());
        let text = "alpha bravo charlie delta echo foxtrot golf hotel india juliet ".repeat(10);
        let chunks = chunker.chunk(&text, &tok);
        assert!(chunks.len() > 2);

        // With a 5-token overlap, each chunk should share its trailing words
        // with the head of the next one.
        for pair in chunks.windows(2) {
            let tail: String = pair[0]
                .text
                .split_whitespace()
                .rev()
                .take(2)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join(" ");
            assert!(
                pair[1].text.contains(&tail),
                "expected overlap '{}' in next chunk",
                tail
            );
        }
    }

    #[test]
    fn final_window_absorbs_tail() {
        let tok = tokenizer();
        let chunker = TokenWindowChunker::new(small_config());
        let text = "word ".repeat(23);
        let chunks = chunker.chunk(&text, &tok);
        // No chunk shorter than the overlap
        for chunk in &chunks {
            assert!(chunk.token_count >= 5, "tiny tail chunk: {:?}", chunk);
        }
    }

    #[test]
    fn paragraph_chunker_merges_small_paragraphs() {
        let tok = tokenizer();
        let chunker = ParagraphChunker::new(ChunkerConfig {
            chunk_tokens: 50,
            overlap_tokens: 0,
            min_tokens: 2,
        });
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunker.chunk(text, &tok);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("First paragraph."));
        assert!(chunks[0].text.contains("Third paragraph."));
    }

    #[test]
    fn paragraph_chunker_splits_when_window_full() {
        let tok = tokenizer();
        let chunker = ParagraphChunker::new(ChunkerConfig {
            chunk_tokens: 12,
            overlap_tokens: 0,
            min_tokens: 2,
        });
        let text = "one two three four five six seven.\n\neight nine ten eleven twelve thirteen.";
        let chunks = chunker.chunk(text, &tok);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with("one"));
        assert!(chunks[1].text.starts_with("eight"));
    }

    #[test]
    fn paragraph_chunker_windows_oversized_paragraph() {
        let tok = tokenizer();
        let chunker = ParagraphChunker::new(small_config());
        let text = "tokens everywhere ".repeat(40);
        let chunks = chunker.chunk(&text, &tok);
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.seq, i as i32);
        }
    }
}
