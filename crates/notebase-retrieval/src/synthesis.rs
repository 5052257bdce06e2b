//! Prompt assembly and answer synthesis.
//!
//! The prompt is built under a token budget: retrieved context is added in
//! rank order until the budget runs out (lowest-ranked context is dropped
//! first), then history is added newest-first until what remains of the
//! budget is spent. The current query is never truncated.

use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use notebase_core::{
    defaults, Candidate, Error, GenerationBackend, Result, SessionTurn, Tokenizer,
};

/// System instructions for answer generation.
const SYNTHESIS_SYSTEM: &str = "You answer questions about the user's documents. \
Use only the provided sources; when you use a source, cite it inline as [Source N]. \
If the sources do not contain the answer, say so plainly.";

/// An assembled prompt plus bookkeeping about what made it in.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub system: String,
    pub prompt: String,
    /// Candidate ids actually included, in rank order. Becomes the
    /// partial-context diagnostic when synthesis fails.
    pub included_sources: Vec<Uuid>,
    /// History turns actually included.
    pub history_used: usize,
}

/// Assemble the synthesis prompt under `budget_tokens`.
pub fn assemble_prompt(
    query: &str,
    candidates: &[Candidate],
    history: &[SessionTurn],
    tokenizer: &dyn Tokenizer,
    budget_tokens: usize,
) -> AssembledPrompt {
    let question = format!("Question: {}", query);
    let mut remaining = budget_tokens.saturating_sub(tokenizer.count_tokens(&question));

    // Context in rank order; stop when the budget is spent.
    let mut context = String::new();
    let mut included_sources = Vec::new();
    for (i, candidate) in candidates.iter().enumerate() {
        let label = candidate
            .filename
            .clone()
            .unwrap_or_else(|| format!("summary level {}", candidate.level));
        let block = format!("[Source {}: {}]\n{}\n\n", i + 1, label, candidate.text);
        let cost = tokenizer.count_tokens(&block);
        if cost > remaining {
            debug!(
                subsystem = "retrieval",
                component = "synthesis",
                dropped = candidates.len() - i,
                "Context budget exhausted, dropping lowest-ranked sources"
            );
            break;
        }
        remaining -= cost;
        context.push_str(&block);
        included_sources.push(candidate.id);
    }

    // History newest-first against the remaining budget, rendered oldest
    // first so the conversation reads in order.
    let mut kept: Vec<&SessionTurn> = Vec::new();
    for turn in history.iter().rev() {
        let block = format!("User: {}\nAssistant: {}\n\n", turn.query, turn.answer);
        let cost = tokenizer.count_tokens(&block);
        if cost > remaining {
            break;
        }
        remaining -= cost;
        kept.push(turn);
    }
    kept.reverse();

    let mut prompt = String::new();
    if !context.is_empty() {
        prompt.push_str("Sources:\n\n");
        prompt.push_str(&context);
    }
    if !kept.is_empty() {
        prompt.push_str("Conversation so far:\n\n");
        for turn in &kept {
            prompt.push_str(&format!(
                "User: {}\nAssistant: {}\n\n",
                turn.query, turn.answer
            ));
        }
    }
    prompt.push_str(&question);

    AssembledPrompt {
        system: SYNTHESIS_SYSTEM.to_string(),
        prompt,
        included_sources,
        history_used: kept.len(),
    }
}

/// Dispatches assembled prompts to a generation backend.
pub struct Synthesizer {
    retry_backoff: Duration,
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Synthesizer {
    pub fn new() -> Self {
        Self {
            retry_backoff: Duration::from_millis(defaults::SYNTHESIS_RETRY_BACKOFF_MS),
        }
    }

    /// Override the retry backoff (tests).
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Generate the answer, retrying once with backoff on provider failure.
    ///
    /// The second failure surfaces as [`Error::Synthesis`] carrying the ids
    /// of the sources that were in the prompt.
    pub async fn synthesize(
        &self,
        backend: &dyn GenerationBackend,
        assembled: &AssembledPrompt,
    ) -> Result<String> {
        match backend
            .generate_with_system(&assembled.system, &assembled.prompt)
            .await
        {
            Ok(answer) => Ok(answer),
            Err(first) => {
                warn!(
                    subsystem = "retrieval",
                    component = "synthesis",
                    model = backend.model_name(),
                    error = %first,
                    "Synthesis failed, retrying once"
                );
                tokio::time::sleep(self.retry_backoff).await;

                backend
                    .generate_with_system(&assembled.system, &assembled.prompt)
                    .await
                    .map_err(|second| Error::Synthesis {
                        message: format!("provider failed after retry: {}", second),
                        partial_context: assembled.included_sources.clone(),
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use notebase_core::{SourceKind, TiktokenTokenizer};

    fn candidate(seq: i64, text: &str) -> Candidate {
        Candidate {
            id: Uuid::now_v7(),
            notebook_id: Uuid::new_v4(),
            document_id: Some(Uuid::new_v4()),
            filename: Some("handbook.md".to_string()),
            kind: SourceKind::Chunk,
            level: 0,
            seq,
            text: text.to_string(),
            score: 1.0 - seq as f32 * 0.1,
        }
    }

    fn turn(seq: i32, query: &str, answer: &str) -> SessionTurn {
        SessionTurn {
            id: Uuid::now_v7(),
            session_id: Uuid::new_v4(),
            seq,
            query: query.to_string(),
            answer: answer.to_string(),
            source_ids: vec![],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn prompt_contains_sources_history_and_question() {
        let tokenizer = TiktokenTokenizer::cl100k().unwrap();
        let candidates = vec![candidate(0, "Remote work is allowed on Fridays.")];
        let history = vec![turn(0, "What is the WFH policy?", "Fridays are remote.")];

        let assembled = assemble_prompt(
            "Are there exceptions?",
            &candidates,
            &history,
            &tokenizer,
            4000,
        );

        assert!(assembled.prompt.contains("[Source 1: handbook.md]"));
        assert!(assembled.prompt.contains("Remote work is allowed"));
        assert!(assembled.prompt.contains("What is the WFH policy?"));
        assert!(assembled.prompt.contains("Fridays are remote."));
        assert!(assembled.prompt.ends_with("Question: Are there exceptions?"));
        assert_eq!(assembled.included_sources.len(), 1);
        assert_eq!(assembled.history_used, 1);
    }

    #[test]
    fn budget_drops_lowest_ranked_sources_first() {
        let tokenizer = TiktokenTokenizer::cl100k().unwrap();
        let candidates: Vec<Candidate> = (0..5)
            .map(|i| candidate(i, &format!("passage number {} {}", i, "filler ".repeat(30))))
            .collect();

        // Budget fits roughly two source blocks
        let assembled = assemble_prompt("q?", &candidates, &[], &tokenizer, 120);

        assert!(assembled.included_sources.len() < 5);
        assert!(!assembled.included_sources.is_empty());
        // The kept ones are the top-ranked prefix
        assert_eq!(assembled.included_sources[0], candidates[0].id);
    }

    #[test]
    fn history_keeps_newest_turns_within_budget() {
        let tokenizer = TiktokenTokenizer::cl100k().unwrap();
        let history: Vec<SessionTurn> = (0..6)
            .map(|i| {
                turn(
                    i,
                    &format!("question {} {}", i, "padding ".repeat(20)),
                    &format!("answer {}", i),
                )
            })
            .collect();

        let assembled = assemble_prompt("next?", &[], &history, &tokenizer, 120);

        assert!(assembled.history_used < 6);
        assert!(assembled.history_used >= 1);
        // The newest turn survives; the oldest is the first dropped
        assert!(assembled.prompt.contains("question 5"));
        assert!(!assembled.prompt.contains("question 0"));
    }

    #[test]
    fn query_survives_zero_budget() {
        let tokenizer = TiktokenTokenizer::cl100k().unwrap();
        let candidates = vec![candidate(0, "context")];
        let assembled = assemble_prompt("the question", &candidates, &[], &tokenizer, 0);
        assert!(assembled.prompt.contains("the question"));
        assert!(assembled.included_sources.is_empty());
    }

    #[tokio::test]
    async fn synthesize_retries_once_then_succeeds() {
        use notebase_inference::MockBackend;

        let backend = MockBackend::new()
            .with_fixed_response("the answer")
            .with_generate_failures(1);
        let synthesizer = Synthesizer::new().with_retry_backoff(Duration::from_millis(1));

        let assembled = AssembledPrompt {
            system: "s".to_string(),
            prompt: "p".to_string(),
            included_sources: vec![],
            history_used: 0,
        };

        let answer = synthesizer.synthesize(&backend, &assembled).await.unwrap();
        assert_eq!(answer, "the answer");
        assert_eq!(backend.generate_count(), 2);
    }

    #[tokio::test]
    async fn second_failure_surfaces_partial_context() {
        use notebase_inference::MockBackend;

        let backend = MockBackend::new().with_generate_failures(2);
        let synthesizer = Synthesizer::new().with_retry_backoff(Duration::from_millis(1));

        let source_id = Uuid::new_v4();
        let assembled = AssembledPrompt {
            system: "s".to_string(),
            prompt: "p".to_string(),
            included_sources: vec![source_id],
            history_used: 0,
        };

        let err = synthesizer
            .synthesize(&backend, &assembled)
            .await
            .unwrap_err();
        match err {
            Error::Synthesis {
                partial_context, ..
            } => assert_eq!(partial_context, vec![source_id]),
            other => panic!("expected Synthesis error, got {:?}", other),
        }
    }
}
