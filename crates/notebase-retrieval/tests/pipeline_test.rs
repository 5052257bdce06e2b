//! End-to-end pipeline tests over in-memory repositories and the mock
//! inference backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use notebase_core::config::{RetrievalConfig, SessionConfig};
use notebase_core::{
    AccessLevel, Candidate, Chunk, ChunkRepository, Error, GenerationBackend, ModelResolver,
    NewChunk, NewSummaryNode, Notebook, NotebookRepository, NotebookSummary, QueryRequest, Result,
    Session, SessionRepository, SessionState, SessionTurn, SourceKind, SummaryNodeRepository,
    TiktokenTokenizer, Vector,
};
use notebase_retrieval::{
    cosine_similarity, PipelineConfig, QueryPipeline, Retriever, Synthesizer,
};

use notebase_inference::MockBackend;

const DIM: usize = 8;

// ---------------------------------------------------------------------------
// In-memory fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemNotebooks {
    access: Mutex<HashMap<(Uuid, Uuid), AccessLevel>>,
}

impl MemNotebooks {
    fn grant(&self, notebook_id: Uuid, user_id: Uuid, level: AccessLevel) {
        self.access
            .lock()
            .unwrap()
            .insert((notebook_id, user_id), level);
    }
}

#[async_trait]
impl NotebookRepository for MemNotebooks {
    async fn create(&self, _name: &str, _owner_id: Uuid) -> Result<Uuid> {
        Ok(Uuid::new_v4())
    }
    async fn get(&self, _id: Uuid) -> Result<Option<Notebook>> {
        Ok(None)
    }
    async fn list_visible(&self, _user_id: Uuid) -> Result<Vec<NotebookSummary>> {
        Ok(vec![])
    }
    async fn delete(&self, _id: Uuid) -> Result<()> {
        Ok(())
    }
    async fn set_access(
        &self,
        notebook_id: Uuid,
        user_id: Uuid,
        level: Option<AccessLevel>,
    ) -> Result<()> {
        let mut access = self.access.lock().unwrap();
        match level {
            Some(level) => access.insert((notebook_id, user_id), level),
            None => access.remove(&(notebook_id, user_id)),
        };
        Ok(())
    }
    async fn access_level(&self, notebook_id: Uuid, user_id: Uuid) -> Result<Option<AccessLevel>> {
        Ok(self
            .access
            .lock()
            .unwrap()
            .get(&(notebook_id, user_id))
            .copied())
    }
    async fn set_active_build(&self, _notebook_id: Uuid, _build_id: Option<Uuid>) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct MemChunks {
    chunks: Mutex<Vec<Chunk>>,
}

impl MemChunks {
    fn add(&self, notebook_id: Uuid, seq: i32, text: &str) {
        let embedding = Vector::from(MockBackend::embedding_for(text, DIM));
        self.chunks.lock().unwrap().push(Chunk {
            id: Uuid::now_v7(),
            document_id: Uuid::new_v4(),
            notebook_id,
            seq,
            text: text.to_string(),
            token_count: 10,
            embedding,
            model: "mock-model".to_string(),
        });
    }
}

#[async_trait]
impl ChunkRepository for MemChunks {
    async fn store_ready(&self, _document_id: Uuid, _chunks: Vec<NewChunk>) -> Result<()> {
        Ok(())
    }
    async fn for_notebook(&self, notebook_id: Uuid) -> Result<Vec<Chunk>> {
        Ok(self
            .chunks
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.notebook_id == notebook_id)
            .cloned()
            .collect())
    }
    async fn find_similar(
        &self,
        notebook_id: Uuid,
        query: &Vector,
        limit: i64,
    ) -> Result<Vec<Candidate>> {
        let mut hits: Vec<Candidate> = self
            .chunks
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.notebook_id == notebook_id)
            .map(|c| Candidate {
                id: c.id,
                notebook_id: c.notebook_id,
                document_id: Some(c.document_id),
                filename: Some("doc.md".to_string()),
                kind: SourceKind::Chunk,
                level: 0,
                seq: c.seq as i64,
                text: c.text.clone(),
                score: cosine_similarity(c.embedding.as_slice(), query.as_slice()),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.seq.cmp(&b.seq))
        });
        hits.truncate(limit as usize);
        Ok(hits)
    }
    async fn count_for_notebook(&self, notebook_id: Uuid) -> Result<i64> {
        Ok(self.for_notebook(notebook_id).await?.len() as i64)
    }
}

#[derive(Default)]
struct MemSummaries {
    nodes: Mutex<Vec<(Uuid, String, Vec<f32>)>>,
    lookups: Mutex<usize>,
}

impl MemSummaries {
    fn add(&self, notebook_id: Uuid, text: &str) {
        self.nodes.lock().unwrap().push((
            notebook_id,
            text.to_string(),
            MockBackend::embedding_for(text, DIM),
        ));
    }

    fn lookup_count(&self) -> usize {
        *self.lookups.lock().unwrap()
    }
}

#[async_trait]
impl SummaryNodeRepository for MemSummaries {
    async fn insert_build(
        &self,
        _notebook_id: Uuid,
        _build_id: Uuid,
        _nodes: Vec<NewSummaryNode>,
    ) -> Result<()> {
        Ok(())
    }
    async fn activate_build(&self, _notebook_id: Uuid, _build_id: Uuid) -> Result<()> {
        Ok(())
    }
    async fn find_similar(
        &self,
        notebook_id: Uuid,
        query: &Vector,
        limit: i64,
    ) -> Result<Vec<Candidate>> {
        *self.lookups.lock().unwrap() += 1;
        let mut hits: Vec<Candidate> = self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|(nb, _, _)| *nb == notebook_id)
            .map(|(nb, text, embedding)| Candidate {
                id: Uuid::now_v7(),
                notebook_id: *nb,
                document_id: None,
                filename: None,
                kind: SourceKind::Summary,
                level: 1,
                seq: 0,
                text: text.clone(),
                score: cosine_similarity(embedding, query.as_slice()),
            })
            .collect();
        hits.truncate(limit as usize);
        Ok(hits)
    }
    async fn node_count(&self, _notebook_id: Uuid) -> Result<i64> {
        Ok(self.nodes.lock().unwrap().len() as i64)
    }
}

#[derive(Default)]
struct MemSessions {
    sessions: Mutex<HashMap<Uuid, Session>>,
    turns: Mutex<Vec<SessionTurn>>,
}

impl MemSessions {
    /// Age a session's last activity backwards (test hook).
    fn age_session(&self, id: Uuid, secs: i64) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(&id) {
            session.last_active_at = session.last_active_at - chrono::Duration::seconds(secs);
        }
    }
}

#[async_trait]
impl SessionRepository for MemSessions {
    async fn get_or_create(
        &self,
        id: Uuid,
        notebook_id: Uuid,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<Session> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(&id) {
            if session.notebook_id != notebook_id || session.user_id != user_id {
                return Err(Error::AccessDenied(
                    "session belongs to a different notebook or user".to_string(),
                ));
            }
            let idle = Utc::now() - session.last_active_at;
            if session.state == SessionState::Active
                && idle.num_seconds() >= ttl.as_secs() as i64
            {
                session.state = SessionState::Expired;
            }
            return Ok(session.clone());
        }

        let now: DateTime<Utc> = Utc::now();
        let session = Session {
            id,
            notebook_id,
            user_id,
            state: SessionState::Active,
            created_at: now,
            last_active_at: now,
        };
        sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn recent_turns(&self, session_id: Uuid, limit: i64) -> Result<Vec<SessionTurn>> {
        let turns = self.turns.lock().unwrap();
        let mut mine: Vec<SessionTurn> = turns
            .iter()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect();
        mine.sort_by_key(|t| t.seq);
        let skip = mine.len().saturating_sub(limit as usize);
        Ok(mine.into_iter().skip(skip).collect())
    }

    async fn append_turn(
        &self,
        session_id: Uuid,
        query: &str,
        answer: &str,
        source_ids: &[Uuid],
    ) -> Result<()> {
        let mut turns = self.turns.lock().unwrap();
        let seq = turns.iter().filter(|t| t.session_id == session_id).count() as i32;
        turns.push(SessionTurn {
            id: Uuid::now_v7(),
            session_id,
            seq,
            query: query.to_string(),
            answer: answer.to_string(),
            source_ids: source_ids.to_vec(),
            created_at: Utc::now(),
        });
        drop(turns);

        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(&session_id) {
            session.last_active_at = Utc::now();
        }
        Ok(())
    }

    async fn expire_idle(&self, _ttl: Duration) -> Result<u64> {
        Ok(0)
    }
    async fn purge_expired(&self, _grace: Duration) -> Result<u64> {
        Ok(0)
    }
}

struct FixedResolver {
    backend: Arc<dyn GenerationBackend>,
}

impl ModelResolver for FixedResolver {
    fn resolve(&self, _slug: Option<&str>) -> Result<Arc<dyn GenerationBackend>> {
        Ok(self.backend.clone())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    notebooks: Arc<MemNotebooks>,
    chunks: Arc<MemChunks>,
    summaries: Arc<MemSummaries>,
    sessions: Arc<MemSessions>,
    backend: MockBackend,
    pipeline: QueryPipeline,
    notebook_id: Uuid,
    user_id: Uuid,
}

fn harness_with_backend(backend: MockBackend) -> Harness {
    let notebooks = Arc::new(MemNotebooks::default());
    let chunks = Arc::new(MemChunks::default());
    let summaries = Arc::new(MemSummaries::default());
    let sessions = Arc::new(MemSessions::default());

    let notebook_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    notebooks.grant(notebook_id, user_id, AccessLevel::Owner);

    let retriever = Retriever::new(chunks.clone(), summaries.clone());
    let resolver = Arc::new(FixedResolver {
        backend: Arc::new(backend.clone()),
    });
    let tokenizer = Arc::new(TiktokenTokenizer::cl100k().unwrap());

    let config = PipelineConfig {
        retrieval: RetrievalConfig::default(),
        session: SessionConfig {
            ttl_secs: 3600,
            grace_secs: 86_400,
        },
    };

    let pipeline = QueryPipeline::new(
        notebooks.clone(),
        retriever,
        sessions.clone(),
        Arc::new(backend.clone()),
        resolver,
        tokenizer,
        config,
    )
    .with_synthesizer(Synthesizer::new().with_retry_backoff(Duration::from_millis(1)));

    Harness {
        notebooks,
        chunks,
        summaries,
        sessions,
        backend,
        pipeline,
        notebook_id,
        user_id,
    }
}

fn harness() -> Harness {
    harness_with_backend(MockBackend::new().with_dimension(DIM))
}

fn request(h: &Harness, query: &str) -> QueryRequest {
    serde_json::from_value(serde_json::json!({
        "notebook_id": h.notebook_id,
        "query": query,
    }))
    .unwrap()
}

// ---------------------------------------------------------------------------
// Isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn isolation_two_notebooks_top_k_six_all_from_queried_notebook() {
    let h = harness();
    let other_notebook = Uuid::new_v4();

    for i in 0..10 {
        h.chunks.add(h.notebook_id, i, &format!("notebook A fact {}", i));
        h.chunks.add(other_notebook, i, &format!("notebook B fact {}", i));
    }

    let mut req = request(&h, "what are the facts?");
    req.reranker_enabled = false;
    req.top_k = 6;

    let response = h.pipeline.execute(req, h.user_id).await.unwrap();

    assert_eq!(response.sources.len(), 6);
    assert_eq!(response.metadata.node_count, 6);
    // Every snippet came from notebook A's corpus
    for source in &response.sources {
        assert!(
            source.snippet.contains("notebook A"),
            "leaked snippet: {}",
            source.snippet
        );
    }
}

#[tokio::test]
async fn unknown_notebook_fails_closed() {
    let h = harness();
    let mut req = request(&h, "anything");
    req.notebook_id = Uuid::new_v4(); // no grant

    let err = h.pipeline.execute(req, h.user_id).await.unwrap_err();
    assert!(matches!(err, Error::NotebookNotFound(_)));
}

#[tokio::test]
async fn notebook_without_grant_is_indistinguishable_from_missing() {
    let h = harness();
    let stranger = Uuid::new_v4();

    let req = request(&h, "anything");
    let err = h.pipeline.execute(req, stranger).await.unwrap_err();
    // Same error shape as a nonexistent notebook
    assert!(matches!(err, Error::NotebookNotFound(_)));
}

// ---------------------------------------------------------------------------
// Reranking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reranker_disabled_preserves_retriever_order() {
    let h = harness();
    for i in 0..5 {
        h.chunks.add(h.notebook_id, i, &format!("passage {}", i));
    }

    let mut req = request(&h, "passage 2");
    req.reranker_enabled = false;
    req.top_k = 5;
    req.max_sources = 5;

    let response = h.pipeline.execute(req.clone(), h.user_id).await.unwrap();

    // Expected order = retriever order (cosine scores descending)
    let query_vec = Vector::from(MockBackend::embedding_for("passage 2", DIM));
    let expected = h
        .chunks
        .find_similar(h.notebook_id, &query_vec, 5)
        .await
        .unwrap();

    let got: Vec<String> = response.sources.iter().map(|s| s.snippet.clone()).collect();
    let want: Vec<String> = expected
        .iter()
        .map(|c| c.text.chars().take(200).collect())
        .collect();
    assert_eq!(got, want);
    // Only the synthesis call hit the model: no judge calls
    assert_eq!(h.backend.generate_count(), 1);
}

#[tokio::test]
async fn reranker_failure_degrades_to_pass_through() {
    // Judge calls fail (the rerank prompt contains "Relevance score"), the
    // synthesis prompt does not match and succeeds.
    let backend = MockBackend::new()
        .with_dimension(DIM)
        .with_failure_on("Relevance score")
        .with_fixed_response("an answer");
    let h = harness_with_backend(backend);
    for i in 0..4 {
        h.chunks.add(h.notebook_id, i, &format!("passage {}", i));
    }

    let mut req = request(&h, "passage 1");
    req.reranker_enabled = true;
    req.top_k = 4;
    req.max_sources = 3;

    let response = h.pipeline.execute(req, h.user_id).await.unwrap();
    assert_eq!(response.response, "an answer");
    assert_eq!(response.sources.len(), 3);
}

#[tokio::test]
async fn reranker_scores_reorder_candidates() {
    // Judge gives the highest score to the prompt mentioning "passage 3".
    let backend = MockBackend::new()
        .with_dimension(DIM)
        .with_response_for("passage 3", "10")
        .with_response_for("Relevance score", "1")
        .with_fixed_response("final answer");
    let h = harness_with_backend(backend);
    for i in 0..4 {
        h.chunks.add(h.notebook_id, i, &format!("passage {}", i));
    }

    let mut req = request(&h, "which passage?");
    req.reranker_enabled = true;
    req.top_k = 4;
    req.max_sources = 2;

    let response = h.pipeline.execute(req, h.user_id).await.unwrap();
    assert_eq!(response.sources.len(), 2);
    assert!(response.sources[0].snippet.contains("passage 3"));
}

// ---------------------------------------------------------------------------
// RAPTOR consultation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn skip_raptor_never_touches_summary_tree() {
    let h = harness();
    h.chunks.add(h.notebook_id, 0, "a chunk");
    h.summaries.add(h.notebook_id, "a very relevant summary");

    let mut req = request(&h, "a chunk");
    req.reranker_enabled = false;
    req.skip_raptor = true;

    let response = h.pipeline.execute(req, h.user_id).await.unwrap();
    assert_eq!(h.summaries.lookup_count(), 0);
    assert!(response
        .sources
        .iter()
        .all(|s| s.kind == SourceKind::Chunk));
}

#[tokio::test]
async fn include_raptor_surfaces_summary_citations() {
    let h = harness();
    h.chunks.add(h.notebook_id, 0, "a chunk");
    h.summaries.add(h.notebook_id, "a chunk"); // same text → same embedding → tied score

    let mut req = request(&h, "a chunk");
    req.reranker_enabled = false;
    req.skip_raptor = false;

    let response = h.pipeline.execute(req, h.user_id).await.unwrap();
    assert_eq!(h.summaries.lookup_count(), 1);
    assert!(response
        .sources
        .iter()
        .any(|s| s.kind == SourceKind::Summary));
}

// ---------------------------------------------------------------------------
// Session memory
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_turn_sees_first_turns_query_and_answer() {
    let backend = MockBackend::new()
        .with_dimension(DIM)
        .with_scripted_responses(vec![
            "Fridays are remote days.".to_string(),
            "No exceptions listed.".to_string(),
        ]);
    let h = harness_with_backend(backend);
    h.chunks.add(h.notebook_id, 0, "Remote work happens on Fridays.");

    let session_id = Uuid::new_v4();

    let mut first = request(&h, "What is the WFH policy?");
    first.session_id = Some(session_id);
    first.reranker_enabled = false;
    let r1 = h.pipeline.execute(first, h.user_id).await.unwrap();
    assert_eq!(r1.response, "Fridays are remote days.");
    assert!(!r1.metadata.stateless);

    let mut second = request(&h, "Are there exceptions to it?");
    second.session_id = Some(session_id);
    second.reranker_enabled = false;
    let r2 = h.pipeline.execute(second, h.user_id).await.unwrap();

    assert_eq!(r2.metadata.history_messages_used, 1);

    // The second synthesis prompt contains the first turn verbatim
    let calls = h.backend.calls();
    let synth_prompts: Vec<&str> = calls
        .iter()
        .filter(|c| c.operation == "generate")
        .map(|c| c.input.as_str())
        .collect();
    assert_eq!(synth_prompts.len(), 2);
    assert!(synth_prompts[1].contains("What is the WFH policy?"));
    assert!(synth_prompts[1].contains("Fridays are remote days."));
}

#[tokio::test]
async fn stateless_query_records_no_turns() {
    let h = harness();
    h.chunks.add(h.notebook_id, 0, "content");

    let mut req = request(&h, "q");
    req.reranker_enabled = false;
    let response = h.pipeline.execute(req, h.user_id).await.unwrap();

    assert!(response.metadata.stateless);
    assert_eq!(response.metadata.history_messages_used, 0);
    assert!(h.sessions.turns.lock().unwrap().is_empty());
}

#[tokio::test]
async fn expired_session_proceeds_without_memory_and_flags_client() {
    let h = harness();
    h.chunks.add(h.notebook_id, 0, "content");
    let session_id = Uuid::new_v4();

    // Turn 1 establishes history
    let mut first = request(&h, "first question");
    first.session_id = Some(session_id);
    first.reranker_enabled = false;
    h.pipeline.execute(first, h.user_id).await.unwrap();

    // Idle past the 1h TTL
    h.sessions.age_session(session_id, 7200);

    let mut second = request(&h, "second question");
    second.session_id = Some(session_id);
    second.reranker_enabled = false;
    let response = h.pipeline.execute(second, h.user_id).await.unwrap();

    assert!(response.metadata.session_expired);
    assert!(response.metadata.stateless);
    assert_eq!(response.metadata.history_messages_used, 0);

    // Expired turns are not visible to the prompt
    let calls = h.backend.calls();
    let last_prompt = calls
        .iter()
        .filter(|c| c.operation == "generate")
        .last()
        .unwrap();
    assert!(!last_prompt.input.contains("first question"));

    // And the dead session does not accumulate new turns
    assert_eq!(h.sessions.turns.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn session_of_other_user_fails_closed() {
    let h = harness();
    h.chunks.add(h.notebook_id, 0, "content");
    let session_id = Uuid::new_v4();

    let mut first = request(&h, "mine");
    first.session_id = Some(session_id);
    first.reranker_enabled = false;
    h.pipeline.execute(first, h.user_id).await.unwrap();

    // Second caller shares the notebook but presents the same session id
    let second_user = Uuid::new_v4();
    h.notebooks
        .grant(h.notebook_id, second_user, AccessLevel::Viewer);

    let mut req = request(&h, "theirs");
    req.session_id = Some(session_id);
    req.reranker_enabled = false;
    let err = h.pipeline.execute(req, second_user).await.unwrap_err();
    assert!(matches!(err, Error::AccessDenied(_)));
}

// ---------------------------------------------------------------------------
// Validation and metadata
// ---------------------------------------------------------------------------

#[tokio::test]
async fn out_of_range_top_k_is_rejected() {
    let h = harness();
    let mut req = request(&h, "q");
    req.top_k = 100;
    let err = h.pipeline.execute(req, h.user_id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn include_sources_false_omits_sources() {
    let h = harness();
    h.chunks.add(h.notebook_id, 0, "content");
    let mut req = request(&h, "q");
    req.reranker_enabled = false;
    req.include_sources = false;

    let response = h.pipeline.execute(req, h.user_id).await.unwrap();
    assert!(response.sources.is_empty());
    // node_count still reflects what the synthesizer saw
    assert_eq!(response.metadata.node_count, 1);
}

#[tokio::test]
async fn synthesis_failure_after_retry_surfaces_partial_context() {
    let backend = MockBackend::new()
        .with_dimension(DIM)
        .with_generate_failures(2);
    let h = harness_with_backend(backend);
    h.chunks.add(h.notebook_id, 0, "some context");

    let mut req = request(&h, "q");
    req.reranker_enabled = false;

    let err = h.pipeline.execute(req, h.user_id).await.unwrap_err();
    match err {
        Error::Synthesis {
            partial_context, ..
        } => assert_eq!(partial_context.len(), 1),
        other => panic!("expected Synthesis error, got: {:?}", other),
    }
}
