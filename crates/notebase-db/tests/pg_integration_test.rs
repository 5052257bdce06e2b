//! Postgres integration tests.
//!
//! These require a migrated database (pgvector extension available) at
//! `DATABASE_URL` and are ignored by default:
//!
//! ```sh
//! DATABASE_URL=postgres://localhost/notebase_test cargo test -p notebase-db -- --ignored
//! ```

use std::time::Duration;

use pgvector::Vector;
use uuid::Uuid;

use notebase_core::{
    AccessLevel, ChunkRepository, DocumentRepository, DocumentStatus, JobRepository, JobType,
    NewChunk, NotebookRepository, Role, SessionRepository, SessionState, UserRepository,
};
use notebase_db::Database;

const DIM: usize = 1536;

async fn database() -> Database {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for -- --ignored");
    Database::connect(&url).await.expect("connect")
}

fn vec_with(seed: f32) -> Vector {
    let mut v = vec![0.0_f32; DIM];
    v[0] = seed;
    v[1] = 1.0 - seed;
    Vector::from(v)
}

async fn seeded_user(db: &Database) -> Uuid {
    let username = format!("it-user-{}", Uuid::new_v4());
    let (user, _key) = db
        .users
        .create_user(&username, "integration-password", Role::Member, false)
        .await
        .expect("create user");
    user.id
}

async fn seeded_ready_document(db: &Database, notebook_id: Uuid, seed: f32) -> Uuid {
    let doc_id = db
        .documents
        .insert(notebook_id, "it.txt", "text/plain", b"integration body")
        .await
        .expect("insert document");

    let chunks = (0..3)
        .map(|i| NewChunk {
            seq: i,
            text: format!("chunk {}", i),
            token_count: 2,
            embedding: vec_with(seed + i as f32 * 0.01),
            model: "it-model".to_string(),
        })
        .collect();
    db.chunks
        .store_ready(doc_id, chunks)
        .await
        .expect("store chunks");
    doc_id
}

#[tokio::test]
#[ignore]
async fn chunk_search_is_notebook_isolated() {
    let db = database().await;
    let user_id = seeded_user(&db).await;

    let notebook_a = db.notebooks.create("it-a", user_id).await.unwrap();
    let notebook_b = db.notebooks.create("it-b", user_id).await.unwrap();
    seeded_ready_document(&db, notebook_a, 0.1).await;
    seeded_ready_document(&db, notebook_b, 0.1).await;

    let hits = db
        .chunks
        .find_similar(notebook_a, &vec_with(0.1), 10)
        .await
        .unwrap();

    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.notebook_id == notebook_a));

    db.notebooks.delete(notebook_a).await.unwrap();
    db.notebooks.delete(notebook_b).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn unready_documents_are_invisible_to_search() {
    let db = database().await;
    let user_id = seeded_user(&db).await;
    let notebook_id = db.notebooks.create("it-vis", user_id).await.unwrap();

    // Uploaded but never chunked: stays invisible
    let doc_id = db
        .documents
        .insert(notebook_id, "pending.txt", "text/plain", b"pending")
        .await
        .unwrap();
    db.documents
        .set_status(doc_id, DocumentStatus::Processing, None)
        .await
        .unwrap();

    let hits = db
        .chunks
        .find_similar(notebook_id, &vec_with(0.2), 10)
        .await
        .unwrap();
    assert!(hits.is_empty());

    db.notebooks.delete(notebook_id).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn notebook_delete_cascades() {
    let db = database().await;
    let user_id = seeded_user(&db).await;
    let notebook_id = db.notebooks.create("it-cascade", user_id).await.unwrap();
    seeded_ready_document(&db, notebook_id, 0.3).await;

    let session_id = Uuid::new_v4();
    db.sessions
        .get_or_create(session_id, notebook_id, user_id, Duration::from_secs(3600))
        .await
        .unwrap();
    db.sessions
        .append_turn(session_id, "q", "a", &[])
        .await
        .unwrap();

    db.notebooks.delete(notebook_id).await.unwrap();

    assert_eq!(db.chunks.count_for_notebook(notebook_id).await.unwrap(), 0);
    assert!(db.notebooks.get(notebook_id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn session_expiry_applies_on_access() {
    let db = database().await;
    let user_id = seeded_user(&db).await;
    let notebook_id = db.notebooks.create("it-session", user_id).await.unwrap();

    let session_id = Uuid::new_v4();
    let created = db
        .sessions
        .get_or_create(session_id, notebook_id, user_id, Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(created.state, SessionState::Active);

    // Zero TTL: the next access expires it
    let reread = db
        .sessions
        .get_or_create(session_id, notebook_id, user_id, Duration::from_secs(0))
        .await
        .unwrap();
    assert_eq!(reread.state, SessionState::Expired);

    db.notebooks.delete(notebook_id).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn job_claim_honors_type_filter_and_backoff() {
    let db = database().await;

    let job_id = db
        .jobs
        .queue(JobType::SessionGc, None, None, 8)
        .await
        .unwrap();

    // Wrong type: not claimable
    assert!(db
        .jobs
        .claim_next(&[JobType::Ingest])
        .await
        .unwrap()
        .is_none());

    // Right type: claimed exactly once
    let claimed = db
        .jobs
        .claim_next(&[JobType::SessionGc])
        .await
        .unwrap()
        .expect("claim");
    assert_eq!(claimed.id, job_id);

    // Retry pushes next_run_at into the future: not immediately claimable
    db.jobs
        .retry_later(job_id, "transient", Duration::from_secs(600))
        .await
        .unwrap();
    assert!(db
        .jobs
        .claim_next(&[JobType::SessionGc])
        .await
        .unwrap()
        .is_none());

    db.jobs.fail(job_id, "cleanup").await.unwrap();
}

#[tokio::test]
#[ignore]
async fn access_grants_round_trip() {
    let db = database().await;
    let owner = seeded_user(&db).await;
    let viewer = seeded_user(&db).await;
    let notebook_id = db.notebooks.create("it-access", owner).await.unwrap();

    assert_eq!(
        db.notebooks.access_level(notebook_id, owner).await.unwrap(),
        Some(AccessLevel::Owner)
    );
    assert_eq!(
        db.notebooks.access_level(notebook_id, viewer).await.unwrap(),
        None
    );

    db.notebooks
        .set_access(notebook_id, viewer, Some(AccessLevel::Viewer))
        .await
        .unwrap();
    assert_eq!(
        db.notebooks.access_level(notebook_id, viewer).await.unwrap(),
        Some(AccessLevel::Viewer)
    );

    db.notebooks
        .set_access(notebook_id, viewer, None)
        .await
        .unwrap();
    assert_eq!(
        db.notebooks.access_level(notebook_id, viewer).await.unwrap(),
        None
    );

    db.notebooks.delete(notebook_id).await.unwrap();
}
