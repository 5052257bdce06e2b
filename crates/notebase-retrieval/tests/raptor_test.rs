//! RAPTOR builder tests: reproducibility, structure, and degradation.

use std::sync::Arc;

use uuid::Uuid;

use notebase_core::{Chunk, Vector};
use notebase_inference::MockBackend;
use notebase_retrieval::{BuiltNode, RaptorBuilder, TreeConfig};

const DIM: usize = 8;

fn chunk(notebook_id: Uuid, seq: i32, text: &str, embedding: Vec<f32>) -> Chunk {
    Chunk {
        id: Uuid::now_v7(),
        document_id: Uuid::new_v4(),
        notebook_id,
        seq,
        text: text.to_string(),
        token_count: 10,
        embedding: Vector::from(embedding),
        model: "mock-model".to_string(),
    }
}

/// Two well-separated groups of similar chunks.
fn two_cluster_corpus(notebook_id: Uuid) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for i in 0..4 {
        // Group A: near [1, ε, ...]
        let mut e = vec![0.0_f32; DIM];
        e[0] = 1.0;
        e[1] = 0.05 * i as f32;
        chunks.push(chunk(notebook_id, i, &format!("group a fact {}", i), e));
    }
    for i in 0..4 {
        // Group B: near [ε, 1, ...]
        let mut e = vec![0.0_f32; DIM];
        e[1] = 1.0;
        e[0] = 0.05 * i as f32;
        chunks.push(chunk(
            notebook_id,
            4 + i,
            &format!("group b fact {}", i),
            e,
        ));
    }
    chunks
}

fn config() -> TreeConfig {
    TreeConfig {
        max_depth: 3,
        branching_factor: 4,
        min_cluster_size: 2,
        similarity_threshold: 0.5,
        summary_input_tokens: 1000,
    }
}

/// Structure fingerprint independent of the random node ids.
fn fingerprint(nodes: &[BuiltNode]) -> Vec<(i32, usize, usize, String)> {
    let mut fp: Vec<(i32, usize, usize, String)> = nodes
        .iter()
        .map(|n| {
            (
                n.level,
                n.child_ids.len(),
                n.child_chunk_ids.len(),
                n.text.clone(),
            )
        })
        .collect();
    fp.sort();
    fp
}

#[tokio::test]
async fn identical_inputs_build_structurally_identical_trees() {
    let notebook_id = Uuid::new_v4();
    let chunks = two_cluster_corpus(notebook_id);

    let backend = Arc::new(MockBackend::new().with_dimension(DIM));
    let builder = RaptorBuilder::new(backend.clone(), backend.clone(), config());

    let first = builder.build(&chunks).await.unwrap();
    let second = builder.build(&chunks).await.unwrap();

    assert!(!first.is_empty());
    assert_eq!(fingerprint(&first), fingerprint(&second));
}

#[tokio::test]
async fn level_one_nodes_wrap_their_chunks() {
    let notebook_id = Uuid::new_v4();
    let chunks = two_cluster_corpus(notebook_id);

    let backend = Arc::new(MockBackend::new().with_dimension(DIM));
    let builder = RaptorBuilder::new(backend.clone(), backend, config());
    let nodes = builder.build(&chunks).await.unwrap();

    let level_one: Vec<&BuiltNode> = nodes.iter().filter(|n| n.level == 1).collect();
    assert!(!level_one.is_empty());

    // Every chunk belongs to exactly one level-1 node
    let mut covered: Vec<Uuid> = level_one
        .iter()
        .flat_map(|n| n.child_chunk_ids.iter().copied())
        .collect();
    covered.sort();
    covered.dedup();
    assert_eq!(covered.len(), chunks.len());

    // Level-1 nodes reference chunks, not summary children
    assert!(level_one.iter().all(|n| n.child_ids.is_empty()));
    // Branching bound respected
    assert!(level_one
        .iter()
        .all(|n| n.child_chunk_ids.len() <= config().branching_factor));
}

#[tokio::test]
async fn parents_link_children_upward() {
    let notebook_id = Uuid::new_v4();
    let chunks = two_cluster_corpus(notebook_id);

    let backend = Arc::new(MockBackend::new().with_dimension(DIM));
    let builder = RaptorBuilder::new(backend.clone(), backend, config());
    let nodes = builder.build(&chunks).await.unwrap();

    for node in &nodes {
        if let Some(parent_id) = node.parent_id {
            let parent = nodes
                .iter()
                .find(|n| n.id == parent_id)
                .expect("parent exists in arena");
            assert!(parent.level > node.level);
            assert!(parent.child_ids.contains(&node.id));
        }
    }

    // Acyclic by construction: levels strictly increase toward roots, and
    // at most a handful of roots remain.
    let roots = nodes.iter().filter(|n| n.parent_id.is_none()).count();
    assert!(roots >= 1);
}

#[tokio::test]
async fn tiny_corpus_builds_no_tree() {
    let notebook_id = Uuid::new_v4();
    let chunks = vec![chunk(notebook_id, 0, "only one", vec![1.0; DIM])];

    let backend = Arc::new(MockBackend::new().with_dimension(DIM));
    let builder = RaptorBuilder::new(backend.clone(), backend, config());
    let nodes = builder.build(&chunks).await.unwrap();
    assert!(nodes.is_empty());
}

#[tokio::test]
async fn summarize_failure_degrades_to_unmerged_members() {
    let notebook_id = Uuid::new_v4();
    let chunks = two_cluster_corpus(notebook_id);

    // Every summarization fails
    let backend = Arc::new(
        MockBackend::new()
            .with_dimension(DIM)
            .with_generate_failures(usize::MAX / 2),
    );
    let builder = RaptorBuilder::new(backend.clone(), backend, config());

    // Build succeeds with an empty arena: members stayed independent
    let nodes = builder.build(&chunks).await.unwrap();
    assert!(nodes.is_empty());
}

#[tokio::test]
async fn partial_summarize_failure_keeps_other_clusters() {
    let notebook_id = Uuid::new_v4();
    let chunks = two_cluster_corpus(notebook_id);

    // First cluster summary fails, the rest succeed
    let backend = Arc::new(
        MockBackend::new()
            .with_dimension(DIM)
            .with_generate_failures(1)
            .with_fixed_response("a cluster summary"),
    );
    let builder = RaptorBuilder::new(backend.clone(), backend, config());

    let nodes = builder.build(&chunks).await.unwrap();
    // The surviving cluster produced at least one node
    assert!(!nodes.is_empty());
    // And the failed cluster's chunks are not wrapped by any node
    let covered: usize = nodes
        .iter()
        .filter(|n| n.level == 1)
        .map(|n| n.child_chunk_ids.len())
        .sum();
    assert!(covered < chunks.len());
}
