//! RAPTOR tree rebuild jobs.
//!
//! Builds are staged under a fresh build id and published with an atomic
//! pointer flip, so concurrent queries keep reading one complete tree for
//! the whole duration. Queue deduplication keeps rebuild pressure bounded at
//! one pending job per notebook.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use notebase_core::{ChunkRepository, JobType, NewSummaryNode, SummaryNodeRepository, Vector};
use notebase_retrieval::{BuiltNode, RaptorBuilder};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Handler for `raptor_build` jobs.
pub struct RaptorBuildHandler {
    chunks: Arc<dyn ChunkRepository>,
    summaries: Arc<dyn SummaryNodeRepository>,
    builder: RaptorBuilder,
}

impl RaptorBuildHandler {
    pub fn new(
        chunks: Arc<dyn ChunkRepository>,
        summaries: Arc<dyn SummaryNodeRepository>,
        builder: RaptorBuilder,
    ) -> Self {
        Self {
            chunks,
            summaries,
            builder,
        }
    }
}

fn to_new_node(node: BuiltNode) -> NewSummaryNode {
    NewSummaryNode {
        id: node.id,
        level: node.level,
        parent_id: node.parent_id,
        child_ids: node.child_ids,
        child_chunk_ids: node.child_chunk_ids,
        text: node.text,
        embedding: Vector::from(node.embedding),
    }
}

#[async_trait]
impl JobHandler for RaptorBuildHandler {
    fn job_type(&self) -> JobType {
        JobType::RaptorBuild
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let Some(notebook_id) = ctx.notebook_id() else {
            return JobResult::Failed("raptor_build job has no notebook id".to_string());
        };

        let chunks = match self.chunks.for_notebook(notebook_id).await {
            Ok(chunks) => chunks,
            Err(e) => return JobResult::Retry(e.to_string()),
        };

        if chunks.is_empty() {
            debug!(
                subsystem = "jobs",
                component = "raptor_build",
                notebook_id = %notebook_id,
                "No visible chunks, nothing to build"
            );
            return JobResult::Success;
        }

        // The builder degrades internally on per-cluster failures; an Err
        // here means the whole build was impossible (e.g. provider down).
        let nodes = match self.builder.build(&chunks).await {
            Ok(nodes) => nodes,
            Err(e) => return JobResult::Retry(format!("tree build failed: {}", e)),
        };

        if nodes.is_empty() {
            debug!(
                subsystem = "jobs",
                component = "raptor_build",
                notebook_id = %notebook_id,
                chunk_count = chunks.len(),
                "Build produced no summary nodes"
            );
            return JobResult::Success;
        }

        let build_id = Uuid::new_v4();
        let node_count = nodes.len();
        let new_nodes: Vec<NewSummaryNode> = nodes.into_iter().map(to_new_node).collect();

        if let Err(e) = self
            .summaries
            .insert_build(notebook_id, build_id, new_nodes)
            .await
        {
            return JobResult::Retry(format!("staging build failed: {}", e));
        }

        if let Err(e) = self.summaries.activate_build(notebook_id, build_id).await {
            return JobResult::Retry(format!("activating build failed: {}", e));
        }

        info!(
            subsystem = "jobs",
            component = "raptor_build",
            notebook_id = %notebook_id,
            build_id = %build_id,
            chunk_count = chunks.len(),
            node_count,
            "Summary tree rebuilt and activated"
        );
        JobResult::Success
    }
}
