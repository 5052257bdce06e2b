//! # notebase-jobs
//!
//! Background job processing for notebase:
//!
//! - [`worker`]: the claim/execute loop with bounded concurrency
//! - [`ingest`]: document extraction, chunking, and embedding
//! - [`raptor_build`]: RAPTOR summary tree rebuilds
//! - [`session_gc`]: session expiry and garbage collection

pub mod handler;
pub mod ingest;
pub mod raptor_build;
pub mod session_gc;
pub mod worker;

pub use handler::{JobContext, JobHandler, JobResult};
pub use ingest::IngestHandler;
pub use raptor_build::RaptorBuildHandler;
pub use session_gc::SessionGcHandler;
pub use worker::{JobWorker, WorkerConfig, WorkerEvent, WorkerHandle};

// Re-export core types
pub use notebase_core::*;
