//! Shared application state.

use std::sync::Arc;

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, RateLimiter};

use notebase_core::AppConfig;
use notebase_db::Database;
use notebase_inference::ProviderRegistry;
use notebase_retrieval::QueryPipeline;

/// Global rate limiter type (direct quota, no keyed bucketing).
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub pipeline: Arc<QueryPipeline>,
    pub registry: Arc<ProviderRegistry>,
    pub config: Arc<AppConfig>,
    /// Global rate limiter (None when rate limiting is disabled).
    pub rate_limiter: Option<Arc<GlobalRateLimiter>>,
}
