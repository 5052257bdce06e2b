//! notebase-api - HTTP API server for notebase

mod auth;
mod error;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::Router;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use notebase_core::{
    defaults, AppConfig, EmbeddingBackend, JobRepository, JobType, ModelResolver, Role,
    TiktokenTokenizer, UserRepository,
};
use notebase_db::{Database, PgUserRepository};
use notebase_inference::{OllamaBackend, OpenAIBackend, ProviderRegistry};
use notebase_jobs::{
    IngestHandler, JobWorker, RaptorBuildHandler, SessionGcHandler, WorkerConfig,
};
use notebase_retrieval::{
    PipelineConfig, QueryPipeline, RaptorBuilder, Retriever, TreeConfig,
};

use crate::state::{AppState, GlobalRateLimiter};

// =============================================================================
// REQUEST ID (UUIDv7)
// =============================================================================

/// Generates time-ordered UUIDv7 request correlation IDs.
///
/// UUIDv7 embeds a Unix timestamp, so IDs sort chronologically — useful for
/// log correlation and debugging production incidents.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

// =============================================================================
// OPENAPI
// =============================================================================

/// OpenAPI documentation served by Swagger UI at `/docs`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Notebase API",
        version = "0.4.2",
        description = "Retrieval-augmented question answering over notebooks of documents"
    ),
    components(schemas(
        notebase_core::QueryRequest,
        notebase_core::QueryResponse,
        notebase_core::QuerySource,
        notebase_core::QueryMetadata,
        notebase_core::QueryTimings,
        notebase_core::NotebookSummary,
        notebase_core::Document,
        notebase_core::DocumentStatus,
        notebase_core::SourceKind,
        notebase_core::AccessLevel,
        notebase_core::Role,
        notebase_core::User,
        handlers::auth::LoginRequest,
        handlers::auth::LoginResponse,
        handlers::auth::RotateRequest,
        handlers::admin::CreateUserRequest,
        handlers::admin::CreateUserResponse,
        handlers::admin::SetAccessRequest,
        handlers::notebooks::CreateNotebookRequest,
        handlers::notebooks::UploadResponse,
    )),
    tags(
        (name = "Query", description = "Retrieval-augmented queries"),
        (name = "Notebooks", description = "Notebook and document management"),
        (name = "Auth", description = "Login, API keys, credential rotation"),
        (name = "Admin", description = "User and access administration"),
        (name = "System", description = "Health and models")
    )
)]
struct ApiDoc;

// =============================================================================
// BOOTSTRAP
// =============================================================================

/// Initialize tracing: env-filter console layer plus an optional rolling file
/// appender when `NOTEBASE_LOG_DIR` is set.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,sqlx=warn"));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    match std::env::var("NOTEBASE_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "notebase-api.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
            Some(guard)
        }
        Err(_) => {
            registry.init();
            None
        }
    }
}

/// Build the embedding backend: OpenAI when an API key is configured, local
/// Ollama otherwise. Overridable via `NOTEBASE_EMBED_PROVIDER`.
fn embedding_backend_from_env() -> anyhow::Result<Arc<dyn EmbeddingBackend>> {
    let provider = std::env::var("NOTEBASE_EMBED_PROVIDER").unwrap_or_else(|_| {
        if std::env::var("OPENAI_API_KEY").map(|k| !k.is_empty()).unwrap_or(false) {
            "openai".to_string()
        } else {
            "ollama".to_string()
        }
    });

    let backend: Arc<dyn EmbeddingBackend> = match provider.as_str() {
        "openai" => Arc::new(OpenAIBackend::from_env()?),
        "ollama" => Arc::new(OllamaBackend::from_env()),
        other => anyhow::bail!("unknown embedding provider: {}", other),
    };

    info!(
        provider = %provider,
        model = backend.model_name(),
        dimension = backend.dimension(),
        "Embedding backend configured"
    );
    if backend.dimension() != defaults::EMBED_DIMENSION {
        warn!(
            configured = backend.dimension(),
            schema = defaults::EMBED_DIMENSION,
            "Embedding dimension differs from the migrated vector column width"
        );
    }
    Ok(backend)
}

/// First-run bootstrap: create the admin account with a random (or
/// `ADMIN_INITIAL_PASSWORD`-seeded) credential that must be rotated before
/// the deployment serves anything else. There is no standing default
/// password.
async fn bootstrap_admin(db: &Database) -> anyhow::Result<()> {
    if db.users.count().await? > 0 {
        return Ok(());
    }

    let password = std::env::var("ADMIN_INITIAL_PASSWORD")
        .ok()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(PgUserRepository::random_password);

    let (user, key) = db
        .users
        .create_user(
            defaults::BOOTSTRAP_ADMIN_USERNAME,
            &password,
            Role::Admin,
            true,
        )
        .await?;

    // Logged once, then gone: the operator must log in and rotate before the
    // API accepts anything else from this account.
    warn!(
        user_id = %user.id,
        username = defaults::BOOTSTRAP_ADMIN_USERNAME,
        bootstrap_password = %password,
        api_key = %key.secret,
        "First-run admin created; rotation required before use (POST /api/auth/rotate)"
    );
    Ok(())
}

// =============================================================================
// ROUTER
// =============================================================================

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

async fn rate_limit_middleware(
    axum::extract::State(state): axum::extract::State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    if let Some(limiter) = &state.rate_limiter {
        if limiter.check().is_err() {
            return axum::http::StatusCode::TOO_MANY_REQUESTS.into_response();
        }
    }
    next.run(request).await
}

fn build_router(state: AppState) -> Router {
    let cors = match std::env::var("NOTEBASE_CORS_ORIGIN") {
        Ok(origin) if origin != "*" => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(
                origin.parse::<HeaderValue>().unwrap_or_else(|_| {
                    HeaderValue::from_static("http://localhost:7860")
                }),
            ))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
        _ => CorsLayer::permissive(),
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/query", post(handlers::query::query))
        .route("/api/query/notebooks", get(handlers::query::list_notebooks))
        .route("/api/models", get(handlers::query::list_models))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/me", get(handlers::auth::me))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/api-key", post(handlers::auth::regenerate_api_key))
        .route("/api/auth/rotate", post(handlers::auth::rotate))
        .route("/api/admin/users", post(handlers::admin::create_user).get(handlers::admin::list_users))
        .route(
            "/api/admin/notebooks/:id/access",
            post(handlers::admin::set_access),
        )
        .route("/api/notebooks", post(handlers::notebooks::create_notebook))
        .route(
            "/api/notebooks/:id",
            delete(handlers::notebooks::delete_notebook),
        )
        .route(
            "/api/notebooks/:id/documents",
            post(handlers::notebooks::upload_document)
                .get(handlers::notebooks::list_documents),
        )
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(RequestBodyLimitLayer::new(
            // Uploads dominate; leave headroom for multipart framing
            state.config.ingestion.max_upload_bytes + 1024 * 1024,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_tracing();

    // Configuration: defaults → yaml files → env
    let config_dir = std::env::var("NOTEBASE_CONFIG_DIR").ok().map(PathBuf::from);
    let config = AppConfig::load(config_dir.as_deref())?;
    config.validate()?;
    let config = Arc::new(config);

    // Database
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool =
        notebase_db::create_pool_with_config(&database_url, notebase_db::PoolConfig::from_env())
            .await?;
    let db = Database::new(pool);
    db.migrate().await?;

    bootstrap_admin(&db).await?;

    // Inference
    let registry = Arc::new(ProviderRegistry::from_env());
    let embed = embedding_backend_from_env()?;
    let tokenizer = Arc::new(TiktokenTokenizer::cl100k()?);

    // Query pipeline
    let retriever = Retriever::new(
        Arc::new(db.chunks.clone()),
        Arc::new(db.summaries.clone()),
    );
    let pipeline = Arc::new(QueryPipeline::new(
        Arc::new(db.notebooks.clone()),
        retriever,
        Arc::new(db.sessions.clone()),
        embed.clone(),
        registry.clone(),
        tokenizer.clone(),
        PipelineConfig {
            retrieval: config.retrieval.clone(),
            session: config.session.clone(),
        },
    ));

    // Background workers
    let jobs: Arc<dyn JobRepository> = Arc::new(db.jobs.clone());
    let worker = JobWorker::new(jobs.clone(), WorkerConfig::from_env());
    worker
        .register_handler(IngestHandler::new(
            Arc::new(db.documents.clone()),
            Arc::new(db.chunks.clone()),
            jobs.clone(),
            embed.clone(),
            tokenizer.clone(),
            config.ingestion.clone(),
            config.raptor.enabled,
        ))
        .await;
    worker
        .register_handler(RaptorBuildHandler::new(
            Arc::new(db.chunks.clone()),
            Arc::new(db.summaries.clone()),
            RaptorBuilder::new(
                registry.resolve(None)?,
                embed.clone(),
                TreeConfig::from(&config.raptor),
            ),
        ))
        .await;
    worker
        .register_handler(SessionGcHandler::new(
            Arc::new(db.sessions.clone()),
            config.session.clone(),
        ))
        .await;
    let worker_handle = worker.start();

    // Periodic session GC sweeps
    {
        let jobs = jobs.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                defaults::SESSION_GC_INTERVAL_SECS,
            ));
            loop {
                interval.tick().await;
                if let Err(e) = jobs
                    .queue_deduplicated(
                        JobType::SessionGc,
                        None,
                        None,
                        JobType::SessionGc.default_priority(),
                    )
                    .await
                {
                    warn!(error = %e, "Failed to queue session GC sweep");
                }
            }
        });
    }

    // Rate limiting
    let rate_limiter = match std::env::var("NOTEBASE_RATE_LIMIT_DISABLED").as_deref() {
        Ok("1") | Ok("true") => None,
        _ => {
            let per_minute = std::env::var("NOTEBASE_RATE_LIMIT_REQUESTS")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .and_then(NonZeroU32::new)
                .unwrap_or_else(|| {
                    NonZeroU32::new(defaults::RATE_LIMIT_REQUESTS as u32)
                        .expect("default rate limit is nonzero")
                });
            Some(Arc::new(GlobalRateLimiter::direct(Quota::per_minute(
                per_minute,
            ))))
        }
    };

    let state = AppState {
        db,
        pipeline,
        registry,
        config: config.clone(),
        rate_limiter,
    };

    let app = build_router(state);

    let port = std::env::var("NOTEBASE_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(defaults::SERVER_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "notebase-api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    worker_handle.shutdown().await.ok();
    info!("notebase-api stopped");
    Ok(())
}
