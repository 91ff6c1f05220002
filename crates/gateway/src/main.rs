//! Doc-Talk API Gateway
//!
//! HTTP front door for chatting with an uploaded PDF.
//! Handles:
//! - Session lifecycle
//! - Document upload and indexing
//! - Conversational question answering
//! - Observability (logging, metrics, tracing)

mod handlers;
mod middleware;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use doctalk_common::{
    config::AppConfig,
    embeddings::{create_embedder, Embedder},
    llm::{create_chat_model, ChatModel},
    metrics,
    session::SessionStore,
    telemetry::init_tracing,
};
use doctalk_ingestion::{ChunkingConfig, Ingestor};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: Arc<SessionStore>,
    pub embedder: Arc<dyn Embedder>,
    pub llm: Arc<dyn ChatModel>,
    pub ingestor: Arc<Ingestor>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatModel>,
    ) -> anyhow::Result<Self> {
        let ingestor = Ingestor::new(embedder.clone(), ChunkingConfig::from(&config.chunking))?
            .with_metric(config.retrieval.metric);
        let sessions = SessionStore::new(config.session.ttl(), config.session.upload_dir.clone());

        Ok(Self {
            config: Arc::new(config),
            sessions: Arc::new(sessions),
            embedder,
            llm,
            ingestor: Arc::new(ingestor),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;

    init_tracing(&config.observability)?;

    info!("Starting Doc-Talk API Gateway v{}", doctalk_common::VERSION);

    // Initialize metrics
    metrics::register_metrics();
    if config.observability.metrics_port != 0 {
        install_metrics_exporter(config.observability.metrics_port)?;
    }

    let embedder = create_embedder(&config.embedding)?;
    let llm = create_chat_model(&config.llm)?;

    tokio::fs::create_dir_all(&config.session.upload_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create upload directory {}",
                config.session.upload_dir.display()
            )
        })?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    let reap_interval = config.session.reap_interval();

    let state = AppState::new(config, embedder, llm)?;
    let reaper = state.sessions.clone().spawn_reaper(reap_interval);

    // Build the router
    let app = create_router(state);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.abort();
    info!("Server shutdown complete");
    Ok(())
}

fn install_metrics_exporter(port: u16) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(
            Matcher::Suffix("llm_duration_seconds".to_string()),
            metrics::LLM_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("embedding_duration_seconds".to_string()),
            metrics::EMBEDDING_BUCKETS,
        )?
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!(port, "Prometheus exporter listening");
    Ok(())
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let upload_limit = state.config.server.max_upload_bytes;
    let request_timeout = state.config.request_timeout();

    // Session endpoints
    let api_routes = Router::new()
        .route("/sessions", post(handlers::sessions::create_session))
        .route(
            "/sessions/{id}",
            get(handlers::sessions::get_session).delete(handlers::sessions::delete_session),
        )
        .route(
            "/sessions/{id}/document",
            post(handlers::documents::upload_document),
        )
        .route("/sessions/{id}/chat", post(handlers::chat::chat))
        .route("/sessions/{id}/history", get(handlers::chat::history));

    // Compose the app
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .route_layer(from_fn(middleware::metrics::track_requests))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
