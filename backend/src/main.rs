use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    middleware::from_fn,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod auth;
mod config;
mod database;
mod error;
mod files;
mod handlers;
mod middleware;
mod notifications;
mod store;
mod validation;
mod workflow;


use config::StoreBackend;
use files::{BlobStore, LocalBlobStore, MemoryBlobStore};
use notifications::{LogSignalSink, SignalSink, WebhookSignalSink};
use workflow::WorkflowEngine;

pub struct AppState {
    pub engine: WorkflowEngine,
    pub config: config::Config,
}

/// The full HTTP surface, shared by `main` and the API tests.
pub fn app_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(Any);

    let max_upload_bytes = state.config.blob.max_upload_bytes;

    Router::new()
        .route("/", get(|| async { "Dossier workflow API v1" }))
        .route("/health", get(handlers::health_check))
        .route("/health/detailed", get(middleware::detailed_health_check))
        .nest("/api/v1/dossiers", handlers::dossier_routes())
        .nest("/api/v1/step-instances", handlers::step_instance_routes())
        .nest("/api/v1/fields", handlers::field_routes())
        .nest("/api/v1/documents", handlers::document_routes())
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(from_fn(middleware::request_context))
                .layer(cors),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let store = database::open_store(&config).await?;
    let blobs: Arc<dyn BlobStore> = match config.store_backend {
        StoreBackend::Postgres => Arc::new(LocalBlobStore::new(&config.blob.storage_path)),
        StoreBackend::Memory => Arc::new(MemoryBlobStore::new()),
    };

    let signals: Arc<dyn SignalSink> = match &config.signal.webhook_url {
        Some(url) if config.signal.is_configured() => {
            tracing::info!("Client steps signal goes to {}", url);
            Arc::new(WebhookSignalSink::new(url.clone(), config.signal.timeout)?)
        }
        _ => {
            tracing::warn!("SIGNAL_WEBHOOK_URL not set, client steps signal is only logged");
            Arc::new(LogSignalSink)
        }
    };

    tracing::info!("Approval mode: {:?}", config.workflow.approval_mode);
    let engine = WorkflowEngine::new(store, blobs, signals, config.workflow.clone());
    let server_addr = config.server_addr.clone();
    let app = app_router(Arc::new(AppState { engine, config }));

    let listener = tokio::net::TcpListener::bind(&server_addr).await?;
    tracing::info!("Server running on {}", server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
