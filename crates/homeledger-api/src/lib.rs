//! HTTP JSON API over the import pipeline
//!
//! Routes are organized into modules:
//! - routes::imports: batch submission, confirm, undo
//! - routes::limits: category limit status and evaluation

pub mod error;
pub mod routes;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use homeledger_config::Config;
use homeledger_core::{ImportService, MemoryStore};

pub use error::ApiError;

/// Where the in-memory store is written after every change
#[derive(Clone)]
pub struct Snapshot {
    pub store: Arc<MemoryStore>,
    pub path: PathBuf,
}

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ImportService>,
    pub config: Config,
    pub snapshot: Option<Snapshot>,
}

impl AppState {
    pub fn new(service: ImportService, config: Config) -> Self {
        Self {
            service: Arc::new(service),
            config,
            snapshot: None,
        }
    }

    pub fn with_snapshot(mut self, store: Arc<MemoryStore>, path: PathBuf) -> Self {
        self.snapshot = Some(Snapshot { store, path });
        self
    }

    /// Write the snapshot, if any; failures are logged, not returned
    pub async fn persist(&self) {
        if let Some(snapshot) = &self.snapshot {
            if let Err(e) = snapshot.store.save(&snapshot.path).await {
                log::error!(
                    target: "homeledger::api",
                    "failed to write snapshot {}: {}",
                    snapshot.path.display(),
                    e
                );
            }
        }
    }
}

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    use routes::imports::{api_confirm_batch, api_submit_import, api_undo_batch};
    use routes::limits::{api_evaluate_transaction, api_limit_status};

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/imports", post(api_submit_import))
        .route("/api/imports/:tenant/:batch_id/confirm", post(api_confirm_batch))
        .route("/api/imports/:tenant/:batch_id", delete(api_undo_batch))
        .route("/api/limits/:tenant/status", get(api_limit_status))
        .route("/api/limits/:tenant/evaluate", post(api_evaluate_transaction))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Bind and serve until the server stops
pub async fn start_server(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.bind_address();
    let router = create_router(state);

    let listener = TcpListener::bind(&addr).await?;
    log::info!(target: "homeledger::api", "listening on http://{}", addr);
    log::info!(target: "homeledger::api", "routes: /api/health, /api/imports, /api/limits/:tenant/*");

    axum::serve(listener, router).await?;
    log::info!(target: "homeledger::api", "server stopped");
    Ok(())
}

// ==================== Tests ====================
