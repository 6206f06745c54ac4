//! HTTP and WebSocket surface.
//!
//! Endpoints:
//! - POST /api/search/image          - nearest images to an uploaded image
//! - POST /api/search/video          - nearest videos to an uploaded image
//! - POST /api/search/text           - nearest documents to a text query
//! - GET  /api/collections/{m}/count - items in the active collection for `m`
//! - GET  /api/models                - active image and text models
//! - PUT  /api/models/{kind}         - swap the image or text model
//! - GET  /ws/index                  - indexing session

pub mod error;
pub mod models;
pub mod search;
pub mod ws;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::config::SmartScanConfig;
use crate::coordinator::Coordinator;
use crate::index::IndexOptions;

pub use error::ApiError;

/// Largest accepted request body (query image uploads).
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    config: Arc<Mutex<SmartScanConfig>>,
    /// Where model changes are persisted. `None` keeps them in memory only.
    config_path: Option<PathBuf>,
}

impl AppState {
    pub fn new(
        coordinator: Arc<Coordinator>,
        config: SmartScanConfig,
        config_path: Option<PathBuf>,
    ) -> Self {
        Self {
            coordinator,
            config: Arc::new(Mutex::new(config)),
            config_path,
        }
    }

    pub fn config(&self) -> MutexGuard<'_, SmartScanConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn index_options(&self) -> IndexOptions {
        IndexOptions::from(&self.config().indexing)
    }

    /// Apply `update` to the config and write it back to disk.
    pub fn persist_config(&self, update: impl FnOnce(&mut SmartScanConfig)) -> Result<()> {
        let mut config = self.config();
        update(&mut config);
        if let Some(path) = &self.config_path {
            config.save_to(path)?;
        }
        Ok(())
    }
}

/// Build the axum router with all endpoints.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/api/search/image", post(search::search_images))
        .route("/api/search/video", post(search::search_videos))
        .route("/api/search/text", post(search::search_text))
        .route("/api/collections/{modality}/count", get(search::count))
        .route("/api/models", get(models::active_models))
        .route("/api/models/{kind}", put(models::set_model))
        .route("/ws/index", get(ws::ws_index))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Open the database, load both models and serve until Ctrl-C.
pub async fn serve(config: SmartScanConfig, config_path: PathBuf) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    let coordinator = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || Coordinator::open(&config)).await??
    };
    let state = AppState::new(coordinator.clone(), config, Some(config_path));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "smartscan listening at http://{bind_addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down server");
        })
        .await?;

    coordinator.shutdown();
    Ok(())
}
