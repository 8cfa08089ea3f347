use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::middleware::request_id::{make_span_with_request_id, request_id_middleware};
use crate::services::RecommendationService;
use crate::sync::{SyncMode, SyncOrchestrator, SyncReport};

pub mod feeds;
pub mod sync;

/// Envelope for every successful list response
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// State of one sync job in the registry
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum JobState {
    Running {
        mode: SyncMode,
        started_at: DateTime<Utc>,
    },
    Finished {
        report: SyncReport,
    },
}

pub type JobRegistry = Arc<RwLock<HashMap<Uuid, JobState>>>;

/// Shared application state: explicitly constructed service objects, no
/// module-level singletons
#[derive(Clone)]
pub struct AppState {
    pub recommendations: Arc<RecommendationService>,
    pub sync: Arc<SyncOrchestrator>,
    pub jobs: JobRegistry,
    pub operator_token: String,
}

/// Creates the application router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// API routes under /api/v1
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/feeds/top-global", get(feeds::top_global))
        .route("/feeds/top-country/:code", get(feeds::top_country))
        .route("/feeds/for-user/:id", get(feeds::for_user))
        .route("/feeds/discover-emerging/:id", get(feeds::discover_emerging))
        .route("/history/recent/:id", get(feeds::recent_history))
        .route("/sync/trigger", post(sync::trigger))
        .route("/sync/status/:id", get(sync::status))
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
