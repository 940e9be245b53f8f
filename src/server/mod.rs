//! HTTP control plane
//!
//! Thin axum surface over the core components. Handlers validate input,
//! call into the [`ControlPlane`](crate::ControlPlane) and translate errors
//! to status codes; none of them carry business logic of their own.

mod routes;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::ControlPlane;

/// Uploads are capped at 100 MB, matching the data-file size the trainer
/// is prepared to normalize in memory.
const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Build the API router.
pub fn router(plane: Arc<ControlPlane>) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/upload-data", post(routes::upload_data))
        .route("/api/start-training", post(routes::start_training))
        .route("/api/training-status/:job_id", get(routes::training_status))
        .route("/api/models", get(routes::list_models))
        .route("/api/models/:model_id", delete(routes::delete_model))
        .route("/api/base-models", get(routes::base_models))
        .route("/api/chat", post(routes::chat))
        .route("/api/advice", post(routes::advice))
        .route("/api/stats", get(routes::stats))
        .route("/api/retrain", post(routes::retrain))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(plane)
}
