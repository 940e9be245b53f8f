//! Route handlers for the control-plane API

use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::advisor::FinancialProfile;
use crate::artifacts;
use crate::error::Error;
use crate::training::TrainingRequest;
use crate::ControlPlane;

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            success: false,
            error: message.into(),
        }),
    )
        .into_response()
}

fn internal_error(e: &Error) -> Response {
    error!("request failed: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub async fn health() -> Response {
    Json(json!({
        "status": "healthy",
        "message": "tuneserve API is running",
        "timestamp": Utc::now().to_rfc3339(),
    }))
    .into_response()
}

/// Strip anything path-like from an uploaded filename.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn allowed_extension(name: &str) -> bool {
    matches!(
        std::path::Path::new(name)
            .extension()
            .and_then(|e| e.to_str()),
        Some("json") | Some("jsonl")
    )
}

fn count_rows(filename: &str, content: &[u8]) -> usize {
    if filename.ends_with(".json") {
        let Ok(payload) = serde_json::from_slice::<serde_json::Value>(content) else {
            return 0;
        };
        crate::data::unwrap_examples(&payload)
            .map(|examples| examples.len())
            .unwrap_or(1)
    } else {
        content
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .count()
    }
}

pub async fn upload_data(
    State(plane): State<Arc<ControlPlane>>,
    mut multipart: Multipart,
) -> Response {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return error_response(StatusCode::BAD_REQUEST, "No file provided"),
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        };
        if field.name() != Some("file") {
            continue;
        }
        return store_upload(&plane, field).await;
    }
}

async fn store_upload(
    plane: &ControlPlane,
    field: axum::extract::multipart::Field<'_>,
) -> Response {
    let filename = match field.file_name() {
        Some(name) if !name.is_empty() => sanitize_filename(name),
        _ => return error_response(StatusCode::BAD_REQUEST, "No file selected"),
    };
    if !allowed_extension(&filename) {
        return error_response(StatusCode::BAD_REQUEST, "Invalid file type");
    }

    let content = match field.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let file_id = format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), filename);
    let data_dir = &plane.config().paths.data_dir;
    if let Err(e) = std::fs::create_dir_all(data_dir) {
        return internal_error(&e.into());
    }
    if let Err(e) = std::fs::write(data_dir.join(&file_id), &content) {
        return internal_error(&e.into());
    }

    let rows = count_rows(&filename, &content);
    info!("uploaded training file {} ({} rows)", file_id, rows);
    Json(json!({
        "success": true,
        "message": "Data uploaded successfully",
        "file_id": file_id,
        "filename": filename,
        "rows": rows,
        "uploaded_at": Utc::now().to_rfc3339(),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct StartTrainingBody {
    pub file_id: String,
    pub model_name: String,
    pub max_steps: Option<u32>,
    pub learning_rate: Option<f64>,
    pub batch_size: Option<usize>,
    pub output_name: Option<String>,
}

pub async fn start_training(
    State(plane): State<Arc<ControlPlane>>,
    Json(body): Json<StartTrainingBody>,
) -> Response {
    let config = plane.config();
    let data_path = config.paths.data_dir.join(&body.file_id);
    if !data_path.exists() {
        return error_response(StatusCode::NOT_FOUND, "File not found");
    }

    let output_name = body
        .output_name
        .unwrap_or_else(|| format!("model_{}", Utc::now().format("%Y%m%d_%H%M%S")));
    let request = TrainingRequest {
        job_id: format!("train_{}", Uuid::new_v4()),
        data_path,
        base_model: body.model_name,
        output_dir: config.paths.models_dir.join(&output_name),
        max_steps: body.max_steps.unwrap_or(config.training.max_steps),
        learning_rate: body.learning_rate.unwrap_or(config.training.learning_rate),
        batch_size: body.batch_size.unwrap_or(config.training.batch_size),
    };

    let handle = plane.start_training(request);
    Json(json!({
        "success": true,
        "training_id": handle.job_id,
        "message": "Training started",
        "model_output": output_name,
    }))
    .into_response()
}

pub async fn training_status(
    State(plane): State<Arc<ControlPlane>>,
    Path(job_id): Path<String>,
) -> Response {
    match plane.registry().get(&job_id) {
        Some(status) => Json(status).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Training ID not found"),
    }
}

pub async fn list_models(State(plane): State<Arc<ControlPlane>>) -> Response {
    match artifacts::list_models(&plane.config().paths.models_dir) {
        Ok(models) => Json(json!({ "models": models })).into_response(),
        Err(e) => internal_error(&e),
    }
}

pub async fn delete_model(
    State(plane): State<Arc<ControlPlane>>,
    Path(model_id): Path<String>,
) -> Response {
    match artifacts::delete_model(&plane.config().paths.models_dir, &model_id) {
        Ok(()) => Json(json!({
            "success": true,
            "message": format!("Model {model_id} deleted"),
        }))
        .into_response(),
        Err(Error::ModelNotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, "Model not found")
        }
        Err(e) => internal_error(&e),
    }
}

pub async fn base_models() -> Response {
    Json(json!({
        "models": [
            {
                "id": "tinylm/base",
                "name": "TinyLM Base",
                "description": "Byte-level reference model, trains on CPU",
                "size": "1MB",
                "recommended": true,
            },
        ]
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub model_id: String,
    pub message: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f64>,
    pub session_id: Option<String>,
}

pub async fn chat(
    State(plane): State<Arc<ControlPlane>>,
    Json(body): Json<ChatBody>,
) -> Response {
    let chat_config = &plane.config().chat;
    let result = plane
        .chat(
            &body.model_id,
            &body.message,
            body.max_tokens.unwrap_or(chat_config.max_tokens),
            body.temperature.unwrap_or(chat_config.temperature),
            body.session_id,
        )
        .await;

    match result {
        Ok(response) => Json(json!({
            "success": true,
            "response": response,
            "model_id": body.model_id,
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .into_response(),
        Err(Error::ModelNotFound(_)) => error_response(StatusCode::NOT_FOUND, "Model not found"),
        Err(e) => internal_error(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct AdviceBody {
    pub model_id: String,
    #[serde(flatten)]
    pub profile: FinancialProfile,
    pub session_id: Option<String>,
}

pub async fn advice(
    State(plane): State<Arc<ControlPlane>>,
    Json(body): Json<AdviceBody>,
) -> Response {
    match plane
        .advise(&body.model_id, &body.profile, body.session_id)
        .await
    {
        Ok(response) => Json(json!({
            "success": true,
            "response": response,
            "model_id": body.model_id,
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .into_response(),
        Err(Error::ModelNotFound(_)) => error_response(StatusCode::NOT_FOUND, "Model not found"),
        Err(e) => internal_error(&e),
    }
}

pub async fn stats(State(plane): State<Arc<ControlPlane>>) -> Response {
    match plane.store().stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => internal_error(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RetrainBody {
    pub model_id: String,
}

pub async fn retrain(
    State(plane): State<Arc<ControlPlane>>,
    Json(body): Json<RetrainBody>,
) -> Response {
    if body.model_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "model_id required");
    }
    let training_id = plane.spawn_retrain(&body.model_id);
    Json(json!({
        "success": true,
        "training_id": training_id,
        "message": "Retraining started with new conversations",
    }))
    .into_response()
}
