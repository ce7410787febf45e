//! Request handlers for the HTTP surface

use super::preflight::{clarification_questions, PreflightRequest, PreflightResponse};
use crate::error::{sanitize_error_message, PipelineError};
use crate::pipeline::PipelineHost;
use crate::run::{new_preflight_id, validate_idea_text, RunStatus};
use crate::store::StoreError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use tracing::{debug, error, info};
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};

#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    pub idea_text: String,
    #[serde(default)]
    pub preset_id: Option<String>,
    /// Answers from a preflight round. Accepted but not used by the pipeline.
    #[serde(default)]
    pub preflight_data: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct CreateRunResponse {
    pub run_id: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    timestamp: DateTime<Utc>,
}

type JsonReply = WithStatus<Json>;

fn reply<T: Serialize>(body: &T, status: StatusCode) -> JsonReply {
    warp::reply::with_status(warp::reply::json(body), status)
}

fn invalid_request(details: impl Into<String>) -> JsonReply {
    reply(
        &json!({ "error": "Invalid request", "details": [details.into()] }),
        StatusCode::BAD_REQUEST,
    )
}

fn internal_error(error: &str, message: String) -> JsonReply {
    reply(
        &json!({ "error": error, "message": message }),
        StatusCode::INTERNAL_SERVER_ERROR,
    )
}

/// POST /runs
pub async fn create_run(body: Bytes, host: PipelineHost) -> Result<JsonReply, Infallible> {
    let request: CreateRunRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return Ok(invalid_request(e.to_string())),
    };

    if request.preflight_data.is_some() {
        debug!("ignoring preflight_data on run submission");
    }

    match host.submit(request.idea_text, request.preset_id).await {
        Ok((run, _handle)) => {
            info!(run_id = %run.id, "run accepted");
            Ok(reply(
                &CreateRunResponse {
                    run_id: run.id,
                    status: run.status,
                    created_at: run.created_at,
                },
                StatusCode::ACCEPTED,
            ))
        }
        Err(PipelineError::Validation { message }) => Ok(invalid_request(message)),
        Err(e) => {
            error!(error = %e, "failed to create run");
            Ok(internal_error("Failed to create run", e.public_message()))
        }
    }
}

/// GET /runs/{id}
pub async fn get_run(run_id: String, host: PipelineHost) -> Result<JsonReply, Infallible> {
    match host.engine().store().read(&run_id).await {
        Ok(Some(run)) => Ok(reply(&run, StatusCode::OK)),
        Ok(None) | Err(StoreError::NotFound(_)) => Ok(reply(
            &json!({ "error": "Run not found", "run_id": run_id }),
            StatusCode::NOT_FOUND,
        )),
        Err(e) => {
            error!(run_id = %run_id, error = %e, "failed to read run");
            Ok(internal_error(
                "Internal server error",
                sanitize_error_message(&e.to_string()),
            ))
        }
    }
}

/// POST /preflight
pub async fn preflight(body: Bytes) -> Result<JsonReply, Infallible> {
    let request: PreflightRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return Ok(invalid_request(e.to_string())),
    };

    if let Err(message) = validate_idea_text(&request.idea_text) {
        return Ok(reply(&json!({ "error": message }), StatusCode::BAD_REQUEST));
    }

    let questions = clarification_questions(&request.idea_text);
    let response = PreflightResponse::new(new_preflight_id(), questions);
    debug!(
        preset_id = %request.preset_id,
        questions = response.questions.len(),
        "preflight complete"
    );
    Ok(reply(&response, StatusCode::OK))
}

/// GET /health
pub async fn health(host: PipelineHost) -> Result<JsonReply, Infallible> {
    let response = HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: host.engine().metrics().uptime_seconds(),
        timestamp: Utc::now(),
    };
    Ok(reply(&response, StatusCode::OK))
}

/// GET /metrics
pub async fn metrics(host: PipelineHost) -> Result<JsonReply, Infallible> {
    Ok(reply(&host.engine().metrics().snapshot(), StatusCode::OK))
}
