//! API request handlers

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashMap;
use std::sync::Arc;

use super::types::*;
use crate::models::{ExecutionResult, Snippet};
use crate::{Error, Orchestrator};

pub type AppState = Arc<Orchestrator>;

// === Health ===

/// Liveness, or readiness with `?ready`: not ready until some kernel exists.
pub async fn health(
    State(orch): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<HealthResponse>) {
    let kernels = orch.readiness_count();
    let (status, label) = if params.contains_key("ready") && kernels == 0 {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    } else {
        (StatusCode::OK, "ok")
    };

    (status, Json(HealthResponse {
        status: label.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        kernels,
    }))
}

// === Execution ===

pub async fn execute(
    State(orch): State<AppState>,
    Path(kernel): Path<String>,
    source: String,
) -> Result<Json<ExecutionResult>, Response> {
    let snippet = Snippet::new(kernel, source);
    tracing::info!(kernel = %snippet.kernel, execution = %snippet.id, "Executing snippet");

    let result = orch.execute_snippet(&snippet).await.map_err(|e| {
        tracing::warn!(kernel = %snippet.kernel, execution = %snippet.id, error = %e, "Execution failed");
        to_api_error(e)
    })?;

    Ok(Json(result))
}

fn status_of(e: &Error) -> StatusCode {
    match e {
        Error::KernelNotFound(_) => StatusCode::BAD_REQUEST,
        Error::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
        Error::KernelClosed => StatusCode::GONE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn to_api_error(e: Error) -> Response {
    let status = status_of(&e);
    let body = Json(ApiError {
        error: format!("{:?}", e).split('(').next().unwrap_or("Error").to_string(),
        message: e.to_string(),
    });

    if matches!(e, Error::TooManyRequests) {
        (status, [(header::RETRY_AFTER, "1")], body).into_response()
    } else {
        (status, body).into_response()
    }
}
