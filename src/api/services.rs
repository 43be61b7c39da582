use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tracing::{debug, info};

use super::{
    models::{
        ConvertRequest, DownloadRequest, ExtractRequest, ExtractResponse, HealthResponse, TaskAccepted,
    },
    state::AppState,
    validation::{self, RequestValidationError},
};
use crate::api::error::ApiError;

/// Start media discovery for a page (POST /api/extract)
///
/// Returns 202 with the task id to poll. A URL that already points at a
/// media file (or is flagged `direct_url`) is answered with a completed task
/// and `media_url` set. Pages on DRM-listed domains are refused with 400.
pub async fn extract(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let request: ExtractRequest = read_json(&state, &headers, body).await?;
    validation::validate_extract(&request).map_err(map_validation_error)?;

    let url = request.url.trim();
    info!(url, direct = request.direct_url, "Extraction request");

    let direct = request.direct_url || crate::classifier::is_direct_media_url(url);
    let task_id = if direct {
        state.runner.submit_direct(url)?
    } else {
        state.runner.submit_discovery(url)?
    };

    let status = state.runner.registry().status(&task_id)?;
    let response = if direct {
        ExtractResponse {
            task_id,
            status,
            message: "Direct video URL ready".to_string(),
            media_url: Some(url.to_string()),
        }
    } else {
        ExtractResponse {
            task_id,
            status,
            message: "Extraction started".to_string(),
            media_url: None,
        }
    };

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Task progress (GET /api/progress/{task_id})
pub async fn progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.runner.registry().snapshot(&task_id)?;
    Ok((StatusCode::OK, Json(snapshot)))
}

/// Stream the first candidate of a task (GET /api/proxy-download/{task_id})
pub async fn proxy_download(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
    stream_candidate(&state, &task_id, 0).await
}

/// Stream candidate `index` of a task (GET /api/proxy-download/{task_id}/{index})
pub async fn proxy_download_indexed(
    State(state): State<AppState>,
    Path((task_id, index)): Path<(String, usize)>,
) -> Result<Response, ApiError> {
    stream_candidate(&state, &task_id, index).await
}

/// Replays the candidate's auth context against the origin and pipes the
/// body through. Origin errors surface before any byte is sent.
async fn stream_candidate(state: &AppState, task_id: &str, index: usize) -> Result<Response, ApiError> {
    let media = state
        .runner
        .retriever()
        .fetch(state.runner.registry(), task_id, index)
        .await?;
    info!(task_id, index, file = %media.file_name, size = ?media.content_length, "Proxying media");

    let mut headers = HeaderMap::new();
    let content_type = media
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Some(length) = media.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    headers.insert(
        header::CONTENT_DISPOSITION,
        super::utils::attachment_disposition(&media.file_name),
    );

    let metrics = state.metrics.clone();
    let body = media.body.inspect_ok(move |chunk| metrics.bytes_proxied(chunk.len()));

    Ok((StatusCode::OK, headers, Body::from_stream(body)).into_response())
}

/// Start a download task (POST /api/download)
///
/// Body is either `{ "task_id": ..., "index": ... }` to download a discovered
/// candidate with its captured session, or `{ "url": ... }`.
pub async fn download(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let request: DownloadRequest = read_json(&state, &headers, body).await?;
    validation::validate_download(&request).map_err(map_validation_error)?;

    let task_id = match &request {
        DownloadRequest::Candidate { task_id, index } => {
            state.runner.submit_candidate_download(task_id, *index)?
        }
        DownloadRequest::Url { url } => state.runner.submit_url_download(url.trim())?,
    };

    accepted(&state, task_id)
}

/// Start a conversion task (POST /api/convert)
///
/// `input_path` must resolve to a file under the download or output
/// directory; anything else is refused with 400.
pub async fn convert(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let request: ConvertRequest = read_json(&state, &headers, body).await?;
    validation::validate_convert(&request).map_err(map_validation_error)?;

    let task_id = state
        .runner
        .submit_convert(&request.input_path, request.profile())
        .await?;
    accepted(&state, task_id)
}

/// Cancel an active task (DELETE /api/tasks/{task_id})
///
/// 204 once cancellation is requested, 404 for unknown ids and 409 when the
/// task already finished.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.runner.cancel(&task_id)?;
    Ok(StatusCode::NO_CONTENT)
}

fn accepted(state: &AppState, task_id: String) -> Result<(StatusCode, Json<TaskAccepted>), ApiError> {
    let status = state.runner.registry().status(&task_id)?;
    Ok((StatusCode::ACCEPTED, Json(TaskAccepted { task_id, status })))
}

fn map_validation_error(err: RequestValidationError) -> ApiError {
    ApiError::InvalidPayload(err.to_string())
}

/// Checks the content type, reads the body within the payload limit and
/// deserializes it.
///
/// Note: Decompression is handled transparently by RequestDecompressionLayer middleware,
/// so the body is already decompressed here.
async fn read_json<T: DeserializeOwned>(
    state: &AppState,
    headers: &HeaderMap,
    body: Body,
) -> Result<T, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    super::utils::parse_content_type(content_type)?;

    let data = body
        .collect()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .to_bytes();
    super::utils::validate_body_size(&data, state.config.server.max_payload_bytes.as_usize())?;

    debug!(size = data.len(), "Request body read");
    Ok(serde_json::from_slice(&data)?)
}

/// Health check endpoint (GET /health)
///
/// Reports the discoverer variant chosen at startup, whether the transcoder
/// is enabled, active task count and counters.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());
    components.insert("registry".to_string(), "healthy".to_string());
    components.insert(
        "transcoder".to_string(),
        if state.runner.transcoder().is_enabled() {
            "enabled"
        } else {
            "disabled"
        }
        .to_string(),
    );

    let response = HealthResponse {
        status: "healthy".to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
        discoverer: state.runner.discoverer_name().to_string(),
        active_tasks: state.runner.registry().active(),
        metrics: state.metrics.snapshot(),
    };

    (StatusCode::OK, Json(response))
}
