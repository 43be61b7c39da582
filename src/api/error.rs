use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

use super::models::ErrorResponse;
use crate::retrieval::RetrievalError;
use crate::tasks::{RegistryError, RunnerError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("{0}")]
    DrmProtected(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("origin responded with HTTP {status}")]
    Upstream { status: u16 },
    #[error("bad gateway: {0}")]
    BadGateway(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::DrmProtected(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream { status } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::DrmProtected(_) => "DRM_PROTECTED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Upstream { .. } => "UPSTREAM_ERROR",
            ApiError::BadGateway(_) => "BAD_GATEWAY",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(json!(body))).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::TaskNotFound(_) | RegistryError::CandidateNotFound { .. } => {
                ApiError::NotFound(value.to_string())
            }
            RegistryError::AlreadyTerminal(_) => ApiError::Conflict(value.to_string()),
            RegistryError::InvalidStatus(_) => ApiError::Internal(value.to_string()),
        }
    }
}

impl From<RunnerError> for ApiError {
    fn from(value: RunnerError) -> Self {
        match value {
            RunnerError::InvalidUrl(msg) => ApiError::InvalidPayload(msg),
            err @ RunnerError::InputOutsideRoots(_) => ApiError::InvalidPayload(err.to_string()),
            err @ RunnerError::DrmProtected(_) => ApiError::DrmProtected(err.to_string()),
            RunnerError::Registry(err) => err.into(),
            RunnerError::Retrieval(err) => err.into(),
        }
    }
}

impl From<RetrievalError> for ApiError {
    fn from(value: RetrievalError) -> Self {
        match value {
            RetrievalError::NotFound(err) => err.into(),
            RetrievalError::Upstream { status } => ApiError::Upstream { status },
            RetrievalError::Request(err) => ApiError::BadGateway(err.to_string()),
            RetrievalError::Io(err) => ApiError::Internal(err.to_string()),
            RetrievalError::Cancelled => ApiError::Conflict("Cancelled".to_string()),
        }
    }
}
