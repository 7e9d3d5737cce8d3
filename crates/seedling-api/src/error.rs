//! API error type and the shared JSON envelope.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use seedling_orchestrator::OrchestratorError;
use seedling_state::StateError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::auth::TokenError;

/// Response wrapper for consistent API format.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            ok: true,
            data: Some(data),
            error: None,
        })
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl From<StateError> for ApiError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::Conflict(msg) => ApiError::Conflict(format!("already exists: {msg}")),
            StateError::NotFound(msg) => ApiError::NotFound(format!("not found: {msg}")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Key(_) => ApiError::Internal(e.to_string()),
            other => ApiError::Unauthorized(other.to_string()),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Orchestrator(e) => match e {
                OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
                OrchestratorError::Conflict(_) => StatusCode::CONFLICT,
                OrchestratorError::PortExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
                OrchestratorError::UnresolvedManager(_) => StatusCode::UNPROCESSABLE_ENTITY,
                OrchestratorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                OrchestratorError::Driver { .. } => StatusCode::BAD_GATEWAY,
                OrchestratorError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        }
        (
            status,
            Json(ApiResponse::<()> {
                ok: false,
                data: None,
                error: Some(self.to_string()),
            }),
        )
            .into_response()
    }
}
