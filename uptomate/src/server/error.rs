//! Mapping of engine errors onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::errors::EngineError;

/// Error body returned by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: &'static str,
    pub detail: String,
}

/// Wrapper turning an [`EngineError`] into a response
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::IllegalAction(_) => StatusCode::METHOD_NOT_ALLOWED,
            EngineError::TaskInFlight { .. } | EngineError::AlreadyExists(_) => {
                StatusCode::CONFLICT
            }
            EngineError::NotInstalled(_) => StatusCode::PRECONDITION_FAILED,
            EngineError::ConfigMissing(_)
            | EngineError::ConfigInvalid(_)
            | EngineError::ConfigMissingField(_)
            | EngineError::YamlError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::PathTraversal { .. } => StatusCode::BAD_REQUEST,
            EngineError::BackendCommand { .. } => StatusCode::BAD_GATEWAY,
            EngineError::StartTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        let body = ErrorResponse {
            code: self.0.code(),
            message: self.0.user_message(),
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
