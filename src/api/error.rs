use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::PulseError;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Monitor(PulseError),
}

impl From<PulseError> for ApiError {
    fn from(err: PulseError) -> Self {
        ApiError::Monitor(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Monitor(err) => {
                let status = match &err {
                    PulseError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                    PulseError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
                    PulseError::CommandRejected { .. } => StatusCode::BAD_GATEWAY,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
