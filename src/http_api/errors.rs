//! API error mapping
//!
//! Wraps engine errors with their HTTP status codes and renders them as
//! JSON bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::CoordinatorError;
use crate::lra::EndpointError;

/// JSON error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

/// An engine error travelling to the HTTP surface.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub CoordinatorError);

impl ApiError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            CoordinatorError::NotFound(_) => StatusCode::NOT_FOUND,
            CoordinatorError::Gone(_) => StatusCode::GONE,
            CoordinatorError::UnknownParticipant(_) | CoordinatorError::UnknownStatus(_) => {
                StatusCode::BAD_REQUEST
            }
            CoordinatorError::Enlist(EndpointError::MissingCompensate) => StatusCode::BAD_REQUEST,
            CoordinatorError::Enlist(EndpointError::InvalidUri(_)) => {
                StatusCode::PRECONDITION_FAILED
            }
            CoordinatorError::Enlist(EndpointError::MalformedLink(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            CoordinatorError::Id(_) => StatusCode::PRECONDITION_FAILED,
            CoordinatorError::Store(_)
            | CoordinatorError::Encoding(_)
            | CoordinatorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.0.to_string(),
            code: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases: Vec<(CoordinatorError, StatusCode)> = vec![
            (
                CoordinatorError::NotFound("x".into()),
                StatusCode::NOT_FOUND,
            ),
            (CoordinatorError::Gone("x".into()), StatusCode::GONE),
            (
                CoordinatorError::UnknownStatus("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                CoordinatorError::UnknownParticipant("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                CoordinatorError::Enlist(EndpointError::MissingCompensate),
                StatusCode::BAD_REQUEST,
            ),
            (
                CoordinatorError::Enlist(EndpointError::InvalidUri("x".into())),
                StatusCode::PRECONDITION_FAILED,
            ),
            (
                CoordinatorError::Enlist(EndpointError::MalformedLink("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError(error).status_code(), expected);
        }
    }
}
