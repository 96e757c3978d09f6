use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::{error::AppError, utils::upload_limits::UploadValidationError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Auth(msg) => Self::Unauthorized(msg),
            _ => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl From<UploadValidationError> for ApiError {
    fn from(err: UploadValidationError) -> Self {
        match err {
            UploadValidationError::PayloadTooLarge(msg) => Self::PayloadTooLarge(msg),
            UploadValidationError::BadRequest(msg) => Self::ValidationError(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InternalError(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            Self::ValidationError(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            Self::Forbidden(message) => (StatusCode::FORBIDDEN, message),
            Self::PayloadTooLarge(message) => (StatusCode::PAYLOAD_TOO_LARGE, message),
        };

        let body = ErrorResponse {
            error: message,
            status: "error".to_string(),
        };

        (status, Json(body)).into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Debug;

    // Helper to check status code
    fn assert_status_code<T: IntoResponse + Debug>(response: T, expected_status: StatusCode) {
        let response = response.into_response();
        assert_eq!(response.status(), expected_status);
    }

    #[test]
    fn test_app_error_to_api_error_conversion() {
        let not_found = AppError::NotFound("resource not found".to_string());
        let api_error = ApiError::from(not_found);
        assert!(matches!(api_error, ApiError::NotFound(msg) if msg == "resource not found"));

        let auth = AppError::Auth("unauthorized".to_string());
        let api_error = ApiError::from(auth);
        assert!(matches!(api_error, ApiError::Unauthorized(msg) if msg == "unauthorized"));

        let internal_error = AppError::Io(std::io::Error::other("io error"));
        let api_error = ApiError::from(internal_error);
        assert!(matches!(api_error, ApiError::InternalError(_)));
    }

    #[test]
    fn test_internal_app_errors_are_sanitized() {
        let api_error = ApiError::from(AppError::InternalError("row lock on files:9".into()));
        assert!(matches!(api_error, ApiError::InternalError(ref msg) if msg == "Internal server error"));
    }

    #[test]
    fn test_upload_validation_conversion() {
        let api_error = ApiError::from(UploadValidationError::PayloadTooLarge("big".into()));
        assert_status_code(api_error, StatusCode::PAYLOAD_TOO_LARGE);

        let api_error = ApiError::from(UploadValidationError::BadRequest("missing".into()));
        assert_status_code(api_error, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_api_error_response_status_codes() {
        assert_status_code(
            ApiError::InternalError("server error".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
        assert_status_code(
            ApiError::NotFound("not found".to_string()),
            StatusCode::NOT_FOUND,
        );
        assert_status_code(
            ApiError::ValidationError("invalid input".to_string()),
            StatusCode::BAD_REQUEST,
        );
        assert_status_code(
            ApiError::Unauthorized("not allowed".to_string()),
            StatusCode::UNAUTHORIZED,
        );
        assert_status_code(
            ApiError::Forbidden("not yours".to_string()),
            StatusCode::FORBIDDEN,
        );
        assert_status_code(
            ApiError::PayloadTooLarge("too big".to_string()),
            StatusCode::PAYLOAD_TOO_LARGE,
        );
    }

    #[test]
    fn test_internal_error_sanitization() {
        let api_error = ApiError::InternalError("db password incorrect".to_string());

        assert_eq!(api_error.to_string(), "Internal server error");
        assert_status_code(api_error, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
