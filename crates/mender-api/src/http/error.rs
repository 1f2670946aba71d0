//! Application error type mapping to HTTP status codes.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use mender_core::workflow::registry::RegistryError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Workflow registry errors (validation, lookup, cancellation).
    Registry(RegistryError),
    /// Malformed request input caught before reaching the registry.
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<RegistryError> for AppError {
    fn from(e: RegistryError) -> Self {
        AppError::Registry(e)
    }
}

impl AppError {
    /// HTTP status and machine-readable code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Registry(RegistryError::Validation(_)) | AppError::Validation(_) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            AppError::Registry(RegistryError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "WORKFLOW_NOT_FOUND")
            }
            AppError::Registry(RegistryError::AlreadyFinished { .. }) => {
                (StatusCode::CONFLICT, "CONFLICT")
            }
            AppError::Registry(RegistryError::Repository(_)) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Registry(RegistryError::Validation(e)) => e.to_string(),
            AppError::Registry(e) => e.to_string(),
            AppError::Validation(msg) | AppError::Internal(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = self.message();

        if status.is_server_error() {
            tracing::error!(code, error = message.as_str(), "request failed");
        } else {
            tracing::debug!(code, error = message.as_str(), "request rejected");
        }

        let body = json!({
            "errors": [{
                "code": code,
                "message": message,
            }]
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mender_types::error::ValidationError;
    use mender_types::workflow::WorkflowStatus;
    use uuid::Uuid;

    #[test]
    fn registry_errors_map_to_status_codes() {
        let cases = [
            (
                AppError::from(RegistryError::Validation(ValidationError::NoTasks)),
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
            ),
            (
                AppError::from(RegistryError::NotFound(Uuid::nil())),
                StatusCode::NOT_FOUND,
                "WORKFLOW_NOT_FOUND",
            ),
            (
                AppError::from(RegistryError::AlreadyFinished {
                    id: Uuid::nil(),
                    status: WorkflowStatus::Completed,
                }),
                StatusCode::CONFLICT,
                "CONFLICT",
            ),
            (
                AppError::from(RegistryError::Repository("disk I/O error".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status_and_code(), (status, code));
        }
    }

    #[test]
    fn validation_message_is_the_bare_reason() {
        let err = AppError::from(RegistryError::Validation(ValidationError::EmptyName));
        assert_eq!(err.message(), ValidationError::EmptyName.to_string());
    }

    #[test]
    fn response_carries_status() {
        let response = AppError::Validation("bad limit".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
