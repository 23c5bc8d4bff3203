//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`castforge_common::Error`] so that route
//! handlers can return `Result<T, AppError>` and use `?` on library calls.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use castforge_common::Error;
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError(pub Error);

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.0, "Server error in API handler");
        }

        let body = json!({
            "error": self.0.to_string(),
            "code": self.0.kind().code(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castforge_common::{TaskId, TaskStatus};

    #[test]
    fn task_not_found_is_404() {
        let response = AppError(Error::TaskNotFound(TaskId::from(3))).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn not_ready_is_400() {
        let response = AppError(Error::NotReady {
            task_id: TaskId::from(3),
            status: TaskStatus::Processing,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_is_500() {
        let response = AppError(Error::internal("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
