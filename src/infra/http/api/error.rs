use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{debug, warn};

use crate::application::error::AppError;
use crate::application::repos::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const NOT_FOUND: &str = "not_found";
    pub const DUPLICATE: &str = "duplicate";
    pub const RENDER: &str = "render_error";
    pub const TOOLCHAIN_UNAVAILABLE: &str = "toolchain_unavailable";
    pub const REPO: &str = "repo_error";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn internal(hint: Option<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::INTERNAL,
            "Internal server error",
            hint,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(
                code = self.code,
                status = self.status.as_u16(),
                hint = self.hint.as_deref(),
                "API request failed"
            );
        } else {
            debug!(
                code = self.code,
                status = self.status.as_u16(),
                hint = self.hint.as_deref(),
                "API request rejected"
            );
        }
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Map an application error to a consistent HTTP error response.
pub fn app_error_to_api(err: AppError) -> ApiError {
    match err {
        AppError::Domain(err) => ApiError::bad_request("Invalid request", Some(err.to_string())),
        AppError::Repo(RepoError::NotFound) => ApiError::not_found("image not found"),
        AppError::Repo(RepoError::Duplicate { constraint }) => ApiError::new(
            StatusCode::CONFLICT,
            codes::DUPLICATE,
            "Duplicate record",
            Some(constraint),
        ),
        AppError::Repo(err) => ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::REPO,
            "Persistence failure",
            Some(err.to_string()),
        ),
        AppError::Render(err) if err.is_launch_failure() => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::TOOLCHAIN_UNAVAILABLE,
            "Rendering toolchain unavailable",
            Some(err.to_string()),
        ),
        // Transient render failures (conversion, timeout) are the request's
        // problem to retry or fix, mirroring the 400 contract.
        AppError::Render(err) => ApiError::new(
            StatusCode::BAD_REQUEST,
            codes::RENDER,
            "Rendering failed",
            Some(err.to_string()),
        ),
        AppError::Storage(err) => ApiError::internal(Some(err.to_string())),
        AppError::Infra(err) => ApiError::internal(Some(err.to_string())),
        AppError::Task(message) | AppError::Unexpected(message) => {
            ApiError::internal(Some(message))
        }
    }
}
