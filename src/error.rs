use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

use crate::repository::RepoError;

/// AppError
///
/// The complete failure taxonomy surfaced by the HTTP layer. `Unauthorized`, `Forbidden`
/// and `NotFound` are separate outcomes and are never folded into one another.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// No identity at all on a path that requires one.
    #[error("authentication required")]
    Unauthorized,

    /// Identity present, insufficient rights.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Malformed or missing input, including parent/child id mismatches.
    #[error("{0}")]
    Validation(String),

    #[error("already a member of this class")]
    AlreadyMember,

    #[error("the class owner cannot join their own class")]
    IsOwner,

    #[error("could not allocate a unique class code after {attempts} attempts")]
    AllocationExhausted { attempts: usize },

    #[error("content generation failed: {0}")]
    GenerationFailed(String),

    /// A write on a non-primary step failed after the primary row was already written.
    #[error("dependent write failed: {0}")]
    DependencyWriteFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// ErrorBody
///
/// JSON body returned for every failed request.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ErrorBody {
    pub error: bool,
    pub code: String,
    pub message: String,
}

/// ErrorDetail
///
/// Internal diagnostic text carried in the response extensions. The `expose_error_detail`
/// middleware copies it into the body only in the local environment.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

impl AppError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::AlreadyMember | AppError::IsOwner => {
                StatusCode::BAD_REQUEST
            }
            AppError::GenerationFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::AllocationExhausted { .. }
            | AppError::DependencyWriteFailed(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::AlreadyMember => "ALREADY_MEMBER",
            AppError::IsOwner => "IS_OWNER",
            AppError::AllocationExhausted { .. } => "ALLOCATION_EXHAUSTED",
            AppError::GenerationFailed(_) => "GENERATION_FAILED",
            AppError::DependencyWriteFailed(_) => "DEPENDENCY_WRITE_FAILED",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Client-safe message. Server-side failures get a generic text; their detail only
    /// travels through `ErrorDetail`.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Internal(_) => "internal server error".to_string(),
            AppError::DependencyWriteFailed(_) => {
                "a dependent write failed; the request was rolled back".to_string()
            }
            other => other.to_string(),
        }
    }
}

// Logged where the failure happens and again in `into_response`.
impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        AppError::Internal(err.to_string())
    }
}

// --- Extractor rejections (see `crate::extract`) ---

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), "request failed: {}", self);
        } else {
            tracing::debug!(code = self.error_code(), "request rejected: {}", self);
        }

        let body = ErrorBody {
            error: true,
            code: self.error_code().to_string(),
            message: self.public_message(),
        };

        let mut response = (status, Json(body)).into_response();
        response
            .extensions_mut()
            .insert(ErrorDetail(format!("{:?}", self)));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_failures_map_to_distinct_statuses() {
        assert_eq!(AppError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::forbidden("no").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::not_found("gone").status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_internal_message_is_not_leaked() {
        let err = AppError::Internal("connection refused on 10.0.0.4".to_string());
        assert_eq!(err.public_message(), "internal server error");
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_repository_error_becomes_internal_with_detail() {
        let err = AppError::from(RepoError::Integrity("owner columns disagree".into()));
        match &err {
            AppError::Internal(detail) => assert!(detail.contains("owner columns disagree")),
            other => panic!("expected Internal, got {:?}", other),
        }
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_response_carries_detail_extension() {
        let response = AppError::AllocationExhausted { attempts: 10 }.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.extensions().get::<ErrorDetail>().is_some());

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert!(body.error);
        assert_eq!(body.code, "ALLOCATION_EXHAUSTED");
    }
}
