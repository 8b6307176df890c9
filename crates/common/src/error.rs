//! Common error types and handling for the CRMI engine

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Common result type
pub type Result<T> = std::result::Result<T, Error>;

/// A secondary failure recorded while compensating for a primary one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackFailure {
    /// `Type/id` of the resource that could not be removed
    pub resource: String,
    pub reason: String,
}

/// Failure of a publish call, carrying every rollback delete that also failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{primary}{}", inconsistency_note(.rollback_failures))]
pub struct PublishFailure {
    pub primary: String,
    /// Number of resources successfully deleted during rollback
    pub rolled_back: usize,
    pub rollback_failures: Vec<RollbackFailure>,
}

fn inconsistency_note(failures: &[RollbackFailure]) -> &'static str {
    if failures.is_empty() {
        ""
    } else {
        " (repository left in an inconsistent state)"
    }
}

impl PublishFailure {
    /// True when at least one persisted resource survived the rollback
    pub fn is_inconsistent(&self) -> bool {
        !self.rollback_failures.is_empty()
    }
}

/// Common error type for the CRMI engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unexpected error: {0}")]
    Unexpected(#[from] anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Unresolvable expansion: {0}")]
    UnresolvableExpansion(String),

    #[error("Version mismatch: {0}")]
    VersionMismatch(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Publish failed: {0}")]
    Publish(PublishFailure),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Terminology error: {0}")]
    Terminology(String),
}

impl Error {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Error::Unprocessable(_) | Error::UnresolvableExpansion(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Error::InvalidRequest(_) | Error::VersionMismatch(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Error::Publish(_) | Error::Repository(_) | Error::Terminology(_) => {
                StatusCode::BAD_GATEWAY
            }
            Error::Unexpected(_) | Error::Serialization(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Unexpected(_) => "UNEXPECTED_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::PreconditionFailed(_) => "PRECONDITION_FAILED",
            Error::Unprocessable(_) => "UNPROCESSABLE",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::UnresolvableExpansion(_) => "UNRESOLVABLE_EXPANSION",
            Error::VersionMismatch(_) => "VERSION_MISMATCH",
            Error::NotImplemented(_) => "NOT_IMPLEMENTED",
            Error::Publish(_) => "PUBLISH_FAILED",
            Error::Repository(_) => "REPOSITORY_ERROR",
            Error::Terminology(_) => "TERMINOLOGY_ERROR",
        }
    }

    /// Errors produced by a network collaborator that may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Repository(_) | Error::Terminology(_))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        if status.is_server_error() {
            tracing::error!(error = %self, code = error_code, "Operation failed");
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
