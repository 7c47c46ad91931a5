use crate::rate_limit::RateLimitExceeded;
use crate::resource::ResourceError;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Why a request was refused before any lookup happened
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum InvalidRequest {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("track_id is required")]
    MissingResourceId,

    #[error("Invalid track_id format")]
    MalformedResourceId,

    #[error("Invalid track_id")]
    UnsafeResourceId,
}

/// Coarse error class, one per response status family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    RateLimited,
    NotFound,
    Forbidden,
    InternalError,
}

/// Signed URL issuance errors with API status codes
#[derive(Debug, Error)]
pub enum IssueError {
    #[error(transparent)]
    InvalidRequest(#[from] InvalidRequest),

    #[error("Too many requests ({} limit)", .0.window.label())]
    RateLimited(RateLimitExceeded),

    #[error("Track not found")]
    NotFound,

    #[error("Access denied")]
    Forbidden,

    /// Display is fixed so the source never reaches a response body
    #[error("Internal server error")]
    Internal(#[source] std::io::Error),
}

impl IssueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IssueError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            IssueError::RateLimited(_) => ErrorKind::RateLimited,
            IssueError::NotFound => ErrorKind::NotFound,
            IssueError::Forbidden => ErrorKind::Forbidden,
            IssueError::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn to_err_code(&self) -> StatusCode {
        match self {
            IssueError::InvalidRequest(InvalidRequest::MethodNotAllowed) => {
                StatusCode::METHOD_NOT_ALLOWED
            }
            IssueError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            IssueError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            IssueError::NotFound => StatusCode::NOT_FOUND,
            IssueError::Forbidden => StatusCode::FORBIDDEN,
            IssueError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ResourceError> for IssueError {
    fn from(error: ResourceError) -> Self {
        match error {
            ResourceError::NotFound => IssueError::NotFound,
            ResourceError::OutsideRoot => IssueError::Forbidden,
            ResourceError::Io(source) => IssueError::Internal(source),
        }
    }
}

/// JSON error body: `{"error": "..."}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Build a JSON error response
pub(crate) fn err_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

impl IntoResponse for IssueError {
    fn into_response(self) -> Response {
        if let IssueError::Internal(source) = &self {
            error!(error = %source, "Signed URL generation error");
        }

        let mut res = err_response(self.to_err_code(), self.to_string());
        if let IssueError::RateLimited(exceeded) = &self
            && let Ok(value) = HeaderValue::from_str(&exceeded.retry_after_secs.to_string())
        {
            res.headers_mut().insert(header::RETRY_AFTER, value);
        }
        res
    }
}
