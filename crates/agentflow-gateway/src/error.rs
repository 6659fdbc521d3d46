use agentflow_core::{AgentflowError, ErrorBody};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::time::Duration;

/// Error type for HTTP handlers.
///
/// Every variant renders as `{ "error": message }` with a matching status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A domain error from the orchestrator or store.
    #[error(transparent)]
    Core(#[from] AgentflowError),

    /// Body or path could not be parsed.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Renders a `Retry-After` header when the wait is known.
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },
}

/// Result alias for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::Core(core) => match core {
                AgentflowError::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
                AgentflowError::NotFound(what) => {
                    (StatusCode::NOT_FOUND, format!("{what} not found"))
                }
                other => {
                    tracing::error!(error = %other, "Internal error while serving request");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "An internal error occurred".to_string(),
                    )
                }
            },
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded".to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.status_and_message();
        let mut response = (status, Json(ErrorBody { error })).into_response();
        if let ApiError::RateLimited {
            retry_after: Some(wait),
        } = self
        {
            // Whole seconds, rounded up so clients never retry early.
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_is_bad_request() {
        let err = ApiError::from(AgentflowError::InvalidArgument("task must not be empty".into()));
        let (status, msg) = err.status_and_message();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(msg, "task must not be empty");
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let err = ApiError::from(AgentflowError::NotFound("job 42".into()));
        let (status, msg) = err.status_and_message();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(msg, "job 42 not found");
    }

    #[test]
    fn test_internal_errors_are_opaque() {
        let err = ApiError::from(AgentflowError::PipelineFailure("secret detail".into()));
        let (status, msg) = err.status_and_message();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!msg.contains("secret"));
    }

    #[test]
    fn test_rate_limited_status() {
        let response = ApiError::RateLimited { retry_after: None }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let response = ApiError::RateLimited {
            retry_after: Some(Duration::from_millis(1500)),
        }
        .into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }
}
