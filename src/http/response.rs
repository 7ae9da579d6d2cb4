//! Client-facing error responses.
//!
//! # Design Decisions
//! - Every rejection renders the same JSON shape: `{error, message, [retryAfter]}`
//! - Status code and `error` title are fixed per variant; only the message varies
//! - Internal failures never expose their cause to the client

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Policy rejections and handler failures returned to clients.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("rate limited: {message}")]
    TooManyRequests { message: String, retry_after: Duration },
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("unsupported media type")]
    UnsupportedMediaType,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("invalid form data")]
    Validation(Vec<FieldError>),
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

/// One failed form-field check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a [FieldError]>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::TooManyRequests { .. } => "Too Many Requests",
            ApiError::PayloadTooLarge => "Payload Too Large",
            ApiError::UnsupportedMediaType => "Unsupported Media Type",
            ApiError::BadRequest(_) => "Bad Request",
            ApiError::Validation(_) => "Invalid form data",
            ApiError::Unauthorized => "Unauthorized",
            ApiError::NotFound => "Not Found",
            ApiError::Internal(_) => "Internal Server Error",
        }
    }
}

/// Whole seconds, rounded up, as used by `Retry-After` and `retryAfter`.
pub fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, retry_after, details) = match &self {
            ApiError::Forbidden(msg) | ApiError::BadRequest(msg) => (Some(msg.as_str()), None, None),
            ApiError::TooManyRequests { message, retry_after } => {
                (Some(message.as_str()), Some(ceil_secs(*retry_after)), None)
            }
            ApiError::PayloadTooLarge => {
                (Some("Request body exceeds maximum allowed size"), None, None)
            }
            ApiError::UnsupportedMediaType => (Some("Invalid Content-Type header"), None, None),
            ApiError::Validation(errors) => (None, None, Some(errors.as_slice())),
            ApiError::Unauthorized => (Some("Valid credentials required"), None, None),
            ApiError::NotFound => (Some("No such resource"), None, None),
            ApiError::Internal(cause) => {
                tracing::error!(error = %cause, "Internal error");
                (Some("Something went wrong"), None, None)
            }
        };

        let body = ErrorBody {
            error: self.title(),
            message,
            retry_after,
            details,
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limit_body_and_header() {
        let response = ApiError::TooManyRequests {
            message: "slow down".into(),
            retry_after: Duration::from_millis(1500),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
        let body = body_json(response).await;
        assert_eq!(body["error"], "Too Many Requests");
        assert_eq!(body["message"], "slow down");
        assert_eq!(body["retryAfter"], 2);
    }

    #[tokio::test]
    async fn test_internal_error_hides_cause() {
        let response = ApiError::Internal("db exploded at 0xdeadbeef".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(!body.to_string().contains("deadbeef"));
        assert!(body.get("retryAfter").is_none());
    }

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::from_secs(3)), 3);
        assert_eq!(ceil_secs(Duration::from_millis(3001)), 4);
        assert_eq!(ceil_secs(Duration::ZERO), 0);
    }
}
