//! Error-to-HTTP response conversion.
//!
//! Handlers return `Result<T, AppError>`. Bodies are `{ "error", "code" }`
//! with short fixed messages; backend diagnostics only go to the log.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use packsound_common::{Error, MediaError};
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: Error,
}

impl AppError {
    pub fn new(inner: Error) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Error {
        &self.inner
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self::new(e)
    }
}

impl From<MediaError> for AppError {
    fn from(e: MediaError) -> Self {
        Self::new(Error::Media(e))
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        Self::new(Error::Io(e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.inner, "Server error in handler");
        }

        let (message, code) = match &self.inner {
            Error::Media(e) => (e.to_string(), e.code()),
            Error::Busy(_) => ("entry busy".to_string(), "busy"),
            Error::Tool { .. } => ("backend tool failed".to_string(), "tool_error"),
            Error::Io(_) | Error::Config(_) | Error::InvalidTransition { .. } | Error::Internal(_) => {
                ("internal error".to_string(), "internal_error")
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        let mut response = (status, axum::Json(body)).into_response();
        if let Error::Media(MediaError::RateLimited { retry_after }) = &self.inner {
            let secs = retry_after.map_or(1, |d| d.as_secs().max(1));
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::time::Duration;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn media_errors_map_to_status() {
        let cases = [
            (MediaError::InvalidReference, StatusCode::NOT_FOUND),
            (MediaError::SourceUnavailable, StatusCode::NOT_FOUND),
            (MediaError::UnsupportedFormat, StatusCode::NOT_FOUND),
            (MediaError::NotFound, StatusCode::NOT_FOUND),
            (MediaError::TranscodeFailed, StatusCode::BAD_GATEWAY),
            (
                MediaError::RateLimited { retry_after: None },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            let response = AppError::from(err.clone()).into_response();
            assert_eq!(response.status(), status, "{err:?}");
        }
    }

    #[tokio::test]
    async fn body_carries_code_not_backend_text() {
        let response = AppError::new(Error::tool("ffmpeg", "secret stderr")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["code"], "tool_error");
        assert!(!body["error"].as_str().unwrap().contains("secret"));
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after() {
        let response = AppError::from(MediaError::RateLimited {
            retry_after: Some(Duration::from_secs(42)),
        })
        .into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
        assert_eq!(body_json(response).await["code"], "rate_limited");
    }

    #[test]
    fn busy_produces_409() {
        let response = AppError::new(Error::Busy("abc123 is writing".into())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn internal_produces_500() {
        let response = AppError::new(Error::internal("oops")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
