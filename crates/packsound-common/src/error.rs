//! Error types shared across packsound.
//!
//! [`MediaError`] is the resolution taxonomy. It is `Clone` because a single
//! failed extraction or transcode is fanned out to every request waiting on
//! the same source, and it is recorded on the cache entry for the length of
//! its negative-cache window.
//!
//! [`Error`] is the wider crate error used by the server and tooling layers.
//! Both map to an HTTP status via `http_status()`.

use std::time::Duration;

/// Failure kinds of the resolve → extract → transcode pipeline.
///
/// Display strings are short and fixed. Backend diagnostics are logged where
/// they occur and never carried here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    /// The user-supplied reference could not be parsed into a supported form.
    #[error("invalid media reference")]
    InvalidReference,

    /// The upstream reports that no such media exists (or it is private/removed).
    #[error("source unavailable")]
    SourceUnavailable,

    /// The upstream is throttling us.
    #[error("upstream rate limited")]
    RateLimited {
        /// Backend-suggested wait, when one was given.
        retry_after: Option<Duration>,
    },

    /// The upstream media cannot be served (livestream, no audio, no duration).
    #[error("unsupported media format")]
    UnsupportedFormat,

    /// The local transcode step failed.
    #[error("transcode failed")]
    TranscodeFailed,

    /// No cache entry exists for the key and there is no way to resolve it.
    #[error("not found")]
    NotFound,
}

impl MediaError {
    /// Whether a fresh attempt may succeed without operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MediaError::RateLimited { .. } | MediaError::TranscodeFailed
        )
    }

    /// How long a failure is remembered before a new attempt is allowed.
    ///
    /// `negative_ttl` applies to terminal upstream failures; `backoff` to
    /// rate limiting when the backend gave no hint. Transcode failures are
    /// not remembered at all.
    pub fn negative_ttl(&self, negative_ttl: Duration, backoff: Duration) -> Duration {
        match self {
            MediaError::SourceUnavailable | MediaError::UnsupportedFormat => negative_ttl,
            MediaError::RateLimited { retry_after } => retry_after.unwrap_or(backoff),
            MediaError::TranscodeFailed
            | MediaError::InvalidReference
            | MediaError::NotFound => Duration::ZERO,
        }
    }

    /// Stable machine-readable code for response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            MediaError::InvalidReference => "invalid_reference",
            MediaError::SourceUnavailable => "source_unavailable",
            MediaError::RateLimited { .. } => "rate_limited",
            MediaError::UnsupportedFormat => "unsupported_format",
            MediaError::TranscodeFailed => "transcode_failed",
            MediaError::NotFound => "not_found",
        }
    }

    /// Map this error to an HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            MediaError::InvalidReference
            | MediaError::SourceUnavailable
            | MediaError::UnsupportedFormat
            | MediaError::NotFound => 404,
            MediaError::RateLimited { .. } => 503,
            MediaError::TranscodeFailed => 502,
        }
    }
}

/// Crate-level error covering everything outside the media taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A resolution failure.
    #[error(transparent)]
    Media(#[from] MediaError),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration was invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// An external tool (yt-dlp, ffmpeg) could not be run or returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// A cache entry was asked to move to a state it cannot reach.
    #[error("Invalid state transition for {id}: {from} -> {to}")]
    InvalidTransition {
        /// Canonical id of the entry.
        id: String,
        /// Current state name.
        from: &'static str,
        /// Requested state name.
        to: &'static str,
    },

    /// The entry cannot be evicted right now (it is still being produced).
    #[error("Entry busy: {0}")]
    Busy(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Media(e) => e.http_status(),
            Error::Busy(_) => 409,
            Error::Tool { .. } => 502,
            Error::Io(_)
            | Error::Config(_)
            | Error::InvalidTransition { .. }
            | Error::Internal(_) => 500,
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Internal`].
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// The media kind behind this error, if it is one.
    pub fn as_media(&self) -> Option<&MediaError> {
        match self {
            Error::Media(e) => Some(e),
            _ => None,
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_status_mapping() {
        assert_eq!(MediaError::InvalidReference.http_status(), 404);
        assert_eq!(MediaError::SourceUnavailable.http_status(), 404);
        assert_eq!(MediaError::UnsupportedFormat.http_status(), 404);
        assert_eq!(MediaError::NotFound.http_status(), 404);
        assert_eq!(
            MediaError::RateLimited { retry_after: None }.http_status(),
            503
        );
        assert_eq!(MediaError::TranscodeFailed.http_status(), 502);
    }

    #[test]
    fn retryable_kinds() {
        assert!(MediaError::RateLimited { retry_after: None }.is_retryable());
        assert!(MediaError::TranscodeFailed.is_retryable());
        assert!(!MediaError::SourceUnavailable.is_retryable());
        assert!(!MediaError::InvalidReference.is_retryable());
    }

    #[test]
    fn negative_ttl_per_kind() {
        let ttl = Duration::from_secs(60);
        let backoff = Duration::from_secs(5);

        assert_eq!(MediaError::SourceUnavailable.negative_ttl(ttl, backoff), ttl);
        assert_eq!(MediaError::UnsupportedFormat.negative_ttl(ttl, backoff), ttl);
        assert_eq!(
            MediaError::RateLimited { retry_after: None }.negative_ttl(ttl, backoff),
            backoff
        );
        assert_eq!(
            MediaError::RateLimited {
                retry_after: Some(Duration::from_secs(30))
            }
            .negative_ttl(ttl, backoff),
            Duration::from_secs(30)
        );
        assert_eq!(
            MediaError::TranscodeFailed.negative_ttl(ttl, backoff),
            Duration::ZERO
        );
    }

    #[test]
    fn display_does_not_leak_detail() {
        assert_eq!(MediaError::SourceUnavailable.to_string(), "source unavailable");
        assert_eq!(MediaError::TranscodeFailed.to_string(), "transcode failed");
    }

    #[test]
    fn crate_error_status() {
        assert_eq!(Error::from(MediaError::NotFound).http_status(), 404);
        assert_eq!(Error::Busy("abc".into()).http_status(), 409);
        assert_eq!(Error::tool("ffmpeg", "boom").http_status(), 502);
        assert_eq!(Error::internal("oops").http_status(), 500);
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert!(matches!(Error::from(io), Error::Io(_)));
    }
}
