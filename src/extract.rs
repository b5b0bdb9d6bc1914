//! Extraction client: turns a [`SourceRef`] into a playable upstream stream.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use packsound_common::{ExtractedStream, MediaError, SourceRef};

/// Locates the raw media stream for a source.
///
/// Failures are limited to `SourceUnavailable`, `RateLimited` and
/// `UnsupportedFormat`; a ref without a locator is the caller's problem.
#[async_trait]
pub trait Extractor: Send + Sync + 'static {
    async fn extract(&self, source: &SourceRef) -> Result<ExtractedStream, MediaError>;
}

/// Production extractor backed by the yt-dlp CLI.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    program: PathBuf,
    format: String,
    timeout: Duration,
}

impl YtDlpExtractor {
    pub fn new(program: PathBuf, format: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program,
            format: format.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn extract(&self, source: &SourceRef) -> Result<ExtractedStream, MediaError> {
        let locator = source.locator.as_deref().ok_or(MediaError::NotFound)?;
        let stream =
            packsound_av::ytdlp::extract(&self.program, locator, &self.format, self.timeout)
                .await?;
        tracing::info!(
            id = %source.id,
            title = stream.info.title.as_deref().unwrap_or(""),
            duration = ?stream.info.duration_secs,
            "extracted source"
        );
        Ok(stream)
    }
}
