//! Transcode pipeline.
//!
//! [`Transcoder`] turns an upstream stream into the configured target format,
//! yielding output as it is produced. [`pipeline::Pipeline`] drives one extraction
//! and transcode into a cache slot.

pub mod pipeline;

use std::path::PathBuf;

use async_trait::async_trait;
use packsound_common::{AudioSpec, ExtractedStream, MediaError};

pub use packsound_av::ByteStream;

/// Produces target-format bytes from an extracted stream.
///
/// Any failure, at start or mid-stream, means `TranscodeFailed` to callers;
/// the stream's `io::Error` items are only logged.
#[async_trait]
pub trait Transcoder: Send + Sync + 'static {
    async fn transcode(
        &self,
        stream: &ExtractedStream,
        spec: &AudioSpec,
    ) -> Result<ByteStream, MediaError>;
}

/// Production transcoder backed by an ffmpeg child process.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        stream: &ExtractedStream,
        spec: &AudioSpec,
    ) -> Result<ByteStream, MediaError> {
        let args = packsound_av::transcode_args(stream, spec);
        packsound_av::spawn_transcode(&self.program, &args).map_err(|e| {
            tracing::warn!(program = %self.program.display(), error = %e, "failed to start ffmpeg");
            MediaError::TranscodeFailed
        })
    }
}
