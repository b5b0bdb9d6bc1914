//! Deterministic fake adapters for tests.
//!
//! [`FakeExtractor`] and [`FakeTranscoder`] stand in for yt-dlp and ffmpeg:
//! they count calls, can be delayed or made to fail, and produce a
//! reproducible byte pattern so readers can check exactly what they got.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use packsound_common::{
    AudioSpec, CanonicalId, ExtractedStream, MediaError, SourceInfo, SourceRef,
};

use crate::extract::Extractor;
use crate::transcode::{ByteStream, Transcoder};

/// Extractor returning a canned stream (or a canned failure).
#[derive(Debug, Clone)]
pub struct FakeExtractor {
    calls: Arc<AtomicUsize>,
    delay: Duration,
    failure: Option<MediaError>,
    duration_secs: f64,
    playlist: Vec<CanonicalId>,
}

impl Default for FakeExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            failure: None,
            duration_secs: 10.0,
            playlist: Vec::new(),
        }
    }

    /// Every call fails with `error`.
    pub fn failing(error: MediaError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Report `ids` as the rest of a playlist.
    pub fn with_playlist(mut self, ids: Vec<CanonicalId>) -> Self {
        self.playlist = ids;
        self
    }

    /// Shared call counter.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(&self, source: &SourceRef) -> Result<ExtractedStream, MediaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }
        Ok(ExtractedStream {
            url: format!("https://media.invalid/{}", source.id),
            http_headers: Vec::new(),
            size_hint: None,
            source_format: Some("webm".to_string()),
            info: SourceInfo {
                title: Some(format!("Fake {}", source.id)),
                uploader: None,
                duration_secs: Some(self.duration_secs),
                playlist: self.playlist.clone(),
            },
        })
    }
}

/// Transcoder emitting `total` bytes of a fixed pattern in chunks.
#[derive(Debug, Clone)]
pub struct FakeTranscoder {
    calls: Arc<AtomicUsize>,
    total: usize,
    chunk_size: usize,
    chunk_delay: Duration,
    fail_after: Option<usize>,
}

impl FakeTranscoder {
    pub fn new(total: usize) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            total,
            chunk_size: 4096,
            chunk_delay: Duration::ZERO,
            fail_after: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sleep before every chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Emit an I/O error once at least `bytes` have been produced.
    pub fn fail_after(mut self, bytes: usize) -> Self {
        self.fail_after = Some(bytes);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// The exact bytes a successful run of `total` bytes produces.
    pub fn expected_bytes(total: usize) -> Vec<u8> {
        (0..total).map(pattern_byte).collect()
    }
}

fn pattern_byte(i: usize) -> u8 {
    (i % 251) as u8
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(
        &self,
        _stream: &ExtractedStream,
        _spec: &AudioSpec,
    ) -> Result<ByteStream, MediaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(pattern_stream(self.clone())))
    }
}

fn pattern_stream(fake: FakeTranscoder) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    async_stream::try_stream! {
        let mut offset = 0usize;
        while offset < fake.total {
            if fake.fail_after.is_some_and(|limit| offset >= limit) {
                Err::<(), _>(io::Error::other("fake transcoder failure"))?;
            }
            if !fake.chunk_delay.is_zero() {
                tokio::time::sleep(fake.chunk_delay).await;
            }
            let end = (offset + fake.chunk_size).min(fake.total);
            let chunk: Vec<u8> = (offset..end).map(pattern_byte).collect();
            offset = end;
            yield Bytes::from(chunk);
        }
        if fake.fail_after.is_some_and(|limit| offset >= limit) {
            Err::<(), _>(io::Error::other("fake transcoder failure"))?;
        }
    }
}
