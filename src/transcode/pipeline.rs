//! Extraction → transcode → cache orchestration for a single source.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::StreamExt;
use packsound_common::{AudioSpec, CanonicalId, ExtractedStream, MediaError, SourceRef};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::Transcoder;
use crate::cache::{CacheEntry, CacheStore};
use crate::extract::Extractor;

/// Everything needed to produce one cache entry.
#[derive(Clone)]
pub struct Pipeline {
    store: CacheStore,
    extractor: Arc<dyn Extractor>,
    transcoder: Arc<dyn Transcoder>,
    spec: AudioSpec,
    timeout: Duration,
}

impl Pipeline {
    pub fn new(
        store: CacheStore,
        extractor: Arc<dyn Extractor>,
        transcoder: Arc<dyn Transcoder>,
        spec: AudioSpec,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            extractor,
            transcoder,
            spec,
            timeout,
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Extract `source` and transcode it into its Pending entry.
    ///
    /// Always leaves the entry Ready or Failed.
    pub async fn produce(&self, source: &SourceRef) -> Result<CacheEntry, MediaError> {
        if !source.is_resolvable() {
            return self.fail(&source.id, MediaError::NotFound);
        }

        debug!(id = %source.id, locator = ?source.locator, "extracting");
        match self.extractor.extract(source).await {
            Ok(stream) => self.run(&source.id, stream).await,
            Err(e) => {
                warn!(id = %source.id, kind = e.code(), "extraction failed");
                self.fail(&source.id, e)
            }
        }
    }

    /// Transcode an extracted stream into the Pending entry `id`.
    pub async fn run(
        &self,
        id: &CanonicalId,
        stream: ExtractedStream,
    ) -> Result<CacheEntry, MediaError> {
        let written = match tokio::time::timeout(self.timeout, self.write(id, &stream)).await {
            Ok(Ok(written)) => written,
            Ok(Err(e)) => {
                warn!(id = %id, error = %format!("{e:#}"), "transcode failed");
                return self.fail(id, MediaError::TranscodeFailed);
            }
            Err(_) => {
                warn!(id = %id, timeout = ?self.timeout, "transcode timed out");
                return self.fail(id, MediaError::TranscodeFailed);
            }
        };

        match self.store.mark_ready(id, written) {
            Ok(entry) => {
                info!(id = %id, size = written, "transcode complete");
                Ok(entry)
            }
            Err(e) => {
                warn!(id = %id, error = %e, "failed to finalize entry");
                self.fail(id, MediaError::TranscodeFailed)
            }
        }
    }

    async fn write(&self, id: &CanonicalId, stream: &ExtractedStream) -> anyhow::Result<u64> {
        let mut file = self.store.mark_writing(id, stream.info.clone())?;
        let mut output = self.transcoder.transcode(stream, &self.spec).await?;

        let mut written = 0u64;
        while let Some(chunk) = output.next().await {
            let chunk = chunk.context("transcoder output")?;
            if chunk.is_empty() {
                continue;
            }
            file.write_all(&chunk).await.context("write cache file")?;
            // Readers open the file by path; the bytes must be in it before
            // they are announced.
            file.flush().await.context("flush cache file")?;
            written += chunk.len() as u64;
            self.store.publish_progress(id, written);
        }

        file.sync_data().await.context("sync cache file")?;
        if written == 0 {
            anyhow::bail!("transcoder produced no output");
        }
        Ok(written)
    }

    fn fail(&self, id: &CanonicalId, error: MediaError) -> Result<CacheEntry, MediaError> {
        if let Err(e) = self.store.mark_failed(id, error.clone()) {
            warn!(id = %id, error = %e, "could not record failure");
        }
        Err(error)
    }
}
