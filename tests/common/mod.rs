//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which builds a full [`AppContext`] over a
//! temporary cache directory with fake extraction and transcoding backends.
//! The [`TestHarness::with_server`] constructor starts Axum on a random port
//! for HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::Router;
use tempfile::TempDir;

use packsound::config::Config;
use packsound::server::{create_router, AppContext};
use packsound::testing::{FakeExtractor, FakeTranscoder};

/// Size the default fake transcoder produces: a 10 s source at 16 KB/s.
pub const ASSET_SIZE: usize = 160_000;

/// Test harness wrapping a fully-constructed [`AppContext`].
pub struct TestHarness {
    pub ctx: AppContext,
    pub dir: TempDir,
    pub extract_calls: Arc<AtomicUsize>,
    pub transcode_calls: Arc<AtomicUsize>,
}

/// Config pointing at `dir`, with the sweeper off and a short tail poll.
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.cache.dir = dir.path().to_path_buf();
    config.cache.sweep_interval_secs = 0;
    config.streaming.tail_poll_ms = 20;
    config
}

impl TestHarness {
    /// Harness whose transcoder produces [`ASSET_SIZE`] bytes.
    pub fn new() -> Self {
        Self::with_fakes(FakeExtractor::new(), FakeTranscoder::new(ASSET_SIZE))
    }

    pub fn with_fakes(extractor: FakeExtractor, transcoder: FakeTranscoder) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        Self::in_dir(dir, extractor, transcoder)
    }

    /// Build over an existing cache directory (to exercise restart recovery).
    pub fn in_dir(dir: TempDir, extractor: FakeExtractor, transcoder: FakeTranscoder) -> Self {
        let config = test_config(&dir);
        let extract_calls = extractor.calls();
        let transcode_calls = transcoder.calls();
        let ctx = AppContext::new(config, Arc::new(extractor), Arc::new(transcoder))
            .expect("failed to build context");

        Self {
            ctx,
            dir,
            extract_calls,
            transcode_calls,
        }
    }

    pub fn router(&self) -> Router {
        create_router(self.ctx.clone())
    }

    pub fn extract_calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }

    pub fn transcode_calls(&self) -> usize {
        self.transcode_calls.load(Ordering::SeqCst)
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server() -> (Self, SocketAddr) {
        Self::new().serve().await
    }

    /// Start an Axum server for this harness on a random port.
    pub async fn serve(self) -> (Self, SocketAddr) {
        let app = self.router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (self, addr)
    }
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}
