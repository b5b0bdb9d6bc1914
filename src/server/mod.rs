use crate::cache::{start_sweeper, CachePolicy, CacheStore};
use crate::coalesce::Coalescer;
use crate::config::Config;
use crate::extract::{Extractor, YtDlpExtractor};
use crate::streaming;
use crate::transcode::pipeline::Pipeline;
use crate::transcode::{FfmpegTranscoder, Transcoder};
use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use packsound_av::get_tool_path;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

mod error;
pub mod routes_api;

pub use error::AppError;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub store: CacheStore,
    pub coalescer: Coalescer,
    pub config: Arc<Config>,
}

impl AppContext {
    /// Open the cache and wire the resolution pipeline around the given
    /// backends.
    pub fn new(
        config: Config,
        extractor: Arc<dyn Extractor>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Result<Self> {
        let spec = config.transcode.audio_spec();
        let store = CacheStore::open(
            &config.cache.dir,
            spec.format,
            CachePolicy::from(&config.cache),
        )
        .with_context(|| format!("Failed to open cache at {:?}", config.cache.dir))?;

        let pipeline = Pipeline::new(
            store.clone(),
            extractor,
            transcoder,
            spec,
            config.transcode.timeout(),
        );

        Ok(Self {
            store,
            coalescer: Coalescer::new(pipeline),
            config: Arc::new(config),
        })
    }

    /// Context backed by the real yt-dlp and ffmpeg binaries.
    pub fn with_tools(config: Config) -> Result<Self> {
        let ytdlp = get_tool_path("yt-dlp", config.tools.ytdlp_path.as_deref())
            .context("yt-dlp not found")?;
        let ffmpeg = get_tool_path("ffmpeg", config.tools.ffmpeg_path.as_deref())
            .context("ffmpeg not found")?;
        tracing::info!("Using yt-dlp at {:?}, ffmpeg at {:?}", ytdlp, ffmpeg);

        let extractor = YtDlpExtractor::new(
            ytdlp,
            config.extract.format.clone(),
            config.extract.timeout(),
        );
        let transcoder = FfmpegTranscoder::new(ffmpeg);
        Self::new(config, Arc::new(extractor), Arc::new(transcoder))
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::RANGE])
        .expose_headers([header::CONTENT_RANGE, header::ACCEPT_RANGES]);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .nest("/api", routes_api::api_routes())
        .nest("/chunk", streaming::chunk_router())
        .merge(streaming::media_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Start the HTTP server and the cache sweeper
pub async fn start_server(ctx: AppContext) -> Result<()> {
    let config = Arc::clone(&ctx.config);
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let sweeper = start_sweeper(ctx.store.clone(), config.cache.sweep_interval_secs);

    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
