//! Media streaming.
//!
//! # Routes
//!
//! - `GET /{reference}` - Whole asset or a byte range; tails entries still
//!   being transcoded
//! - `GET /chunk/{reference}/{index}` - One fixed-size block of the asset

mod direct;
pub mod range;
pub mod tail;

pub use direct::{stream_chunk, stream_media};

use axum::{routing::get, Router};

use crate::server::AppContext;

/// Create the media streaming router.
pub fn media_router() -> Router<AppContext> {
    Router::new().route("/:reference", get(stream_media))
}

/// Create the chunk router.
pub fn chunk_router() -> Router<AppContext> {
    Router::new().route("/:reference/:index", get(stream_chunk))
}
