//! packsound - on-demand audio extraction, transcoding and caching server
//!
//! This library crate exposes the core functionality for integration testing.

pub mod cache;
pub mod coalesce;
pub mod config;
pub mod extract;
pub mod server;
pub mod streaming;
pub mod testing;
pub mod transcode;
