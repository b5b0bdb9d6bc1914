//! Cache store for transcoded assets.
//!
//! One slot per [`CanonicalId`]. A slot moves Pending → Writing → Ready, or to
//! Failed from Pending/Writing, and never back. Every transition and every
//! published write is broadcast through the slot's `watch` channel, which is
//! what tailing readers and coalesced waiters suspend on.
//!
//! On disk each Ready entry is `<id>.<ext>` plus a `<id>.json` sidecar.

pub mod sidecar;
mod store;

pub use store::{CacheStore, Eviction, StreamHandle, SweepReport};

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use packsound_common::{CanonicalId, MediaError, SourceInfo};

use crate::config::CacheConfig;

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    /// Created, nothing produced yet.
    Pending,
    /// Transcoder output is being appended to the data file.
    Writing,
    /// Data file complete and durable.
    Ready,
    /// Resolution failed; the error is served until the negative TTL expires.
    Failed(MediaError),
}

impl EntryState {
    pub fn name(&self) -> &'static str {
        match self {
            EntryState::Pending => "pending",
            EntryState::Writing => "writing",
            EntryState::Ready => "ready",
            EntryState::Failed(_) => "failed",
        }
    }

    /// Ready or Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryState::Ready | EntryState::Failed(_))
    }

    /// Whether bytes can be read (possibly while still being written).
    pub fn is_streamable(&self) -> bool {
        matches!(self, EntryState::Writing | EntryState::Ready)
    }
}

/// Value carried by a slot's watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotStatus {
    pub state: EntryState,
    /// Bytes durably handed to the file so far; the final size once Ready.
    pub written: u64,
}

/// Immutable snapshot of a cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub id: CanonicalId,
    /// Distinguishes a recreated entry from the one it replaced.
    pub generation: u64,
    pub state: EntryState,
    pub file_path: PathBuf,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub info: SourceInfo,
    /// For Failed entries, when a new attempt becomes allowed.
    pub retry_at: Option<Instant>,
}

impl CacheEntry {
    pub fn failure(&self) -> Option<&MediaError> {
        match &self.state {
            EntryState::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Whether a Failed entry's negative-cache window has passed.
    pub fn failure_expired(&self, now: Instant) -> bool {
        match self.state {
            EntryState::Failed(_) => self.retry_at.map_or(true, |t| now >= t),
            _ => false,
        }
    }
}

/// Retention and negative-cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub negative_ttl: Duration,
    pub rate_limit_backoff: Duration,
    pub max_idle: Option<Duration>,
    pub max_total_bytes: Option<u64>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        (&CacheConfig::default()).into()
    }
}

impl From<&CacheConfig> for CachePolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            negative_ttl: config.negative_ttl(),
            rate_limit_backoff: config.rate_limit_backoff(),
            max_idle: config.max_idle(),
            max_total_bytes: config.max_total(),
        }
    }
}

/// Start the background sweeper.
///
/// Runs [`CacheStore::sweep`] every `interval_secs`. Returns `None` when the
/// interval is 0 (sweeping disabled).
pub fn start_sweeper(
    store: CacheStore,
    interval_secs: u64,
) -> Option<tokio::task::JoinHandle<()>> {
    if interval_secs == 0 {
        tracing::info!("Cache sweeper disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so startup isn't a sweep.
        interval.tick().await;

        loop {
            interval.tick().await;
            let report = store.sweep(Instant::now());
            if report.total() > 0 {
                tracing::info!(
                    idle = report.evicted_idle,
                    size = report.evicted_size,
                    failures = report.expired_failures,
                    freed_bytes = report.freed_bytes,
                    "Cache sweep evicted entries"
                );
            }
        }
    }))
}
