use crate::cache::{CacheEntry, Eviction};
use crate::server::{AppContext, AppError};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use packsound_common::{resolve_reference, CanonicalId, MediaError};
use serde::{Deserialize, Serialize};

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/resolve", get(resolve))
        .route("/cache", get(list_cache))
        .route("/cache/:id", get(get_entry).delete(delete_entry))
}

/// Public view of a cache entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct EntryView {
    pub id: CanonicalId,
    pub state: String,
    pub size: u64,
    pub title: Option<String>,
    pub duration_secs: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Ids queued after this one when the reference was a playlist.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub playlist: Vec<CanonicalId>,
}

impl From<&CacheEntry> for EntryView {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            id: entry.id.clone(),
            state: entry.state.name().to_string(),
            size: entry.size,
            title: entry.info.title.clone(),
            duration_secs: entry.info.duration_secs,
            created_at: entry.created_at,
            last_accessed_at: entry.last_accessed_at,
            error: entry.failure().map(|e| e.code().to_string()),
            playlist: entry.info.playlist.clone(),
        }
    }
}

#[derive(Deserialize)]
struct ResolveQuery {
    q: String,
}

/// Resolve a reference all the way to a Ready entry.
async fn resolve(
    State(ctx): State<AppContext>,
    Query(params): Query<ResolveQuery>,
) -> Result<Json<EntryView>, AppError> {
    let source = resolve_reference(&params.q)?;
    let entry = ctx.coalescer.resolve(&source).await?;
    Ok(Json(EntryView::from(&entry)))
}

async fn list_cache(State(ctx): State<AppContext>) -> impl IntoResponse {
    let entries: Vec<EntryView> = ctx.store.list().iter().map(EntryView::from).collect();
    Json(entries)
}

async fn get_entry(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<EntryView>, AppError> {
    let id = CanonicalId::parse(&id).ok_or(MediaError::NotFound)?;
    let entry = ctx.store.get(&id)?;
    Ok(Json(EntryView::from(&entry)))
}

async fn delete_entry(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = CanonicalId::parse(&id).ok_or(MediaError::NotFound)?;
    match ctx.store.evict(&id)? {
        Eviction::Removed => tracing::info!(id = %id, "Purged cache entry"),
        Eviction::Deferred => {
            tracing::info!(id = %id, "Cache entry in use; purge deferred until readers close")
        }
    }
    Ok(StatusCode::NO_CONTENT)
}
