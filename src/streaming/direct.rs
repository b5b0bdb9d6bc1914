//! Media streaming with HTTP range requests.
//!
//! Serves cache entries by reference. A Ready entry is a plain file with a
//! known size; a Writing entry is tailed as the transcoder appends to it.

use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, response::Builder, HeaderMap, StatusCode},
    response::Response,
};
use packsound_common::{resolve_reference, Error, MediaError, SourceRef};

use super::range::{content_range, parse_range_header, ByteRange};
use super::tail::{ready_body, tail_body};
use crate::cache::{EntryState, SlotStatus, StreamHandle};
use crate::server::{AppContext, AppError};

/// `GET /:reference`
pub async fn stream_media(
    State(ctx): State<AppContext>,
    Path(reference): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let source = resolve_reference(&reference)?;
    // Unparseable ranges are ignored and the whole asset is served.
    let range = headers
        .get(header::RANGE)
        .and_then(|h| h.to_str().ok())
        .and_then(parse_range_header);

    let handle = open_stream(&ctx, &source).await?;
    let poll = ctx.config.streaming.tail_poll();
    let content_type = ctx.store.format().content_type();

    let status = match range {
        None => wait_until(&handle, poll, |s| s.state.is_streamable()).await?,
        Some(r) if r.is_whole() => wait_until(&handle, poll, |s| s.state.is_streamable()).await?,
        // Tail a bounded range only once all of it is on disk, so the
        // `bytes a-b/*` promise always holds; a short asset ends Ready.
        Some(ByteRange::Bounded { end, .. }) => {
            wait_until(&handle, poll, |s| s.written > end).await?
        }
        // Open-ended and suffix ranges need the final size.
        Some(_) => wait_until(&handle, poll, |_| false).await?,
    };

    if status.state == EntryState::Ready {
        return serve_ready(handle, status.written, range, content_type).await;
    }

    tracing::debug!(id = %source.id, written = status.written, ?range, "tailing entry");
    match range {
        Some(ByteRange::Bounded { start, end }) => build(
            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_RANGE, content_range(start, end, None))
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::CACHE_CONTROL, "no-cache"),
            Body::from_stream(tail_body(handle, start, Some(end), poll)),
        ),
        _ => build(
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::CACHE_CONTROL, "no-cache"),
            Body::from_stream(tail_body(handle, 0, None, poll)),
        ),
    }
}

/// `GET /chunk/:reference/:index`
///
/// Returns one `streaming.chunk_size` block. An index past the end of a
/// Ready entry yields an empty body.
pub async fn stream_chunk(
    State(ctx): State<AppContext>,
    Path((reference, index)): Path<(String, u64)>,
) -> Result<Response, AppError> {
    let source = resolve_reference(&reference)?;
    let chunk_size = ctx.config.streaming.chunk_size;
    let start = index.saturating_mul(chunk_size);
    let end = start.saturating_add(chunk_size.saturating_sub(1));

    let handle = open_stream(&ctx, &source).await?;
    let poll = ctx.config.streaming.tail_poll();
    let content_type = ctx.store.format().content_type();
    let status = wait_until(&handle, poll, |s| s.written > start).await?;

    if status.state == EntryState::Writing {
        return build(
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CACHE_CONTROL, "no-cache"),
            Body::from_stream(tail_body(handle, start, Some(end), poll)),
        );
    }

    let total = status.written;
    if start >= total {
        return build(
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, "0"),
            Body::empty(),
        );
    }

    let length = end.min(total - 1) - start + 1;
    let body = ready_body(handle, start, length).await?;
    build(
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, length.to_string())
            .header(header::CACHE_CONTROL, "max-age=31536000"),
        Body::from_stream(body),
    )
}

/// Resolve `source` until streamable and register a reader on it.
async fn open_stream(ctx: &AppContext, source: &SourceRef) -> Result<StreamHandle, AppError> {
    let entry = ctx.coalescer.acquire(source).await?;
    match ctx.store.open_handle(&entry) {
        Ok(handle) => Ok(handle),
        Err(Error::Media(MediaError::NotFound)) => {
            // Evicted or replaced between resolution and open.
            tracing::debug!(id = %source.id, "entry changed before open; retrying");
            let entry = ctx.coalescer.acquire(source).await?;
            Ok(ctx.store.open_handle(&entry)?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Wait until `done` holds or the entry turns Ready.
async fn wait_until(
    handle: &StreamHandle,
    poll: Duration,
    done: impl Fn(&SlotStatus) -> bool,
) -> Result<SlotStatus, MediaError> {
    let mut status = handle.subscribe();
    loop {
        let current = status.borrow_and_update().clone();
        match &current.state {
            EntryState::Failed(e) => return Err(e.clone()),
            EntryState::Ready => return Ok(current),
            _ if done(&current) => return Ok(current),
            _ => {}
        }
        if let Ok(Err(_)) = tokio::time::timeout(poll, status.changed()).await {
            return Err(MediaError::NotFound);
        }
    }
}

async fn serve_ready(
    handle: StreamHandle,
    total: u64,
    range: Option<ByteRange>,
    content_type: &'static str,
) -> Result<Response, AppError> {
    let Some(range) = range else {
        let body = ready_body(handle, 0, total).await?;
        return build(
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, total.to_string())
                .header(header::ACCEPT_RANGES, "bytes")
                .header(header::CACHE_CONTROL, "max-age=31536000"),
            Body::from_stream(body),
        );
    };

    let Ok((start, end)) = range.resolve(total) else {
        return build(
            Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{total}")),
            Body::empty(),
        );
    };

    let length = end - start + 1;
    let body = ready_body(handle, start, length).await?;
    build(
        Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, length.to_string())
            .header(header::CONTENT_RANGE, content_range(start, end, Some(total)))
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::CACHE_CONTROL, "max-age=31536000"),
        Body::from_stream(body),
    )
}

fn build(builder: Builder, body: Body) -> Result<Response, AppError> {
    builder
        .body(body)
        .map_err(|e| Error::internal(format!("response build failed: {e}")).into())
}
