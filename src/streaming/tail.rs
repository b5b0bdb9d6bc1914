//! Response bodies that read from a cache entry.
//!
//! [`tail_body`] follows a file that may still be growing: it only ever
//! reads bytes the writer has published through the slot's watch channel,
//! and wakes on every publish (with a bounded poll as backstop). The stream
//! owns the [`StreamHandle`], so the entry cannot be deleted under it.

use std::io::{self, SeekFrom};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::cache::{EntryState, StreamHandle};

const READ_BUF: usize = 64 * 1024;

/// Stream bytes `start..=end` (or to EOF) following the writer.
///
/// Ends when `end` is reached or the entry is Ready and fully read. Fails
/// with an I/O error if the entry fails mid-stream.
pub fn tail_body(
    handle: StreamHandle,
    start: u64,
    end: Option<u64>,
    poll: Duration,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    async_stream::try_stream! {
        let mut file = File::open(handle.file_path()).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut status = handle.subscribe();
        let mut buf = vec![0u8; READ_BUF];
        let mut pos = start;

        loop {
            if end.is_some_and(|end| pos > end) {
                break;
            }

            let current = status.borrow_and_update().clone();
            if let EntryState::Failed(e) = &current.state {
                tracing::debug!(id = %handle.id(), error = %e, "entry failed while tailing");
                Err::<(), _>(io::Error::new(io::ErrorKind::ConnectionAborted, e.to_string()))?;
            }

            if pos < current.written {
                let mut want = (current.written - pos).min(READ_BUF as u64);
                if let Some(end) = end {
                    want = want.min(end.saturating_sub(pos).saturating_add(1));
                }
                let n = file.read(&mut buf[..want as usize]).await?;
                if n > 0 {
                    pos += n as u64;
                    yield Bytes::copy_from_slice(&buf[..n]);
                    continue;
                }
                if current.state == EntryState::Ready {
                    Err::<(), _>(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "cache file shorter than recorded size",
                    ))?;
                }
            } else if current.state == EntryState::Ready {
                break;
            }

            // Either a publish or the poll interval wakes us; both re-check.
            if let Ok(Err(_)) = tokio::time::timeout(poll, status.changed()).await {
                Err::<(), _>(io::Error::new(io::ErrorKind::ConnectionAborted, "entry closed"))?;
            }
        }
    }
}

/// Stream `len` bytes from `start` of a complete file.
pub async fn ready_body(
    handle: StreamHandle,
    start: u64,
    len: u64,
) -> io::Result<impl Stream<Item = io::Result<Bytes>> + Send + 'static> {
    let mut file = File::open(handle.file_path()).await?;
    if start > 0 {
        file.seek(SeekFrom::Start(start)).await?;
    }
    let mut reader = ReaderStream::new(file.take(len));
    Ok(async_stream::try_stream! {
        // Held until the body is dropped so the file outlives any eviction.
        let _handle = handle;
        while let Some(chunk) = reader.next().await {
            yield chunk?;
        }
    })
}
