//! Chunked, lazily produced reads of a byte window.
//!
//! A [`RangeStream`] owns an open, already positioned store reader and
//! turns it into a `Stream` of bounded chunks.  Each chunk is read by a
//! separate job on the worker pool, so at most one chunk is buffered and
//! nothing is read until the response body asks for it.
//!
//! A read failure mid-stream ends the stream quietly: the client sees a
//! body shorter than the announced `Content-Length`.

use std::convert::Infallible;
use std::io::{Read, Seek, SeekFrom};

use bytes::Bytes;
use futures::stream::{self, Stream};
use tracing::debug;

use super::adapter::{RemoteStoreAdapter, WorkerPool};
use super::backend::{ObjectReader, StoreResult};
use crate::metrics::record_bytes_sent;

/// Upper bound on the size of one streamed chunk.
pub const STREAM_CHUNK_SIZE: usize = 8 * 1024;

/// Single-pass byte stream over `[start, start + length)` of one object.
pub struct RangeStream {
    reader: Box<dyn ObjectReader>,
    pool: WorkerPool,
    /// Bytes still to emit; `None` streams to end-of-data.
    remaining: Option<u64>,
}

impl RangeStream {
    /// Open `key`, seek to `start`, and prepare to emit `length` bytes
    /// (or everything up to end-of-data when `length` is `None`).
    pub async fn open(
        store: &RemoteStoreAdapter,
        key: &str,
        start: u64,
        length: Option<u64>,
    ) -> StoreResult<Self> {
        let key = key.to_string();
        let reader = store
            .run("open_read", move |s| {
                let mut reader = s.open_read(&key)?;
                if start > 0 {
                    reader.seek(SeekFrom::Start(start))?;
                }
                Ok(reader)
            })
            .await?;
        Ok(Self {
            reader,
            pool: store.pool().clone(),
            remaining: length,
        })
    }

    /// Consume into a `Stream` suitable for `axum::body::Body::from_stream`.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        stream::unfold(Some(self), |state| async move {
            let RangeStream {
                reader,
                pool,
                remaining,
            } = state?;

            let want = match remaining {
                Some(0) => return None,
                Some(n) => n.min(STREAM_CHUNK_SIZE as u64) as usize,
                None => STREAM_CHUNK_SIZE,
            };

            let job = pool.run(move || {
                let mut reader = reader;
                let mut buf = vec![0u8; want];
                let n = reader.read(&mut buf)?;
                buf.truncate(n);
                Ok((reader, buf))
            });

            match job.await {
                Ok((_, buf)) if buf.is_empty() => None,
                Ok((reader, buf)) => {
                    let len = buf.len() as u64;
                    record_bytes_sent(len);
                    let next = RangeStream {
                        reader,
                        pool,
                        remaining: remaining.map(|r| r.saturating_sub(len)),
                    };
                    Some((Ok(Bytes::from(buf)), Some(next)))
                }
                Err(e) => {
                    debug!(error = %e, "read stream ended early");
                    None
                }
            }
        })
    }
}
