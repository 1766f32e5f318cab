//! Growing-file streaming
//!
//! Re-reads a file that another process is still appending to and hands out
//! fixed-size [`StreamChunk`]s in offset order. The stream only ends after the
//! writer signals completion through a [`CompletionSignal`].

use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::types::StreamChunk;
use std::future::Future;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// One-shot flag telling the streamer that no more bytes will be appended
#[derive(Clone, Debug, Default)]
pub struct CompletionSignal {
    fired: Arc<AtomicBool>,
}

impl CompletionSignal {
    /// Create an unfired signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the file complete. Idempotent.
    pub fn fire(&self) {
        self.fired.store(true, Ordering::Release);
    }

    /// Whether [`fire`](Self::fire) has been called
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// Reads a growing file in fixed-size chunks
#[derive(Clone, Debug)]
pub struct GrowingFileStreamer {
    chunk_size: u64,
    poll_interval: Duration,
}

impl GrowingFileStreamer {
    /// Create a streamer emitting `chunk_size` byte chunks
    pub fn new(chunk_size: u64, poll_interval: Duration) -> Self {
        Self {
            chunk_size,
            poll_interval,
        }
    }

    /// Create a streamer from the stream section of the configuration
    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.chunk_size, config.poll_interval)
    }

    /// Size of every non-final chunk
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Stream `path` into `on_chunk` until the file is complete
    ///
    /// Full chunks are emitted as soon as more than `chunk_size` unread bytes
    /// exist. Once `done` has fired and at most `chunk_size` bytes remain, the
    /// remainder goes out as the single `last` chunk (zero-length only for an
    /// empty file). A callback error stops the stream and is returned as is.
    /// Returns the number of chunks emitted.
    pub async fn stream<F, Fut>(
        &self,
        path: &Path,
        done: &CompletionSignal,
        cancel: &CancellationToken,
        mut on_chunk: F,
    ) -> Result<u64>
    where
        F: FnMut(StreamChunk) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if self.chunk_size == 0 {
            return Err(Error::Config {
                message: "chunk_size must be positive".to_string(),
                key: Some("stream.chunk_size".to_string()),
            });
        }

        let mut file = tokio::fs::File::open(path).await?;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut offset = 0u64;
        let mut index = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            // Sample the signal before the size: bytes appended ahead of the
            // signal are then guaranteed to be visible in this size.
            let completed = done.is_fired();
            let size = file.metadata().await?.len();
            let tail = size.saturating_sub(offset);

            if tail > self.chunk_size {
                let data = read_at(&mut file, offset, self.chunk_size).await?;
                tracing::debug!(offset, index, size = data.len(), "Streaming part");
                self.emit(
                    &mut on_chunk,
                    cancel,
                    StreamChunk {
                        offset,
                        index,
                        data,
                        last: false,
                    },
                )
                .await?;
                offset += self.chunk_size;
                index += 1;
                continue;
            }

            if completed {
                let data = read_at(&mut file, offset, tail).await?;
                tracing::info!(
                    path = %path.display(),
                    offset,
                    index,
                    size = data.len(),
                    "Streaming last part"
                );
                self.emit(
                    &mut on_chunk,
                    cancel,
                    StreamChunk {
                        offset,
                        index,
                        data,
                        last: true,
                    },
                )
                .await?;
                return Ok(index + 1);
            }

            tracing::trace!(offset, tail, "Not enough data yet");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = ticker.tick() => {}
            }
        }
    }

    async fn emit<F, Fut>(
        &self,
        on_chunk: &mut F,
        cancel: &CancellationToken,
        chunk: StreamChunk,
    ) -> Result<()>
    where
        F: FnMut(StreamChunk) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = on_chunk(chunk) => result,
        }
    }
}

/// Stream a growing file with a one-off [`GrowingFileStreamer`]
pub async fn stream_file<F, Fut>(
    path: &Path,
    chunk_size: u64,
    done: &CompletionSignal,
    cancel: &CancellationToken,
    poll_interval: Duration,
    on_chunk: F,
) -> Result<u64>
where
    F: FnMut(StreamChunk) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    GrowingFileStreamer::new(chunk_size, poll_interval)
        .stream(path, done, cancel, on_chunk)
        .await
}

async fn read_at(file: &mut tokio::fs::File, offset: u64, len: u64) -> Result<Vec<u8>> {
    let mut data = vec![0u8; len as usize];
    file.seek(SeekFrom::Start(offset)).await?;
    file.read_exact(&mut data).await?;
    Ok(data)
}
