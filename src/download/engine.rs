//! Download engine -- probe, allocate, split, then drain a pre-filled part
//! queue with a fixed group of workers.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::partition::{Part, PartitionedFile};
use crate::retry::{IsRetryable, RetryError, download_with_retry};
use crate::types::Event;
use crate::utils::ensure_space_for;

use super::source::RangeSource;

/// Capacity of the progress event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Downloads remote objects into [`PartitionedFile`]s with parallel range fetches.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tentacle::{ChunkDownloadEngine, Config, HttpRangeSource, SourceDescriptor};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> tentacle::Result<()> {
/// let engine = ChunkDownloadEngine::new(Config::default());
/// let source = SourceDescriptor::new("https://cdn.example.com/video.mp4");
/// let source = Arc::new(HttpRangeSource::new(reqwest::Client::new(), &source)?);
///
/// let file = engine
///     .download(source, "video.mp4", &CancellationToken::new())
///     .await?;
/// assert!(file.is_complete());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ChunkDownloadEngine {
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
}

/// State shared by the workers of one download
struct WorkerContext {
    source: Arc<dyn RangeSource>,
    config: Arc<Config>,
    queue: Mutex<mpsc::Receiver<Arc<Part>>>,
    total_size: u64,
    /// Caller's token; aborts in-flight attempts
    cancel: CancellationToken,
    /// Fired when any worker fails; stops further dequeues only
    stop: CancellationToken,
    event_tx: broadcast::Sender<Event>,
}

impl ChunkDownloadEngine {
    /// Create an engine using the download and retry sections of `config`
    pub fn new(config: Config) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config: Arc::new(config),
            event_tx,
        }
    }

    /// Subscribe to progress events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Probe, allocate and split, then fetch every part
    pub async fn download(
        &self,
        source: Arc<dyn RangeSource>,
        path: impl Into<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<Arc<PartitionedFile>> {
        let file = Arc::new(self.prepare(source.as_ref(), path, cancel).await?);
        self.download_parts(source, &file, cancel).await?;
        Ok(file)
    }

    /// Resolve the exact size, allocate storage and split it into parts
    ///
    /// The probe is not retried: a source that cannot be sized is treated as
    /// unreachable or misconfigured. The returned file can be handed to a
    /// reader before [`download_parts`](Self::download_parts) starts.
    pub async fn prepare(
        &self,
        source: &dyn RangeSource,
        path: impl Into<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<PartitionedFile> {
        let mut file = PartitionedFile::new(path);

        let total_size = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            size = source.probe_size() => size?,
        };
        file.set_total_size(total_size)?;

        if self.config.download.check_disk_space {
            ensure_space_for(file.path(), total_size)?;
        }
        file.allocate().await?;
        let parts = file.split(source.chunk_size_hint())?.len();

        tracing::info!(
            path = %file.path().display(),
            total_size,
            parts,
            chunk_size = file.chunk_size().unwrap_or_default(),
            "Prepared partitioned file"
        );
        Ok(file)
    }

    /// Fetch every part of a prepared file with the configured worker count
    ///
    /// The first part to exhaust its retries fails the whole call; other
    /// workers finish their current part and stop. On success every part is
    /// available.
    pub async fn download_parts(
        &self,
        source: Arc<dyn RangeSource>,
        file: &Arc<PartitionedFile>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let total_size = file
            .total_size()
            .ok_or_else(|| Error::Partition("download of an unsized file".to_string()))?;
        if !file.is_allocated() {
            return Err(Error::allocation(file.path(), "not allocated"));
        }

        let parts = file.parts();
        if parts.is_empty() {
            self.event_tx
                .send(Event::DownloadComplete {
                    total_size,
                    parts: 0,
                })
                .ok();
            return Ok(());
        }

        let (queue_tx, queue_rx) = mpsc::channel(parts.len());
        for part in parts {
            queue_tx
                .try_send(Arc::clone(part))
                .map_err(|e| Error::Partition(format!("part queue rejected a part: {e}")))?;
        }
        drop(queue_tx);

        let ctx = Arc::new(WorkerContext {
            source,
            config: Arc::clone(&self.config),
            queue: Mutex::new(queue_rx),
            total_size,
            cancel: cancel.clone(),
            stop: cancel.child_token(),
            event_tx: self.event_tx.clone(),
        });

        let concurrency = self.config.download.concurrency.max(1).min(parts.len());
        let started = Instant::now();
        let mut workers = JoinSet::new();
        for worker_id in 0..concurrency {
            workers.spawn(run_worker(worker_id, Arc::clone(&ctx)));
        }

        let mut first_error: Option<Error> = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(Error::TransientIo(std::io::Error::other(format!(
                    "part worker panicked: {e}"
                ))))
            });
            if let Err(e) = result {
                ctx.stop.cancel();
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        if let Some(e) = first_error {
            tracing::error!(path = %file.path().display(), error = %e, "Chunked download failed");
            return Err(e);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tracing::info!(
            path = %file.path().display(),
            total_size,
            parts = parts.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Chunked download complete"
        );
        self.event_tx
            .send(Event::DownloadComplete {
                total_size,
                parts: parts.len(),
            })
            .ok();
        Ok(())
    }
}

/// Pull parts until the queue is empty, a sibling failed, or the caller cancelled.
async fn run_worker(worker_id: usize, ctx: Arc<WorkerContext>) -> Result<()> {
    loop {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if ctx.stop.is_cancelled() {
            return Ok(());
        }

        let next = ctx.queue.lock().await.recv().await;
        let Some(part) = next else {
            tracing::debug!(worker_id, "Part queue drained");
            return Ok(());
        };

        if let Err(e) = fetch_part_with_retry(&ctx, &part).await {
            ctx.stop.cancel();
            return Err(e);
        }
    }
}

/// Fetch one part, retrying transient failures with the configured backoff.
async fn fetch_part_with_retry(ctx: &WorkerContext, part: &Arc<Part>) -> Result<()> {
    let max_attempts = ctx.config.retry.max_attempts;

    let outcome = download_with_retry(&ctx.config.retry, &ctx.cancel, |attempt| async move {
        let started = Instant::now();
        match fetch_part_attempt(ctx, part).await {
            Ok(written) => {
                let duration = started.elapsed();
                let speed_bps = (written as f64 / duration.as_secs_f64().max(1e-6)) as u64;
                tracing::info!(
                    offset = part.offset(),
                    expected_size = part.size(),
                    actual_size = written,
                    duration_ms = duration.as_millis() as u64,
                    speed_bps,
                    "Downloaded part"
                );
                ctx.event_tx
                    .send(Event::PartDownloaded {
                        offset: part.offset(),
                        expected_size: part.size(),
                        actual_size: written,
                        duration_ms: duration.as_millis() as u64,
                    })
                    .ok();
                Ok(())
            }
            Err(e) => {
                tracing::error!(offset = part.offset(), attempt, error = %e, "Failed to download part");
                if e.is_retryable() && attempt < max_attempts {
                    ctx.event_tx
                        .send(Event::PartRetrying {
                            offset: part.offset(),
                            attempt,
                            error: e.to_string(),
                        })
                        .ok();
                }
                Err(e)
            }
        }
    })
    .await;

    match outcome {
        Ok(()) => Ok(()),
        Err(RetryError::Exhausted { attempts, last }) => Err(Error::RetryExhausted {
            offset: part.offset(),
            size: part.size(),
            attempts,
            source: Box::new(last),
        }),
        Err(RetryError::Permanent { error, .. }) => Err(error),
        Err(RetryError::Cancelled) => Err(Error::Cancelled),
    }
}

/// One attempt: independent handle seeked to the part, ranged fetch, then mark available.
async fn fetch_part_attempt(ctx: &WorkerContext, part: &Part) -> Result<u64> {
    let attempt = async {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(part.file_path())
            .await?;
        file.seek(SeekFrom::Start(part.offset())).await?;

        let written = ctx
            .source
            .fetch_range(part.offset(), part.size(), ctx.total_size, &mut file)
            .await?;
        file.flush().await?;
        Ok::<_, Error>(written)
    };

    let written = match ctx.config.download.part_timeout {
        Some(timeout) => tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| Error::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })??,
        None => attempt.await?,
    };

    part.set_available();
    Ok(written)
}
