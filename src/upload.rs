//! Uploading a growing file through an invoker pool
//!
//! Each chunk produced by the [`GrowingFileStreamer`] becomes one
//! [`UploadPart`] call. Up to `upload_concurrency` calls run at once; the first
//! failed call stops the stream and fails the upload.

use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::pool::SharedInvoker;
use crate::streamer::{CompletionSignal, GrowingFileStreamer};
use crate::types::{Event, StreamChunk};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

/// One part of a chunked upload as handed to the RPC sink
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPart {
    /// Identifier shared by every part of one file
    pub file_id: i64,
    /// 0-based position of the part
    pub part_index: u64,
    /// Total part count; only known, and only set, on the final part
    pub total_parts: Option<u64>,
    /// Part contents
    pub bytes: Vec<u8>,
}

/// Outcome of a finished upload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSummary {
    /// Identifier the parts were sent under
    pub file_id: i64,
    /// Number of parts accepted by the sink
    pub parts: u64,
    /// Total bytes accepted by the sink
    pub bytes: u64,
}

/// Generate a random non-negative file identifier
pub fn random_file_id() -> i64 {
    rand::thread_rng().gen_range(0..i64::MAX)
}

/// Streams growing files into an [`Invoker`](crate::pool::Invoker) of upload parts
///
/// Pass an [`InvokerPool`](crate::pool::InvokerPool) to spread parts across
/// several RPC clients.
pub struct StreamUploader {
    invoker: SharedInvoker<UploadPart, ()>,
    config: StreamConfig,
    event_tx: Option<broadcast::Sender<Event>>,
}

/// State shared by the dispatcher and the in-flight part calls
struct UploadContext {
    invoker: SharedInvoker<UploadPart, ()>,
    file_id: i64,
    permits: Arc<Semaphore>,
    /// Fired by the first failed call, or by the caller's token
    abort: CancellationToken,
    failure: Mutex<Option<Error>>,
    parts: AtomicU64,
    bytes: AtomicU64,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl StreamUploader {
    /// Create an uploader sending parts through `invoker`
    pub fn new(invoker: SharedInvoker<UploadPart, ()>, config: StreamConfig) -> Self {
        Self {
            invoker,
            config,
            event_tx: None,
        }
    }

    /// Emit [`Event::ChunkUploaded`] and [`Event::UploadComplete`] on `event_tx`
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Upload `path` while it grows, until `done` fires and the tail is sent
    ///
    /// Zero-length chunks are not sent, so an empty file uploads nothing.
    /// Parts may complete out of order; `total_parts` rides on the last one.
    pub async fn upload_growing_file(
        &self,
        file_id: i64,
        path: &Path,
        done: &CompletionSignal,
        cancel: &CancellationToken,
    ) -> Result<UploadSummary> {
        let limit = self.config.upload_concurrency.max(1);
        let all_permits = u32::try_from(limit).map_err(|_| Error::Config {
            message: format!("upload_concurrency {limit} is too large"),
            key: Some("stream.upload_concurrency".to_string()),
        })?;

        let ctx = Arc::new(UploadContext {
            invoker: Arc::clone(&self.invoker),
            file_id,
            permits: Arc::new(Semaphore::new(limit)),
            abort: cancel.child_token(),
            failure: Mutex::new(None),
            parts: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            event_tx: self.event_tx.clone(),
        });

        tracing::info!(file_id, path = %path.display(), "Starting streamed upload");

        let streamer = GrowingFileStreamer::from_config(&self.config);
        let streamed = streamer
            .stream(path, done, &ctx.abort, |chunk| {
                let ctx = Arc::clone(&ctx);
                async move { ctx.dispatch(chunk).await }
            })
            .await;

        // Wait for every in-flight call to settle
        let _drained = ctx
            .permits
            .acquire_many(all_permits)
            .await
            .map_err(|_| Error::Cancelled)?;

        if let Some(e) = ctx.take_failure() {
            tracing::error!(file_id, error = %e, "Streamed upload failed");
            return Err(e);
        }
        streamed?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let summary = UploadSummary {
            file_id,
            parts: ctx.parts.load(Ordering::Acquire),
            bytes: ctx.bytes.load(Ordering::Acquire),
        };
        tracing::info!(
            file_id,
            parts = summary.parts,
            bytes = summary.bytes,
            "Streamed upload complete"
        );
        if let Some(tx) = &self.event_tx {
            tx.send(Event::UploadComplete {
                parts: summary.parts,
                bytes: summary.bytes,
            })
            .ok();
        }
        Ok(summary)
    }
}

impl UploadContext {
    /// Wait for a free slot, then send `chunk` in the background
    async fn dispatch(self: Arc<Self>, chunk: StreamChunk) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }

        let permit = tokio::select! {
            biased;
            _ = self.abort.cancelled() => return Err(Error::Cancelled),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| Error::Cancelled)?
            }
        };

        let part = UploadPart {
            file_id: self.file_id,
            part_index: chunk.index,
            total_parts: chunk.last.then_some(chunk.index + 1),
            bytes: chunk.data,
        };

        tokio::spawn(async move {
            let _permit = permit;
            let result = tokio::select! {
                biased;
                _ = self.abort.cancelled() => Err(Error::Cancelled),
                result = self.invoker.invoke(&part, &self.abort) => result,
            };
            match result {
                Ok(()) => self.record(&part),
                Err(e) => self.fail(part.part_index, e),
            }
        });
        Ok(())
    }

    fn record(&self, part: &UploadPart) {
        let size = part.bytes.len() as u64;
        self.parts.fetch_add(1, Ordering::AcqRel);
        self.bytes.fetch_add(size, Ordering::AcqRel);
        tracing::debug!(
            file_id = self.file_id,
            part_index = part.part_index,
            size,
            last = part.total_parts.is_some(),
            "Uploaded part"
        );
        if let Some(tx) = &self.event_tx {
            tx.send(Event::ChunkUploaded {
                index: part.part_index,
                size,
                last: part.total_parts.is_some(),
            })
            .ok();
        }
    }

    fn fail(&self, part_index: u64, error: Error) {
        if matches!(error, Error::Cancelled) {
            return;
        }
        tracing::warn!(file_id = self.file_id, part_index, error = %error, "Failed to upload part");
        let mut slot = self.failure.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(error);
        }
        drop(slot);
        self.abort.cancel();
    }

    fn take_failure(&self) -> Option<Error> {
        self.failure
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Invoker, InvokerPool};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Stores every part it receives, optionally failing one index
    #[derive(Default)]
    struct Sink {
        received: Mutex<Vec<UploadPart>>,
        fail_index: Option<u64>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Invoker<UploadPart, ()> for Sink {
        async fn invoke(&self, request: &UploadPart, _cancel: &CancellationToken) -> Result<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_index == Some(request.part_index) {
                return Err(Error::Rpc("FILE_PART_INVALID".to_string()));
            }
            self.received.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    fn config(chunk_size: u64, upload_concurrency: usize) -> StreamConfig {
        StreamConfig {
            chunk_size,
            poll_interval: Duration::from_millis(1),
            upload_concurrency,
        }
    }

    fn complete_file(dir: &TempDir, len: usize) -> (std::path::PathBuf, Vec<u8>) {
        let path = dir.path().join("upload.mp4");
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        (path, data)
    }

    fn fired() -> CompletionSignal {
        let done = CompletionSignal::new();
        done.fire();
        done
    }

    #[tokio::test]
    async fn uploads_every_part_with_total_on_last() {
        let dir = TempDir::new().unwrap();
        let (path, data) = complete_file(&dir, 2500);
        let sink = Arc::new(Sink::default());

        let uploader = StreamUploader::new(sink.clone(), config(1000, 2));
        let summary = uploader
            .upload_growing_file(42, &path, &fired(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            summary,
            UploadSummary {
                file_id: 42,
                parts: 3,
                bytes: 2500
            }
        );

        let mut parts = sink.received.lock().unwrap().clone();
        parts.sort_by_key(|p| p.part_index);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.file_id == 42));
        assert_eq!(parts[0].total_parts, None);
        assert_eq!(parts[1].total_parts, None);
        assert_eq!(parts[2].total_parts, Some(3));
        assert_eq!(parts[0].bytes.len(), 1000);
        assert_eq!(parts[2].bytes.len(), 500);

        let rebuilt: Vec<u8> = parts.iter().flat_map(|p| p.bytes.clone()).collect();
        assert_eq!(rebuilt, data);
    }

    #[tokio::test]
    async fn empty_file_uploads_nothing() {
        let dir = TempDir::new().unwrap();
        let (path, _) = complete_file(&dir, 0);
        let sink = Arc::new(Sink::default());

        let summary = StreamUploader::new(sink.clone(), config(1000, 2))
            .upload_growing_file(1, &path, &fired(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.parts, 0);
        assert!(sink.received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn in_flight_parts_are_bounded() {
        let dir = TempDir::new().unwrap();
        let (path, _) = complete_file(&dir, 10_000);
        let sink = Arc::new(Sink {
            delay: Duration::from_millis(10),
            ..Sink::default()
        });

        StreamUploader::new(sink.clone(), config(500, 3))
            .upload_growing_file(1, &path, &fired(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.received.lock().unwrap().len(), 20);
        assert!(sink.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn first_failed_part_fails_the_upload() {
        let dir = TempDir::new().unwrap();
        let (path, _) = complete_file(&dir, 10_000);
        let sink = Arc::new(Sink {
            fail_index: Some(2),
            delay: Duration::from_millis(2),
            ..Sink::default()
        });

        let result = StreamUploader::new(sink.clone(), config(500, 2))
            .upload_growing_file(1, &path, &fired(), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::Rpc(_))));
        assert!(sink.received.lock().unwrap().len() < 20);
    }

    #[tokio::test]
    async fn failure_stops_waiting_on_an_unfinished_file() {
        let dir = TempDir::new().unwrap();
        let (path, _) = complete_file(&dir, 3000);
        let sink = Arc::new(Sink {
            fail_index: Some(0),
            ..Sink::default()
        });

        // Never completed: only the failure can end the upload
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            StreamUploader::new(sink, config(1000, 1)).upload_growing_file(
                1,
                &path,
                &CompletionSignal::new(),
                &CancellationToken::new(),
            ),
        )
        .await
        .unwrap();

        assert!(matches!(result, Err(Error::Rpc(_))));
    }

    #[tokio::test]
    async fn cancellation_aborts_upload() {
        let dir = TempDir::new().unwrap();
        let (path, _) = complete_file(&dir, 100);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = StreamUploader::new(Arc::new(Sink::default()), config(1000, 1))
            .upload_growing_file(1, &path, &CompletionSignal::new(), &cancel)
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn parts_rotate_through_pool_and_emit_events() {
        let dir = TempDir::new().unwrap();
        let (path, _) = complete_file(&dir, 3000);
        let sinks: Vec<Arc<Sink>> = (0..3).map(|_| Arc::new(Sink::default())).collect();
        let pool: InvokerPool<UploadPart, ()> = InvokerPool::new();
        for sink in &sinks {
            pool.add(sink.clone());
        }

        let (tx, mut rx) = broadcast::channel(16);
        let summary = StreamUploader::new(Arc::new(pool), config(1000, 1))
            .with_events(tx)
            .upload_growing_file(7, &path, &fired(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.parts, 3);
        for sink in &sinks {
            assert_eq!(sink.received.lock().unwrap().len(), 1);
        }

        let mut uploaded = 0;
        let mut completed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                Event::ChunkUploaded { .. } => uploaded += 1,
                Event::UploadComplete { parts, bytes } => {
                    assert_eq!((parts, bytes), (3, 3000));
                    completed = true;
                }
                _ => {}
            }
        }
        assert_eq!(uploaded, 3);
        assert!(completed);
    }

    #[test]
    fn random_file_ids_are_non_negative() {
        for _ in 0..100 {
            assert!(random_file_id() >= 0);
        }
    }
}
