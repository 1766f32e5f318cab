//! Partitioned files -- pre-sized files split into independently available parts.
//!
//! A [`PartitionedFile`] moves through a fixed lifecycle: created with a path,
//! sized once the exact length is known, allocated on disk, then split into
//! contiguous [`Part`]s. Parts are never resized or recreated; the only state
//! that changes afterwards is each part's availability flag, which flips from
//! false to true exactly once.

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::{Error, Result};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// A contiguous byte range of a partitioned file
#[derive(Debug)]
pub struct Part {
    offset: u64,
    size: u64,
    file_path: Arc<Path>,
    available: AtomicBool,
}

impl Part {
    /// First byte of the part
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of bytes in the part
    pub fn size(&self) -> u64 {
        self.size
    }

    /// One past the last byte of the part
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Path of the file this part belongs to
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Mark the part's bytes as written. Never reverts.
    pub fn set_available(&self) {
        self.available.store(true, Ordering::Release);
    }

    /// Whether the part's bytes have been written
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }
}

/// A file on disk plus its partitioning into [`Part`]s
#[derive(Debug)]
pub struct PartitionedFile {
    path: PathBuf,
    total_size: Option<u64>,
    chunk_size: Option<u64>,
    allocated: bool,
    parts: Vec<Arc<Part>>,
}

impl PartitionedFile {
    /// Create an unsized, unallocated file description
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            total_size: None,
            chunk_size: None,
            allocated: false,
            parts: Vec::new(),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Exact size, once resolved
    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    /// Effective chunk size used by [`split`](Self::split), once split
    pub fn chunk_size(&self) -> Option<u64> {
        self.chunk_size
    }

    /// Whether [`allocate`](Self::allocate) has succeeded
    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    /// Parts in ascending offset order
    pub fn parts(&self) -> &[Arc<Part>] {
        &self.parts
    }

    /// Record the resolved size. Rejected once storage is allocated.
    pub fn set_total_size(&mut self, size: u64) -> Result<()> {
        if self.allocated {
            return Err(Error::Partition(format!(
                "cannot resize {} after allocation",
                self.path.display()
            )));
        }
        self.total_size = Some(size);
        Ok(())
    }

    /// Create the file and set its length to exactly the resolved size
    ///
    /// Must run once, after [`set_total_size`](Self::set_total_size) and before
    /// any part is written.
    pub async fn allocate(&mut self) -> Result<()> {
        if self.allocated {
            return Err(Error::allocation(&self.path, "already allocated"));
        }
        let size = self
            .total_size
            .ok_or_else(|| Error::allocation(&self.path, "size not resolved"))?;

        let file = tokio::fs::File::create(&self.path)
            .await
            .map_err(|e| Error::allocation(&self.path, format!("create file: {e}")))?;
        file.set_len(size)
            .await
            .map_err(|e| Error::allocation(&self.path, format!("truncate file: {e}")))?;

        self.allocated = true;
        tracing::debug!(path = %self.path.display(), size, "Allocated file");
        Ok(())
    }

    /// Divide the file into parts of `chunk_size_hint` bytes
    ///
    /// Requires [`allocate`](Self::allocate) to have succeeded. A hint ≤ 0
    /// selects [`DEFAULT_CHUNK_SIZE`]. The final part holds the remainder, or a
    /// full chunk when the size divides evenly. Calling again with the same
    /// effective chunk size returns the existing parts; a different chunk size
    /// is an error.
    pub fn split(&mut self, chunk_size_hint: i64) -> Result<&[Arc<Part>]> {
        let chunk_size = if chunk_size_hint <= 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size_hint as u64
        };
        let total_size = self
            .total_size
            .ok_or_else(|| Error::Partition("cannot split before size is resolved".to_string()))?;
        if !self.allocated {
            return Err(Error::Partition(format!(
                "cannot split {} before allocation",
                self.path.display()
            )));
        }

        match self.chunk_size {
            Some(existing) if existing == chunk_size => return Ok(&self.parts),
            Some(existing) => {
                return Err(Error::Partition(format!(
                    "already split with chunk size {existing}, refusing {chunk_size}"
                )));
            }
            None => {}
        }

        let file_path: Arc<Path> = Arc::from(self.path.as_path());
        let mut parts = Vec::with_capacity(total_size.div_ceil(chunk_size) as usize);
        let mut offset = 0;
        while offset < total_size {
            let size = chunk_size.min(total_size - offset);
            parts.push(Arc::new(Part {
                offset,
                size,
                file_path: Arc::clone(&file_path),
                available: AtomicBool::new(false),
            }));
            offset += size;
        }

        self.parts = parts;
        self.chunk_size = Some(chunk_size);
        Ok(&self.parts)
    }

    /// The part starting exactly at `offset`
    pub fn part_at(&self, offset: u64) -> Option<&Arc<Part>> {
        self.parts
            .binary_search_by_key(&offset, |p| p.offset)
            .ok()
            .map(|idx| &self.parts[idx])
    }

    /// The part whose range contains `offset`
    pub fn part_containing(&self, offset: u64) -> Option<&Arc<Part>> {
        let idx = self.parts.partition_point(|p| p.end() <= offset);
        self.parts.get(idx)
    }

    /// Total bytes covered by available parts
    pub fn available_bytes(&self) -> u64 {
        self.parts
            .iter()
            .filter(|p| p.is_available())
            .map(|p| p.size)
            .sum()
    }

    /// Whether the file is allocated and every part is available
    pub fn is_complete(&self) -> bool {
        self.allocated && self.parts.iter().all(|p| p.is_available())
    }

    /// End of the contiguous run of available parts that covers `from`
    ///
    /// Returns `from` itself when the part containing it is not available yet.
    pub fn available_until(&self, from: u64) -> u64 {
        let start = self.parts.partition_point(|p| p.end() <= from);
        let mut until = from;
        for part in &self.parts[start..] {
            if !part.is_available() {
                break;
            }
            until = part.end();
        }
        until
    }

    /// Copy everything from `skip` to the end of the file into `writer`,
    /// waiting for parts to become available
    pub async fn stream_at<W>(
        &self,
        skip: u64,
        writer: &mut W,
        cancel: &CancellationToken,
        poll_interval: Duration,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let len = self.total_size.unwrap_or(0).saturating_sub(skip);
        self.stream_range(skip, len, writer, cancel, poll_interval)
            .await
    }

    /// Copy `len` bytes starting at `start` into `writer`, forwarding only
    /// bytes covered by available parts
    ///
    /// Polls part availability every `poll_interval` and writes the longest
    /// available run each time, until the range is delivered or `cancel`
    /// fires. The range is clamped to the file size. Returns bytes written.
    pub async fn stream_range<W>(
        &self,
        start: u64,
        len: u64,
        writer: &mut W,
        cancel: &CancellationToken,
        poll_interval: Duration,
    ) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let end = start.saturating_add(len).min(self.total_size.unwrap_or(0));
        if start >= end {
            return Ok(0);
        }

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;

        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut cursor = start;
        while cursor < end {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let ready = self.available_until(cursor).min(end);
            if ready > cursor {
                let want = ready - cursor;
                let copied = tokio::io::copy(&mut (&mut file).take(want), writer).await?;
                if copied < want {
                    return Err(Error::TransientIo(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("file ended at {} before declared size", cursor + copied),
                    )));
                }
                cursor += copied;
                continue;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = ticker.tick() => {}
            }
        }

        writer.flush().await?;
        Ok(cursor - start)
    }
}
