//! Core types and events

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A remote object to fetch, as produced by an external metadata resolver
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Direct URL of the object
    pub url: String,

    /// Headers that must accompany every request for this URL
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Size advertised by the resolver; informational only, the probe decides
    #[serde(default)]
    pub approx_size: Option<u64>,

    /// Preferred part size in bytes (absent or ≤ 0 means the 1 MiB default)
    #[serde(default)]
    pub chunk_size_hint: Option<i64>,
}

impl SourceDescriptor {
    /// Create a descriptor for a bare URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Add a request header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the preferred part size
    pub fn with_chunk_size_hint(mut self, hint: i64) -> Self {
        self.chunk_size_hint = Some(hint);
        self
    }

    /// Parse a descriptor from JSON and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let source: SourceDescriptor = serde_json::from_str(json)?;
        source.validate()?;
        Ok(source)
    }

    /// Check that the URL is absolute http(s) and all headers are well formed
    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| Error::InvalidSource(format!("bad url {:?}: {}", self.url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidSource(format!(
                "unsupported scheme {:?}",
                parsed.scheme()
            )));
        }
        for (name, value) in &self.headers {
            reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::InvalidSource(format!("bad header name {name:?}: {e}")))?;
            reqwest::header::HeaderValue::from_str(value)
                .map_err(|e| Error::InvalidSource(format!("bad value for header {name:?}: {e}")))?;
        }
        Ok(())
    }

    /// The chunk-size hint as the raw value accepted by `PartitionedFile::split`
    pub fn chunk_size_hint(&self) -> i64 {
        self.chunk_size_hint.unwrap_or(0)
    }
}

/// A unit read from a growing file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamChunk {
    /// Byte offset of `data` in the file
    pub offset: u64,
    /// 0-based position in the stream
    pub index: u64,
    /// Chunk contents; only the final chunk may be shorter than the chunk size
    pub data: Vec<u8>,
    /// True only on the final chunk
    pub last: bool,
}

impl StreamChunk {
    /// A zero-length chunk carries nothing to forward
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Progress events emitted by the download engine and the uploader
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A part was written and marked available
    PartDownloaded {
        /// Part offset
        offset: u64,
        /// Declared part size
        expected_size: u64,
        /// Bytes the response body actually yielded
        actual_size: u64,
        /// Wall time of the successful attempt in milliseconds
        duration_ms: u64,
    },

    /// A part attempt failed and will be retried
    PartRetrying {
        /// Part offset
        offset: u64,
        /// Attempt that just failed (1-based)
        attempt: u32,
        /// Failure description
        error: String,
    },

    /// Every part of a file is available
    DownloadComplete {
        /// Final file size
        total_size: u64,
        /// Number of parts downloaded
        parts: usize,
    },

    /// An upload part was accepted by the sink
    ChunkUploaded {
        /// Part index
        index: u64,
        /// Bytes in this part
        size: u64,
        /// Whether this was the final part
        last: bool,
    },

    /// The streamed upload finished
    UploadComplete {
        /// Number of parts sent
        parts: u64,
        /// Total bytes sent
        bytes: u64,
    },
}
