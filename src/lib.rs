//! # tentacle
//!
//! Chunked transfer and streaming pipeline engine.
//!
//! tentacle moves large media objects between a remote HTTP source, local
//! disk, a local HTTP consumer and a remote RPC sink:
//!
//! - [`ChunkDownloadEngine`] probes an object's size, preallocates a
//!   [`PartitionedFile`] and fetches its parts in parallel with per-part retry
//! - [`PartialContentServer`] serves a file by name with byte-range support,
//!   while it is still downloading
//! - [`GrowingFileStreamer`] reads a file another process is still appending
//!   to, in fixed-size chunks, until a [`CompletionSignal`] fires
//! - [`InvokerPool`] spreads RPC calls across several clients in strict
//!   rotation; [`StreamUploader`] combines it with the streamer
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tentacle::{
//!     ChunkDownloadEngine, Config, HttpRangeSource, PartialContentServer, SourceDescriptor,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let client = tentacle::utils::build_http_client(&config.http)?;
//!     let engine = ChunkDownloadEngine::new(config.clone());
//!     let cancel = CancellationToken::new();
//!
//!     let source = SourceDescriptor::new("https://cdn.example.com/video.mp4")
//!         .with_header("Referer", "https://example.com/");
//!     let source = Arc::new(HttpRangeSource::new(client, &source)?);
//!
//!     // Prepare first so the server can expose the file during the download
//!     let file = Arc::new(engine.prepare(&*source, "video.mp4", &cancel).await?);
//!     let server = PartialContentServer::new(config.server.clone());
//!     server.register("video.mp4", Arc::clone(&file)).await?;
//!
//!     let listener = server.bind().await?;
//!     tokio::spawn({
//!         let cancel = cancel.clone();
//!         async move { server.serve(listener, cancel).await }
//!     });
//!
//!     engine.download_parts(source, &file, &cancel).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Chunked range downloads
pub mod download;
/// Error types
pub mod error;
/// Partitioned files with per-part availability
pub mod partition;
/// Round-robin RPC invoker pool
pub mod pool;
/// Retry logic with configurable backoff
pub mod retry;
/// Partial-content HTTP server
pub mod server;
/// Growing-file chunk streaming
pub mod streamer;
/// Core types and events
pub mod types;
/// Streamed uploads through an invoker
pub mod upload;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{
    Config, DownloadConfig, HttpConfig, RetryConfig, ServeMode, ServerConfig, StreamConfig,
};
pub use download::{ChunkDownloadEngine, HttpRangeSource, RangeSource};
pub use error::{ApiError, Error, ErrorDetail, Result, ToHttpStatus};
pub use partition::{Part, PartitionedFile};
pub use pool::{Invoker, InvokerPool, SharedInvoker};
pub use server::PartialContentServer;
pub use streamer::{CompletionSignal, GrowingFileStreamer, stream_file};
pub use types::{Event, SourceDescriptor, StreamChunk};
pub use upload::{StreamUploader, UploadPart, UploadSummary};
