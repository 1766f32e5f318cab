//! Chunked range downloads -- size probe, allocation, and a bounded worker pool
//! that fetches every part with retry.
//!
//! Split into focused submodules:
//! - [`source`] - The [`RangeSource`] seam and its HTTP implementation
//! - [`engine`] - [`ChunkDownloadEngine`] lifecycle and part workers

mod engine;
mod source;


pub use engine::ChunkDownloadEngine;
pub use source::{HttpRangeSource, RangeSource};
