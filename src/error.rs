//! Error types for tentacle
//!
//! Every failure surfaced to a caller carries enough context (path, offset,
//! size, attempt count, underlying cause) to be diagnosed without re-running
//! the transfer.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for tentacle operations
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum number of response body bytes captured into [`Error::BadStatus`]
pub const ERROR_BODY_LIMIT: usize = 1024;

/// Main error type for tentacle
#[derive(Debug, Error)]
pub enum Error {
    /// Creating or sizing the backing file failed
    #[error("failed to allocate {path}: {reason}")]
    Allocation {
        /// Path of the file being allocated
        path: PathBuf,
        /// What went wrong (OS error text or lifecycle violation)
        reason: String,
    },

    /// The file partitioning was requested in an invalid state
    #[error("partition error: {0}")]
    Partition(String),

    /// The remote answered with a non-2xx status
    #[error("bad status: {status}: {body:?}")]
    BadStatus {
        /// HTTP status code
        status: u16,
        /// First bytes of the response body, lossily decoded
        body: String,
    },

    /// The size probe response did not declare a content length
    #[error("size probe response has no content length")]
    MissingContentLength,

    /// Local or network I/O failed while fetching or writing a part
    #[error("I/O error: {0}")]
    TransientIo(#[from] std::io::Error),

    /// HTTP transport error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// A part attempt did not finish within the configured timeout
    #[error("part attempt timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured per-attempt timeout in milliseconds
        timeout_ms: u64,
    },

    /// A part kept failing until the retry budget was spent
    #[error("part at offset {offset} (size {size}) failed after {attempts} attempts: {source}")]
    RetryExhausted {
        /// Offset of the failing part
        offset: u64,
        /// Declared size of the failing part
        size: u64,
        /// Number of attempts made
        attempts: u32,
        /// Last failure observed
        #[source]
        source: Box<Error>,
    },

    /// The invoker pool has no members
    #[error("no clients")]
    NoClients,

    /// An RPC client reported a failure
    #[error("rpc error: {0}")]
    Rpc(String),

    /// The surrounding operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Not enough free space to allocate the target file
    #[error("insufficient disk space: need {required} bytes, have {available} bytes")]
    InsufficientSpace {
        /// Number of bytes required for the file
        required: u64,
        /// Number of bytes currently available on disk
        available: u64,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download.concurrency")
        key: Option<String>,
    },

    /// The source descriptor cannot be used for fetching
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// Requested resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Partial-content server error
    #[error("server error: {0}")]
    ServerError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Build a [`Error::BadStatus`] from a status and a raw body prefix
    pub(crate) fn bad_status(status: u16, body: &[u8]) -> Self {
        let end = body.len().min(ERROR_BODY_LIMIT);
        Error::BadStatus {
            status,
            body: String::from_utf8_lossy(&body[..end]).into_owned(),
        }
    }

    /// Build an [`Error::Allocation`] for `path`
    pub(crate) fn allocation(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Error::Allocation {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Trait for converting errors to HTTP status codes
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } | Error::InvalidSource(_) => 400,
            Error::NotFound(_) => 404,
            Error::Partition(_) => 409,
            Error::InsufficientSpace { .. } => 507,
            Error::BadStatus { .. }
            | Error::MissingContentLength
            | Error::Network(_)
            | Error::RetryExhausted { .. }
            | Error::Rpc(_) => 502,
            Error::Timeout { .. } => 504,
            Error::NoClients => 503,
            // client went away; 499 is the conventional "client closed request"
            Error::Cancelled => 499,
            Error::Allocation { .. }
            | Error::TransientIo(_)
            | Error::ServerError(_)
            | Error::Serialization(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Allocation { .. } => "allocation_failed",
            Error::Partition(_) => "partition_error",
            Error::BadStatus { .. } => "bad_status",
            Error::MissingContentLength => "missing_content_length",
            Error::TransientIo(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Timeout { .. } => "timeout",
            Error::RetryExhausted { .. } => "retry_exhausted",
            Error::NoClients => "no_clients",
            Error::Rpc(_) => "rpc_error",
            Error::Cancelled => "cancelled",
            Error::InsufficientSpace { .. } => "insufficient_space",
            Error::Config { .. } => "config_error",
            Error::InvalidSource(_) => "invalid_source",
            Error::NotFound(_) => "not_found",
            Error::ServerError(_) => "server_error",
            Error::Serialization(_) => "serialization_error",
        }
    }
}

/// JSON error body returned by the partial-content server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for server responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let details = match &error {
            Error::RetryExhausted {
                offset,
                size,
                attempts,
                ..
            } => Some(serde_json::json!({
                "offset": offset,
                "size": size,
                "attempts": attempts,
            })),
            Error::BadStatus { status, .. } => Some(serde_json::json!({
                "upstream_status": status,
            })),
            Error::InsufficientSpace {
                required,
                available,
            } => Some(serde_json::json!({
                "required_bytes": required,
                "available_bytes": available,
            })),
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            _ => None,
        };

        Self {
            error: ErrorDetail {
                code: error.error_code().to_string(),
                message: error.to_string(),
                details,
            },
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_status_truncates_body() {
        let body = vec![b'x'; ERROR_BODY_LIMIT * 3];
        match Error::bad_status(503, &body) {
            Error::BadStatus { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body.len(), ERROR_BODY_LIMIT);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn bad_status_message_contains_status_and_body() {
        let err = Error::bad_status(403, b"forbidden");
        let msg = err.to_string();
        assert!(msg.contains("403"), "message was {msg}");
        assert!(msg.contains("forbidden"), "message was {msg}");
    }

    #[test]
    fn retry_exhausted_keeps_context_and_source() {
        let err = Error::RetryExhausted {
            offset: 4096,
            size: 1024,
            attempts: 10,
            source: Box::new(Error::bad_status(500, b"boom")),
        };
        let msg = err.to_string();
        assert!(msg.contains("offset 4096"));
        assert!(msg.contains("size 1024"));
        assert!(msg.contains("10 attempts"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn status_codes_for_client_facing_errors() {
        let cases: Vec<(Error, u16, &str)> = vec![
            (Error::NotFound("video.mp4".into()), 404, "not_found"),
            (
                Error::Config {
                    message: "zero".into(),
                    key: Some("download.concurrency".into()),
                },
                400,
                "config_error",
            ),
            (Error::NoClients, 503, "no_clients"),
            (Error::Cancelled, 499, "cancelled"),
            (Error::Timeout { timeout_ms: 5000 }, 504, "timeout"),
            (
                Error::allocation("/tmp/x", "permission denied"),
                500,
                "allocation_failed",
            ),
            (
                Error::InsufficientSpace {
                    required: 10,
                    available: 1,
                },
                507,
                "insufficient_space",
            ),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status_code(), status, "status for {err}");
            assert_eq!(err.error_code(), code, "code for {err}");
        }
    }

    #[test]
    fn api_error_carries_code_and_details() {
        let api: ApiError = Error::RetryExhausted {
            offset: 0,
            size: 10,
            attempts: 10,
            source: Box::new(Error::Cancelled),
        }
        .into();
        assert_eq!(api.error.code, "retry_exhausted");
        let details = api.error.details.unwrap();
        assert_eq!(details["attempts"], 10);

        let api: ApiError = Error::NotFound("a.mp4".into()).into();
        assert!(api.error.details.is_none());
        let json = serde_json::to_value(&api).unwrap();
        assert!(json["error"].get("details").is_none());
    }
}
