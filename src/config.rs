//! Configuration types for tentacle

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

/// Default part size used when a source gives no usable chunk-size hint (1 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Default number of parallel part workers
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default upload part size (512 KiB, the largest part most RPC sinks accept)
pub const DEFAULT_UPLOAD_CHUNK_SIZE: u64 = 512 * 1024;

/// Main configuration for tentacle
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Chunked download behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// Per-part retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Growing-file streaming and upload behavior
    #[serde(default)]
    pub stream: StreamConfig,

    /// Partial-content server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Outbound HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,
}

impl Config {
    /// Parse a configuration from JSON, filling missing fields with defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or divide by zero
    pub fn validate(&self) -> Result<()> {
        if self.download.concurrency == 0 {
            return Err(config_error("concurrency must be at least 1", "download.concurrency"));
        }
        if self.retry.max_attempts == 0 {
            return Err(config_error("max_attempts must be at least 1", "retry.max_attempts"));
        }
        if self.stream.chunk_size == 0 {
            return Err(config_error("chunk_size must be positive", "stream.chunk_size"));
        }
        if self.stream.upload_concurrency == 0 {
            return Err(config_error(
                "upload_concurrency must be at least 1",
                "stream.upload_concurrency",
            ));
        }
        if self.stream.poll_interval.is_zero() {
            return Err(config_error("poll_interval must be non-zero", "stream.poll_interval"));
        }
        if self.server.poll_interval.is_zero() {
            return Err(config_error("poll_interval must be non-zero", "server.poll_interval"));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

/// Chunked download configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Number of parallel part workers (default: 4)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Upper bound for a single part fetch attempt (default: 5 seconds)
    ///
    /// A timed-out attempt counts as a transient failure and is retried.
    #[serde(default = "default_part_timeout", with = "optional_duration_serde")]
    pub part_timeout: Option<Duration>,

    /// Refuse to allocate when the target filesystem reports less free space
    /// than the resolved size (default: true)
    #[serde(default = "default_true")]
    pub check_disk_space: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            part_timeout: default_part_timeout(),
            check_disk_space: true,
        }
    }
}

/// Retry behavior for part fetches
///
/// The defaults are a constant one-second backoff with at most ten attempts
/// per part. `backoff_multiplier` above 1.0 turns it into exponential backoff.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one (default: 10)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each retry (default: 1.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_initial_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Growing-file streaming configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Size of every non-final chunk, dictated by the upload sink (default: 512 KiB)
    #[serde(default = "default_upload_chunk_size")]
    pub chunk_size: u64,

    /// How often the file size is re-checked while waiting for data (default: 10ms)
    #[serde(default = "default_stream_poll", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Upload parts allowed in flight at once (default: 4)
    #[serde(default = "default_concurrency")]
    pub upload_concurrency: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_upload_chunk_size(),
            poll_interval: default_stream_poll(),
            upload_concurrency: default_concurrency(),
        }
    }
}

/// How the partial-content server treats byte ranges that are not downloaded yet
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServeMode {
    /// Serve whatever is on disk, ignoring part availability (default)
    ///
    /// A reader that overtakes the download sees zero-filled bytes.
    #[default]
    Direct,
    /// Hold each response until the parts it covers are available
    AvailabilityGated,
}

/// Partial-content server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind (default: 127.0.0.1:8080)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Availability handling for served ranges
    #[serde(default)]
    pub mode: ServeMode,

    /// Availability poll interval in gated mode (default: 1ms)
    #[serde(default = "default_server_poll", with = "duration_serde")]
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            mode: ServeMode::default(),
            poll_interval: default_server_poll(),
        }
    }
}

/// Outbound HTTP client configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Proxy URL for all outbound requests (None = direct)
    #[serde(default)]
    pub proxy: Option<String>,

    /// User-Agent header (None = reqwest default)
    #[serde(default)]
    pub user_agent: Option<String>,

    /// TCP connect timeout (None = no limit)
    #[serde(default, with = "optional_duration_serde")]
    pub connect_timeout: Option<Duration>,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_part_timeout() -> Option<Duration> {
    Some(Duration::from_secs(5))
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_upload_chunk_size() -> u64 {
    DEFAULT_UPLOAD_CHUNK_SIZE
}

fn default_stream_poll() -> Duration {
    Duration::from_millis(10)
}

fn default_server_poll() -> Duration {
    Duration::from_millis(1)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

// Durations are stored as integer milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
