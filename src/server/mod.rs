//! Partial-content HTTP server
//!
//! Serves [`PartitionedFile`]s by name with single byte-range support, so a
//! media player can seek inside a file while it is still being downloaded.
//!
//! # Routes
//!
//! - `GET /:name` - file contents; `206` with `Content-Range` for a range,
//!   `200` otherwise, `416` when the range starts past the end
//! - `HEAD /:name` - same headers, no body
//!
//! Unknown names answer `404` with a JSON error body.

use crate::config::{ServeMode, ServerConfig};
use crate::error::{Error, Result};
use crate::partition::PartitionedFile;
use axum::{Router, routing::get};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub mod error_response;
mod handlers;
pub mod range;

pub use range::{RangeOutcome, resolve_range};

/// State shared by all request handlers
///
/// Cloned for each request (cheap Arc clones).
#[derive(Clone)]
pub(crate) struct ServerState {
    files: Arc<RwLock<HashMap<String, Arc<PartitionedFile>>>>,
    mode: ServeMode,
    poll_interval: Duration,
    /// Ends gated responses still waiting on data when the server stops
    shutdown: CancellationToken,
}

impl ServerState {
    async fn lookup(&self, name: &str) -> Option<Arc<PartitionedFile>> {
        self.files.read().await.get(name).cloned()
    }
}

/// HTTP server exposing partitioned files with range support
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tentacle::{PartialContentServer, PartitionedFile};
/// use tentacle::config::ServerConfig;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(file: Arc<PartitionedFile>) -> tentacle::Result<()> {
/// let server = PartialContentServer::new(ServerConfig::default());
/// server.register("video.mp4", file).await?;
///
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
/// server.serve(listener, CancellationToken::new()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PartialContentServer {
    config: ServerConfig,
    state: ServerState,
}

impl PartialContentServer {
    /// Create a server with no registered files
    pub fn new(config: ServerConfig) -> Self {
        let state = ServerState {
            files: Arc::new(RwLock::new(HashMap::new())),
            mode: config.mode,
            poll_interval: config.poll_interval,
            shutdown: CancellationToken::new(),
        };
        Self { config, state }
    }

    /// Configuration in use
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Expose `file` under `/{name}`, replacing any file registered under that name
    ///
    /// The file must already know its size.
    pub async fn register(&self, name: impl Into<String>, file: Arc<PartitionedFile>) -> Result<()> {
        let name = name.into();
        if name.is_empty() || name.contains('/') {
            return Err(Error::Config {
                message: format!("invalid file name {name:?}"),
                key: None,
            });
        }
        if file.total_size().is_none() {
            return Err(Error::Partition(format!(
                "cannot serve {} before its size is known",
                file.path().display()
            )));
        }

        tracing::info!(name = %name, path = %file.path().display(), "Registered file for serving");
        self.state.files.write().await.insert(name, file);
        Ok(())
    }

    /// Stop serving `name`; responses already in progress are not interrupted
    pub async fn unregister(&self, name: &str) -> Option<Arc<PartitionedFile>> {
        self.state.files.write().await.remove(name)
    }

    /// Names currently served
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.files.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the router with all routes and the tracing layer
    pub fn router(&self) -> Router {
        Router::new()
            .route("/:name", get(handlers::serve_file))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve requests on `listener` until `cancel` fires
    ///
    /// On cancellation the server stops accepting connections, ends gated
    /// responses that are still waiting for data, and waits for in-flight
    /// requests to finish.
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        let address = listener
            .local_addr()
            .map_err(|e| Error::ServerError(e.to_string()))?;
        tracing::info!(address = %address, mode = ?self.config.mode, "Partial-content server listening");

        let shutdown = self.state.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                shutdown.cancel();
            })
            .await
            .map_err(|e| Error::ServerError(e.to_string()))?;

        tracing::info!(address = %address, "Partial-content server stopped");
        Ok(())
    }

    /// Bind the configured address and serve until SIGINT or SIGTERM
    pub async fn serve_until_signal(&self) -> Result<()> {
        let listener = self.bind().await?;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            trigger.cancel();
        });
        self.serve(listener, cancel).await
    }

    /// Bind a listener on the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let address: SocketAddr = self.config.bind_address;
        TcpListener::bind(address).await.map_err(|e| {
            Error::ServerError(format!("failed to bind {address}: {e}"))
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
