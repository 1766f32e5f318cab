//! Request handlers

use super::range::{RangeOutcome, resolve_range};
use super::{ServeMode, ServerState};
use crate::error::{Error, Result};
use crate::partition::PartitionedFile;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::io::SeekFrom;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, DuplexStream, ReadBuf};
use tokio_util::io::ReaderStream;
use tokio_util::sync::DropGuard;

/// Pipe capacity between the availability-gated copier and the response body
const GATED_PIPE_CAPACITY: usize = 64 * 1024;

/// `GET`/`HEAD /:name` - serve a registered file, honouring a single byte range
pub(super) async fn serve_file(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response> {
    let file = state
        .lookup(&name)
        .await
        .ok_or_else(|| Error::NotFound(name.clone()))?;
    let total = file
        .total_size()
        .ok_or_else(|| Error::ServerError(format!("{name} has no declared size")))?;

    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    let outcome = resolve_range(range_header, total);
    let Some((start, len)) = outcome.span(total) else {
        tracing::debug!(name = %name, range = ?range_header, total, "Unsatisfiable range");
        return Ok(range_not_satisfiable(total));
    };

    tracing::debug!(name = %name, %method, start, len, mode = ?state.mode, "Serving file");

    let status = match outcome {
        RangeOutcome::Partial { .. } => StatusCode::PARTIAL_CONTENT,
        _ => StatusCode::OK,
    };
    let mut response = Response::builder()
        .status(status)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, len);
    if let RangeOutcome::Partial { start, end } = outcome {
        response = response.header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{total}"));
    }

    let body = if method == Method::HEAD || len == 0 {
        Body::empty()
    } else {
        match state.mode {
            ServeMode::Direct => direct_body(&file, start, len).await?,
            ServeMode::AvailabilityGated => gated_body(&state, file, start, len),
        }
    };

    response
        .body(body)
        .map_err(|e| Error::ServerError(e.to_string()))
}

/// Read the span straight from disk, whether or not it is downloaded yet
async fn direct_body(file: &PartitionedFile, start: u64, len: u64) -> Result<Body> {
    let mut handle = tokio::fs::File::open(file.path()).await?;
    handle.seek(SeekFrom::Start(start)).await?;
    Ok(Body::from_stream(ReaderStream::new(handle.take(len))))
}

/// Read half of the gated pipe; dropping it stops the copier
struct GatedReader {
    pipe: DuplexStream,
    _stop_copier: DropGuard,
}

impl AsyncRead for GatedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.pipe).poll_read(cx, buf)
    }
}

/// Stream the span as its parts become available
///
/// The copier runs until the span is sent, the server shuts down or the
/// response body is dropped by a disconnecting client.
fn gated_body(state: &ServerState, file: Arc<PartitionedFile>, start: u64, len: u64) -> Body {
    let (mut writer, pipe) = tokio::io::duplex(GATED_PIPE_CAPACITY);
    let cancel = state.shutdown.child_token();
    let reader = GatedReader {
        pipe,
        _stop_copier: cancel.clone().drop_guard(),
    };
    let poll_interval = state.poll_interval;

    tokio::spawn(async move {
        match file
            .stream_range(start, len, &mut writer, &cancel, poll_interval)
            .await
        {
            Ok(sent) => tracing::debug!(start, sent, "Gated response complete"),
            Err(e) => tracing::debug!(start, error = %e, "Gated response ended early"),
        }
    });

    Body::from_stream(ReaderStream::new(reader))
}

fn range_not_satisfiable(total: u64) -> Response {
    (
        StatusCode::RANGE_NOT_SATISFIABLE,
        [
            (header::CONTENT_RANGE, format!("bytes */{total}")),
            (header::ACCEPT_RANGES, "bytes".to_string()),
        ],
    )
        .into_response()
}
