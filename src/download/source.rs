//! Range sources -- where part bytes come from.

use crate::error::{ERROR_BODY_LIMIT, Error, Result};
use crate::types::SourceDescriptor;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue, RANGE};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Abstraction over ranged fetching, enabling testability.
#[async_trait::async_trait]
pub trait RangeSource: Send + Sync {
    /// Resolve the exact object size. Not retried by the engine.
    async fn probe_size(&self) -> Result<u64>;

    /// Fetch `size` bytes at `offset` and write the response body into `sink`
    ///
    /// `total_size` is the probed object size, so implementations can skip
    /// range semantics when one part covers everything. Returns the number of
    /// bytes written, which may differ from `size`.
    async fn fetch_range(
        &self,
        offset: u64,
        size: u64,
        total_size: u64,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64>;

    /// Preferred part size; ≤ 0 selects the default
    fn chunk_size_hint(&self) -> i64 {
        0
    }
}

/// Production [`RangeSource`] that issues HTTP HEAD and ranged GET requests.
pub struct HttpRangeSource {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    chunk_size_hint: i64,
}

impl HttpRangeSource {
    /// Validate `source` and prepare its request headers
    pub fn new(client: reqwest::Client, source: &SourceDescriptor) -> Result<Self> {
        source.validate()?;

        let mut headers = HeaderMap::with_capacity(source.headers.len());
        for (name, value) in &source.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::InvalidSource(format!("bad header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::InvalidSource(format!("bad header value: {e}")))?;
            headers.insert(name, value);
        }

        Ok(Self {
            client,
            url: source.url.clone(),
            headers,
            chunk_size_hint: source.chunk_size_hint(),
        })
    }

    /// Turn a non-2xx response into [`Error::BadStatus`] with a body excerpt
    ///
    /// Reads no further than [`ERROR_BODY_LIMIT`] bytes of the body.
    async fn check_status(mut response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let mut body = Vec::with_capacity(ERROR_BODY_LIMIT);
        while body.len() < ERROR_BODY_LIMIT {
            match response.chunk().await {
                Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                _ => break,
            }
        }
        body.truncate(ERROR_BODY_LIMIT);
        Err(Error::bad_status(status.as_u16(), &body))
    }
}

/// `Range` header value for a part, or `None` when the part is the whole object
pub(crate) fn range_header(offset: u64, size: u64, total_size: u64) -> Option<String> {
    if offset == 0 && size >= total_size {
        return None;
    }
    Some(format!("bytes={}-{}", offset, offset + size - 1))
}

#[async_trait::async_trait]
impl RangeSource for HttpRangeSource {
    async fn probe_size(&self) -> Result<u64> {
        let response = self
            .client
            .head(&self.url)
            .headers(self.headers.clone())
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        // reqwest reports a zero body length for HEAD, so read the header itself
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or(Error::MissingContentLength)
    }

    async fn fetch_range(
        &self,
        offset: u64,
        size: u64,
        total_size: u64,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        let mut request = self.client.get(&self.url).headers(self.headers.clone());
        if let Some(range) = range_header(offset, size, total_size) {
            request = request.header(RANGE, range);
        }

        let mut response = Self::check_status(request.send().await?).await?;

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        sink.flush().await?;
        Ok(written)
    }

    fn chunk_size_hint(&self) -> i64 {
        self.chunk_size_hint
    }
}
