//! HTTP access to remote objects.
//!
//! Three access patterns are supported:
//!
//! | Method | Request | Used by |
//! |--------|---------|---------|
//! | [`Fetcher::fetch_prefix`] | `Range: bytes=0-(N-1)` | URL resolver |
//! | [`Fetcher::stream_digest`] | full GET, streamed through [`PrefixHasher`] | full-hash resolver |
//! | [`Fetcher::fetch_bytes`] | full GET, buffered | perceptual hash, classification |
//!
//! Transport failures and unexpected statuses become [`ResolveError`]
//! network variants; inconsistent range arithmetic becomes
//! [`ResolveError::Integrity`].

use reqwest::header::{HeaderMap, CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest::{Response, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::config::FetchConfig;
use crate::error::ResolveError;
use crate::hash::{PrefixHasher, StreamDigest};
use crate::mime;

/// Leading bytes of an object plus what the server reported about it.
#[derive(Debug, Clone)]
pub struct PrefixFetch {
    /// At most N bytes from offset zero.
    pub bytes: Vec<u8>,
    /// Total object size in bytes.
    pub size: u64,
    /// `Content-Type` essence as declared by the server.
    pub declared_type: Option<String>,
}

/// Parsed `Content-Range` header (`bytes 0-99/1000`, `bytes */1000`,
/// `bytes 0-99/*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// Inclusive first and last byte positions.
    pub range: Option<(u64, u64)>,
    pub total: Option<u64>,
}

pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let (span, total) = rest.trim_start().split_once('/')?;

    let range = if span == "*" {
        None
    } else {
        let (start, end) = span.split_once('-')?;
        let start: u64 = start.parse().ok()?;
        let end: u64 = end.parse().ok()?;
        if end < start {
            return None;
        }
        Some((start, end))
    };

    let total = if total == "*" {
        None
    } else {
        Some(total.parse().ok()?)
    };

    if range.is_none() && total.is_none() {
        return None;
    }
    Some(ContentRange { range, total })
}

/// Shared HTTP client for all stages that read object bytes.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    /// `timeout_secs` bounds connecting and each read, never the whole
    /// transfer: a full-content stream may run for as long as bytes keep
    /// arriving.
    pub fn new(config: &FetchConfig) -> anyhow::Result<Self> {
        let idle = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(idle)
            .read_timeout(idle)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    /// Fetches bytes `[0, prefix_size)` with a range request.
    ///
    /// Accepts `206` (checked against `Content-Range`) and `200` (server
    /// ignored the range or the object is small; the body is counted to the
    /// end but only the first `prefix_size` bytes are kept). A `416` with
    /// `bytes */0` is reported as an empty object.
    pub async fn fetch_prefix(
        &self,
        url: &str,
        prefix_size: u64,
    ) -> Result<PrefixFetch, ResolveError> {
        let response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes=0-{}", prefix_size.saturating_sub(1)))
            .send()
            .await
            .map_err(|e| ResolveError::network(url, e))?;

        let status = response.status();
        let declared_type = header_value(response.headers(), CONTENT_TYPE).map(|v| mime::essence(&v));
        let content_range = match header_value(response.headers(), CONTENT_RANGE) {
            Some(value) => Some(parse_content_range(&value).ok_or_else(|| {
                ResolveError::integrity(url, format!("unparseable Content-Range '{}'", value))
            })?),
            None => None,
        };
        debug!(url, %status, ?content_range, "prefix response");

        match status {
            StatusCode::PARTIAL_CONTENT => {
                let content_range = content_range.ok_or_else(|| {
                    ResolveError::integrity(url, "206 response without Content-Range")
                })?;
                let (start, end) = content_range.range.ok_or_else(|| {
                    ResolveError::integrity(url, "206 response without a byte range")
                })?;
                if start != 0 {
                    return Err(ResolveError::integrity(
                        url,
                        format!("range starts at {} instead of 0", start),
                    ));
                }
                let (bytes, received) = read_prefix(response, url, prefix_size).await?;
                if received > prefix_size {
                    return Err(ResolveError::integrity(
                        url,
                        format!(
                            "received {} bytes for a {}-byte range request",
                            received, prefix_size
                        ),
                    ));
                }
                if end + 1 != received {
                    return Err(ResolveError::integrity(
                        url,
                        format!(
                            "Content-Range ends at byte {} but {} bytes were received",
                            end, received
                        ),
                    ));
                }
                let size = content_range
                    .total
                    .ok_or_else(|| ResolveError::integrity(url, "Content-Range total is unknown"))?;
                if size < received {
                    return Err(ResolveError::integrity(
                        url,
                        format!("total size {} is below the {} bytes received", size, received),
                    ));
                }
                Ok(PrefixFetch {
                    bytes,
                    size,
                    declared_type,
                })
            }
            StatusCode::OK => {
                let (bytes, size) = read_prefix(response, url, prefix_size).await?;
                Ok(PrefixFetch {
                    bytes,
                    size,
                    declared_type,
                })
            }
            StatusCode::RANGE_NOT_SATISFIABLE
                if content_range.and_then(|r| r.total) == Some(0) =>
            {
                Ok(PrefixFetch {
                    bytes: Vec::new(),
                    size: 0,
                    declared_type,
                })
            }
            other => Err(ResolveError::UnexpectedStatus {
                url: url.to_string(),
                status: other.as_u16(),
            }),
        }
    }

    /// Streams the whole body through a [`PrefixHasher`] without buffering it.
    pub async fn stream_digest(
        &self,
        url: &str,
        prefix_size: u64,
    ) -> Result<StreamDigest, ResolveError> {
        let mut response = self.get_ok(url).await?;
        let mut hasher = PrefixHasher::new(prefix_size);
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ResolveError::network(url, e))?
        {
            hasher.update(&chunk);
        }
        debug!(url, length = hasher.length(), "streamed full body");
        Ok(hasher.finish())
    }

    /// Downloads the whole body into memory.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ResolveError> {
        let response = self.get_ok(url).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ResolveError::network(url, e))?;
        Ok(bytes.to_vec())
    }

    async fn get_ok(&self, url: &str) -> Result<Response, ResolveError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolveError::network(url, e))?;
        if response.status() != StatusCode::OK {
            return Err(ResolveError::UnexpectedStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

fn header_value(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// Reads the body to the end, keeping at most `limit` bytes. Returns the
/// kept bytes and the total number of bytes received.
async fn read_prefix(
    mut response: Response,
    url: &str,
    limit: u64,
) -> Result<(Vec<u8>, u64), ResolveError> {
    let mut kept = Vec::new();
    let mut received: u64 = 0;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ResolveError::network(url, e))?
    {
        let room = limit.saturating_sub(kept.len() as u64).min(chunk.len() as u64) as usize;
        kept.extend_from_slice(&chunk[..room]);
        received += chunk.len() as u64;
    }
    Ok((kept, received))
}
