//! HTTP range fetching used by the buffer pool.
//!
//! The pool talks to the network through [`RangeFetcher`] so loads can be driven
//! by an in-memory source in tests. [`HttpRangeFetcher`] is the `ureq` implementation.

use std::io::{self, Read};
use std::time::{Duration, Instant};

use crate::error::{PlayerError, Result};

/// What a HEAD probe reported about a resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceInfo {
    /// `Content-Length`, when present and parseable.
    pub content_length: Option<u64>,
    /// `Accept-Ranges`: `Some(false)` when the server said `none`.
    pub accepts_ranges: Option<bool>,
}

/// Inclusive byte range, as sent in a `Range: bytes=start-end` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Split `[0, total_len)` into contiguous ranges of `chunk_size` bytes.
///
/// The last range is truncated to the remainder. Returns no ranges for an empty resource.
pub fn plan_chunks(total_len: u64, chunk_size: u64) -> Vec<ByteRange> {
    let chunk_size = chunk_size.max(1);
    let mut ranges = Vec::with_capacity(total_len.div_ceil(chunk_size) as usize);
    let mut start = 0u64;
    while start < total_len {
        let end = start.saturating_add(chunk_size).min(total_len) - 1;
        ranges.push(ByteRange { start, end });
        start = end + 1;
    }
    ranges
}

/// Network seam used by the buffer pool.
pub trait RangeFetcher: Send + Sync {
    /// Probe the resource without downloading its body.
    fn head(&self, url: &str) -> Result<ResourceInfo>;

    /// Fetch exactly the bytes of `range`.
    fn get_range(&self, url: &str, range: ByteRange) -> Result<Vec<u8>>;
}

/// `ureq`-backed fetcher with a per-request timeout.
pub struct HttpRangeFetcher {
    agent: ureq::Agent,
}

impl HttpRangeFetcher {
    /// Create a fetcher whose HEAD and range requests are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl RangeFetcher for HttpRangeFetcher {
    fn head(&self, url: &str) -> Result<ResourceInfo> {
        let resp = self.agent.head(url).call().map_err(map_ureq_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PlayerError::Http {
                status: status.as_u16(),
            });
        }
        let content_length = resp
            .headers()
            .get("Content-Length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        let accepts_ranges = resp
            .headers()
            .get("Accept-Ranges")
            .and_then(|v| v.to_str().ok())
            .map(|s| !s.trim().eq_ignore_ascii_case("none"));
        Ok(ResourceInfo {
            content_length,
            accepts_ranges,
        })
    }

    fn get_range(&self, url: &str, range: ByteRange) -> Result<Vec<u8>> {
        let header = range.header_value();
        let started = Instant::now();
        let resp = self
            .agent
            .get(url)
            .header("Range", &header)
            .call()
            .map_err(map_ureq_error)?;

        let status = resp.status();
        let content_range = resp
            .headers()
            .get("Content-Range")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        match status {
            ureq::http::StatusCode::PARTIAL_CONTENT => {
                if let Some((start, _, _)) = content_range.as_deref().and_then(parse_content_range) {
                    if start != range.start {
                        return Err(PlayerError::RangeNotSupported);
                    }
                }
            }
            // A full-body answer is only acceptable when the range was the whole resource.
            ureq::http::StatusCode::OK if range.start == 0 => {}
            ureq::http::StatusCode::OK => return Err(PlayerError::RangeNotSupported),
            other => {
                return Err(PlayerError::Http {
                    status: other.as_u16(),
                });
            }
        }

        let mut buf = Vec::with_capacity(range.len() as usize);
        let (_, body) = resp.into_parts();
        body.into_reader()
            .read_to_end(&mut buf)
            .map_err(map_io_error)?;

        if status == ureq::http::StatusCode::OK && buf.len() as u64 != range.len() {
            return Err(PlayerError::RangeNotSupported);
        }
        buf.truncate(range.len() as usize);

        let elapsed = started.elapsed();
        if elapsed > Duration::from_millis(250) {
            let kbps = if elapsed.as_millis() > 0 {
                (buf.len() as u128 * 1000 / elapsed.as_millis()) / 1024
            } else {
                0
            };
            tracing::warn!(
                took_ms = elapsed.as_millis(),
                bytes = buf.len(),
                kbps = kbps as u64,
                range = header.as_str(),
                "http range fetch slow"
            );
        }
        Ok(buf)
    }
}

fn map_ureq_error(err: ureq::Error) -> PlayerError {
    match err {
        ureq::Error::Timeout(_) => PlayerError::LoadTimedOut,
        ureq::Error::Io(e) => map_io_error(e),
        other => PlayerError::Network(other.to_string()),
    }
}

fn map_io_error(err: io::Error) -> PlayerError {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => PlayerError::LoadTimedOut,
        _ => PlayerError::Network(format!("http read failed: {err}")),
    }
}

/// Parse `bytes start-end/total` into its parts; `total` is `None` for `*`.
fn parse_content_range(header: &str) -> Option<(u64, u64, Option<u64>)> {
    let rest = header.trim().strip_prefix("bytes")?.trim_start();
    let (span, total) = rest.split_once('/')?;
    let (start, end) = span.split_once('-')?;
    let start = start.trim().parse::<u64>().ok()?;
    let end = end.trim().parse::<u64>().ok()?;
    let total = total.trim().parse::<u64>().ok();
    Some((start, end, total))
}
