mod fetcher;
mod http;
mod local;

pub use fetcher::RangeFetcher;
pub use http::HttpTransport;
pub use local::LocalTransport;

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

/// Raw answer to a single range request.
///
/// Transports report the status as-is; deciding what an unexpected status
/// means is left to [`RangeFetcher`]. The body is only populated for
/// `206 Partial Content` responses so a server ignoring `Range` never
/// streams the full resource.
#[derive(Debug, Clone)]
pub struct RangeResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Answer to a HEAD-style probe.
#[derive(Debug, Clone, Copy)]
pub struct ResourceInfo {
    pub status: u16,
    /// Value of `Content-Length`, if present.
    pub length: Option<u64>,
    /// Whether `Accept-Ranges` advertises `bytes`.
    pub accepts_ranges: bool,
}

/// A single-shot byte-range transport.
///
/// Implementations perform exactly one request per call and never retry;
/// failures that may succeed later are reported as
/// [`Error::TransientNetwork`](crate::Error::TransientNetwork).
#[async_trait]
pub trait RangeTransport: Send + Sync {
    /// Request bytes `start..=end` of `url`.
    async fn get_range(&self, url: &str, start: u64, end: u64) -> Result<RangeResponse>;

    /// Query the size and range capability of `url`.
    async fn probe(&self, url: &str) -> Result<ResourceInfo>;
}
