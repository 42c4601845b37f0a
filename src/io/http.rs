use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, RANGE};
use reqwest::{Client, StatusCode};
use std::time::Duration;

use super::{RangeResponse, RangeTransport, ResourceInfo};
use crate::{Error, Result};

/// HTTP transport backed by a pooled `reqwest` client.
///
/// The client is cheap to share: every request reuses the same connection
/// pool, which is internally synchronized.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with a fresh connection pool.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::TransientNetwork(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Map a `reqwest` failure onto the crate's retry classes.
pub(crate) fn classify(e: reqwest::Error) -> Error {
    if e.is_builder() {
        Error::InvalidUrl(e.to_string())
    } else if e.is_redirect() {
        Error::ProtocolViolation(e.to_string())
    } else {
        // Timeouts, refused or reset connections and interrupted bodies
        Error::TransientNetwork(e.to_string())
    }
}

#[async_trait]
impl RangeTransport for HttpTransport {
    async fn get_range(&self, url: &str, start: u64, end: u64) -> Result<RangeResponse> {
        let resp = self
            .client
            .get(url)
            .header(RANGE, format!("bytes={}-{}", start, end))
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if status != StatusCode::PARTIAL_CONTENT {
            // Drop the response unread: a 200 here would be the whole archive.
            return Ok(RangeResponse {
                status: status.as_u16(),
                body: Bytes::new(),
            });
        }

        let body = resp.bytes().await.map_err(classify)?;
        Ok(RangeResponse {
            status: status.as_u16(),
            body,
        })
    }

    async fn probe(&self, url: &str) -> Result<ResourceInfo> {
        let resp = self.client.head(url).send().await.map_err(classify)?;

        let accepts_ranges = resp
            .headers()
            .get(ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("bytes"))
            .unwrap_or(false);

        let length = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());

        Ok(ResourceInfo {
            status: resp.status().as_u16(),
            length,
            accepts_ranges,
        })
    }
}
