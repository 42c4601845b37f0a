use bytes::Bytes;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::RangeTransport;
use crate::config::RetryPolicy;
use crate::{Error, Result};

/// Retrying byte-range reader on top of a [`RangeTransport`].
///
/// Every read is checked against the exact range requested; a server that
/// answers a range request with anything but `206 Partial Content` is
/// reported as [`Error::ProtocolViolation`] instead of being downloaded in
/// full.
pub struct RangeFetcher<T: RangeTransport> {
    transport: T,
    retry: RetryPolicy,
    timeout: Duration,
    cancel: CancellationToken,
    transferred_bytes: AtomicU64,
}

impl<T: RangeTransport> RangeFetcher<T> {
    pub fn new(transport: T, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            transport,
            retry,
            timeout,
            cancel: CancellationToken::new(),
            transferred_bytes: AtomicU64::new(0),
        }
    }

    /// Observe `cancel` at every request and backoff.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Get total payload bytes received from the transport
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// Read exactly `end - start + 1` bytes of `url`.
    pub async fn fetch(&self, url: &str, start: u64, end: u64) -> Result<Bytes> {
        if end < start {
            return Err(Error::malformed(format!(
                "empty byte range {}-{}",
                start, end
            )));
        }
        let expected = end - start + 1;
        self.retrying(url, || self.fetch_once(url, start, end, expected))
            .await
    }

    /// Send a HEAD-style probe and return the resource length.
    ///
    /// Servers that do not advertise byte ranges are refused up front.
    pub async fn probe_length(&self, url: &str) -> Result<u64> {
        let info = self
            .retrying(url, || async {
                let info = self.bounded(self.transport.probe(url)).await?;
                match info.status {
                    429 | 500..=599 => Err(Error::TransientNetwork(format!(
                        "server responded with status {}",
                        info.status
                    ))),
                    200..=299 => Ok(info),
                    status => Err(Error::HttpStatus { status }),
                }
            })
            .await?;

        if !info.accepts_ranges {
            return Err(Error::ProtocolViolation(
                "remote server does not support Range requests".to_string(),
            ));
        }
        info.length.ok_or_else(|| {
            Error::ProtocolViolation("remote server did not return Content-Length".to_string())
        })
    }

    async fn fetch_once(&self, url: &str, start: u64, end: u64, expected: u64) -> Result<Bytes> {
        debug!(url, start, end, "range request");
        let resp = self.bounded(self.transport.get_range(url, start, end)).await?;

        match resp.status {
            206 => {
                let actual = resp.body.len() as u64;
                self.transferred_bytes.fetch_add(actual, Ordering::Relaxed);
                if actual != expected {
                    return Err(Error::LengthMismatch { expected, actual });
                }
                Ok(resp.body)
            }
            429 | 500..=599 => Err(Error::TransientNetwork(format!(
                "server responded with status {}",
                resp.status
            ))),
            status @ 200..=399 => Err(Error::ProtocolViolation(format!(
                "expected 206 Partial Content for bytes {}-{}, got {}",
                start, end, status
            ))),
            status => Err(Error::HttpStatus { status }),
        }
    }

    /// Run one transport call under the per-call timeout and cancellation.
    async fn bounded<O>(&self, call: impl Future<Output = Result<O>>) -> Result<O> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            res = tokio::time::timeout(self.timeout, call) => match res {
                Ok(res) => res,
                Err(_) => Err(Error::TransientNetwork(format!(
                    "request timed out after {:?}",
                    self.timeout
                ))),
            },
        }
    }

    async fn retrying<O, F, Fut>(&self, url: &str, mut op: F) -> Result<O>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<O>>,
    {
        let max_attempts = self.retry.attempts();
        let mut attempt = 0;
        let mut length_retry_used = false;

        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let retry = match err {
                // A short or long body smells of corruption; give it one more go.
                Error::LengthMismatch { .. } => !std::mem::replace(&mut length_retry_used, true),
                Error::TransientNetwork(_) => attempt < max_attempts,
                _ => false,
            };
            if !retry {
                return Err(err);
            }

            let delay = self.retry.backoff(attempt);
            warn!(
                url,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "request failed, retrying"
            );
            self.pause(delay).await?;
        }
    }

    /// Sleep for `delay` unless cancelled first.
    pub(crate) async fn pause(&self, delay: Duration) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
