//! Run configuration consumed by the fetcher, extractor and downloader.

use std::path::PathBuf;
use std::time::Duration;

/// Retry schedule shared by network calls and whole-entry retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each further one.
    pub backoff_base: Duration,
    /// Upper bound for a single backoff delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Backoff to wait after the `failed_attempt`-th failure (1-based).
    ///
    /// ```
    /// use std::time::Duration;
    /// use zipget::RetryPolicy;
    ///
    /// let policy = RetryPolicy {
    ///     max_attempts: 5,
    ///     backoff_base: Duration::from_millis(100),
    ///     max_backoff: Duration::from_millis(250),
    /// };
    /// assert_eq!(policy.backoff(1), Duration::from_millis(100));
    /// assert_eq!(policy.backoff(2), Duration::from_millis(200));
    /// assert_eq!(policy.backoff(3), Duration::from_millis(250));
    /// ```
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(31);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// What to do when the destination file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    /// Always fetch and atomically replace the file.
    #[default]
    Overwrite,
    /// Keep the file untouched when its size and CRC32 match the archive.
    SkipVerified,
}

/// Settings for one download run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Glob selecting which archives of a record to open.
    pub zip_pattern: String,
    /// Glob selecting entries inside each archive; `None` selects every file.
    pub inner_pattern: Option<String>,
    /// Process at most this many matching archives.
    pub max_archives: Option<usize>,
    /// Extract at most this many matching entries per archive.
    pub max_entries: Option<usize>,
    pub retry: RetryPolicy,
    /// Timeout applied to each individual network call.
    pub timeout: Duration,
    /// Maximum number of index loads and entry extractions in flight.
    pub concurrency: usize,
    /// Directory all entries are written under.
    pub dest_root: PathBuf,
    pub overwrite: OverwritePolicy,
    /// Largest byte range requested at once when streaming a payload.
    pub segment_size: u64,
}

impl Config {
    pub(crate) fn concurrency(&self) -> usize {
        self.concurrency.max(1)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            zip_pattern: "*.zip".to_string(),
            inner_pattern: None,
            max_archives: None,
            max_entries: None,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
            concurrency: 4,
            dest_root: PathBuf::from("."),
            overwrite: OverwritePolicy::default(),
            segment_size: 4 * 1024 * 1024,
        }
    }
}
