use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{Config, OverwritePolicy, RetryPolicy};

#[derive(Parser, Debug)]
#[command(name = "zipget")]
#[command(version)]
#[command(about = "Extract selected files from remote ZIP archives using HTTP Range requests", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipget 10.5281/zenodo.5423457 --inner-pattern '*tubulin*.mat'\n  \
  zipget 5423457 --zip-pattern '*.zip/*.m' --first-n-inner 2\n  \
  zipget https://zenodo.org/records/5423457 -d out --resume")]
pub struct Cli {
    /// Zenodo DOI, record URL or record id
    #[arg(value_name = "RECORD")]
    pub record: String,

    /// Directory to extract files into
    #[arg(short = 'd', long = "download-dir", value_name = "DIR", default_value = ".")]
    pub download_dir: PathBuf,

    /// Glob for archives in the record; `a.zip/inner` also sets the inner glob
    #[arg(long, value_name = "GLOB", default_value = "*.zip")]
    pub zip_pattern: String,

    /// Glob for files inside each archive (default: all files)
    #[arg(long, value_name = "GLOB")]
    pub inner_pattern: Option<String>,

    /// Process only the first N matching archives (0 = all)
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub first_n_zip: usize,

    /// Extract only the first N matching files per archive (0 = all)
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub first_n_inner: usize,

    /// Attempts per network request and per entry
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub retries: u32,

    /// Base delay between attempts, doubled after each failure
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    pub backoff_ms: u64,

    /// Timeout for each network request
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Maximum number of requests in flight
    #[arg(short = 'j', long, value_name = "N", default_value_t = 4)]
    pub concurrency: usize,

    /// Keep existing files whose size and CRC32 already match
    #[arg(long)]
    pub resume: bool,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// More log output (-vv for per-request detail)
    #[arg(short = 'v', action = clap::ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

impl Cli {
    /// Default log filter for the chosen verbosity.
    pub fn log_level(&self) -> &'static str {
        match (self.quiet, self.verbose) {
            (true, _) => "warn",
            (false, 0) => "info",
            (false, 1) => "debug",
            (false, _) => "trace",
        }
    }

    pub fn show_progress(&self) -> bool {
        !self.quiet && !self.no_progress
    }

    pub fn to_config(&self) -> Config {
        let limit = |n: usize| (n > 0).then_some(n);
        let defaults = RetryPolicy::default();
        Config {
            zip_pattern: self.zip_pattern.clone(),
            inner_pattern: self.inner_pattern.clone().filter(|p| !p.is_empty()),
            max_archives: limit(self.first_n_zip),
            max_entries: limit(self.first_n_inner),
            retry: RetryPolicy {
                max_attempts: self.retries,
                backoff_base: Duration::from_millis(self.backoff_ms),
                max_backoff: defaults.max_backoff,
            },
            timeout: Duration::from_secs(self.timeout_secs),
            concurrency: self.concurrency,
            dest_root: self.download_dir.clone(),
            overwrite: if self.resume {
                OverwritePolicy::SkipVerified
            } else {
                OverwritePolicy::Overwrite
            },
            ..Config::default()
        }
    }
}
