//! # zipget
//!
//! Selective extraction of files from remote ZIP archives using HTTP Range
//! requests.
//!
//! Only the archive's tail, its central directory and the selected entries
//! are downloaded, so a few files can be pulled out of a multi-gigabyte
//! archive at a cost proportional to their size.
//!
//! ## Features
//!
//! - Range fetching with retry, exponential backoff, timeouts and cancellation
//! - ZIP64 archives and entries
//! - STORED and DEFLATE entries, verified against their CRC32
//! - Glob selection of archives and entries with optional count limits
//! - Path-safe, atomic writes under a destination root
//! - Zenodo record resolution by DOI, record URL or id
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use zipget::{
//!     ArchiveHandle, CentralDirectoryLocator, EntryExtractor, HttpTransport, RangeFetcher,
//!     RetryPolicy, SafeSink, SelectionCriterion,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let fetcher = Arc::new(RangeFetcher::new(
//!         HttpTransport::new()?,
//!         RetryPolicy::default(),
//!         Duration::from_secs(30),
//!     ));
//!     let handle =
//!         ArchiveHandle::probe(&fetcher, "data.zip", "https://example.com/data.zip").await?;
//!
//!     let directory = CentralDirectoryLocator::new(fetcher.clone()).locate(&handle).await?;
//!     let selected = SelectionCriterion::new("*.mat", Some(2)).select(&directory.entries);
//!
//!     let extractor = EntryExtractor::new(fetcher, handle, SafeSink::new("out")?);
//!     for result in extractor.extract_all(&selected, 4).await {
//!         println!("{}: {:?}", result.entry_name, result.outcome);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod downloader;
pub mod error;
pub mod io;
pub mod progress;
pub mod record;
pub mod sink;
pub mod zip;

pub use cli::Cli;
pub use config::{Config, OverwritePolicy, RetryPolicy};
pub use downloader::{ArchiveReport, ArchiveSource, Downloader};
pub use error::{Error, ErrorKind, Result};
pub use io::{HttpTransport, LocalTransport, RangeFetcher, RangeTransport};
pub use progress::ProgressSink;
pub use record::{RecordResolver, ZenodoResolver};
pub use sink::{SafeSink, normalize_entry_path};
pub use zip::{
    ArchiveHandle, CentralDirectoryEntry, CentralDirectoryLocator, EntryExtractor, ExtractedFile,
    ExtractionResult, SelectionCriterion, SelectionPlan,
};
