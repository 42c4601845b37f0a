//! Remote ZIP archive indexing and extraction.
//!
//! ## Architecture
//!
//! - [`structures`]: fixed-layout ZIP records (EOCD, ZIP64 EOCD, headers)
//! - [`locator`]: finds and parses the central directory with range requests
//! - [`matcher`]: glob selection of archives and entries
//! - [`extractor`]: local header checks, decoding and CRC32 verification
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Reading from the tail means the index costs two or three requests no
//! matter how large the archive is, and each entry costs one request for its
//! local header plus its payload.
//!
//! ## Limitations
//!
//! - STORED and DEFLATE only
//! - No encryption support
//! - No multi-disk archive support

mod extractor;
mod handle;
mod locator;
mod matcher;
mod structures;

pub use extractor::{EntryExtractor, ExtractedFile, ExtractionResult};
pub use handle::ArchiveHandle;
pub use locator::{CentralDirectory, CentralDirectoryLocator, PROBE_WINDOW, parse_central_directory};
pub use matcher::{Pattern, SelectionCriterion, SelectionPlan, split_zip_pattern};
pub use structures::*;
