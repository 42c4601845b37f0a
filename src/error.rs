//! Error types shared by every layer of the crate.
//!
//! Each failure carries an [`ErrorKind`] so callers can decide how far it
//! propagates: a transient network error is retried, a malformed archive
//! stops only that archive, and an unsafe path skips only that entry.

use thiserror::Error;

/// Result type alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Timeouts, connection resets, 5xx and rate limiting.
    TransientNetwork,
    /// A non-retryable HTTP status such as 404.
    Http,
    /// The server did not honor a range request.
    ProtocolViolation,
    /// EOCD, central directory or local header are inconsistent.
    MalformedArchive,
    /// Compression method or encryption we cannot decode.
    UnsupportedCompression,
    /// CRC32 or size mismatch after decoding, or a corrupt deflate stream.
    Integrity,
    /// Entry name resolves outside the destination root.
    UnsafePath,
    /// The caller cancelled the run.
    Cancelled,
    /// Local filesystem failure.
    Io,
    /// Record identifier or record metadata could not be resolved.
    Record,
}

/// Errors produced while fetching, parsing and extracting remote archives.
#[derive(Error, Debug)]
pub enum Error {
    /// Network failure that may succeed on retry.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// HTTP status that retrying cannot fix.
    #[error("HTTP request failed with status: {status}")]
    HttpStatus {
        /// The response status code.
        status: u16,
    },

    /// URL could not be turned into a request.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Range request answered with something other than `206 Partial Content`.
    #[error("range request not honored: {0}")]
    ProtocolViolation(String),

    /// A partial response carried a different number of bytes than requested.
    #[error("response length mismatch: expected {expected} bytes, received {actual}")]
    LengthMismatch {
        /// Bytes requested.
        expected: u64,
        /// Bytes received.
        actual: u64,
    },

    /// The archive structures are invalid or contradict each other.
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    /// Compression method other than STORED or DEFLATE.
    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    /// Encrypted entries are never decoded.
    #[error("encrypted entries are not supported")]
    Encrypted,

    /// Decoded CRC32 differs from the recorded one.
    #[error("CRC32 mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// CRC32 recorded in the central directory.
        expected: u32,
        /// CRC32 of the decoded bytes.
        actual: u32,
    },

    /// Decoded data is corrupt or has the wrong size.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Entry name escapes the destination root.
    #[error("unsafe entry path: {0}")]
    UnsafePath(String),

    /// The cancellation signal fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Record identifier could not be parsed.
    #[error("unsupported record identifier: {0}")]
    InvalidRecord(String),

    /// Record metadata could not be fetched or decoded.
    #[error("record lookup failed: {0}")]
    Record(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransientNetwork(_) | Self::LengthMismatch { .. } => ErrorKind::TransientNetwork,
            Self::HttpStatus { .. } | Self::InvalidUrl(_) => ErrorKind::Http,
            Self::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Self::MalformedArchive(_) => ErrorKind::MalformedArchive,
            Self::UnsupportedCompression(_) | Self::Encrypted => ErrorKind::UnsupportedCompression,
            Self::CrcMismatch { .. } | Self::Integrity(_) => ErrorKind::Integrity,
            Self::UnsafePath(_) => ErrorKind::UnsafePath,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidRecord(_) | Self::Record(_) => ErrorKind::Record,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns `true` if a whole-entry retry may fix this error.
    ///
    /// Network-level retries happen inside the fetcher; this covers the
    /// outer loop that re-fetches and re-decodes an entry.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Integrity)
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedArchive(msg.into())
    }
}
