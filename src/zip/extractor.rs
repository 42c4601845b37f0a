use flate2::{Decompress, FlushDecompress, Status};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::OverwritePolicy;
use crate::error::ErrorKind;
use crate::io::{RangeFetcher, RangeTransport};
use crate::progress::ProgressSink;
use crate::sink::{self, SafeSink};
use crate::{Error, Result};

use super::handle::ArchiveHandle;
use super::structures::*;

/// Size of the buffer decoded data passes through on its way to disk.
const CHUNK_SIZE: usize = 64 * 1024;

/// A verified file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub path: PathBuf,
    /// Uncompressed size in bytes.
    pub bytes: u64,
    /// CRC32 of the file contents, equal to the archive's record.
    pub crc32: u32,
    /// The file already existed with matching size and CRC32 and was kept.
    pub reused: bool,
}

/// Outcome of one attempted entry.
#[derive(Debug)]
pub struct ExtractionResult {
    pub entry_name: String,
    pub outcome: Result<ExtractedFile>,
}

impl ExtractionResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Classification of the failure, if any.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.outcome.as_ref().err().map(Error::kind)
    }
}

/// Streaming decoder for one entry's payload.
enum PayloadDecoder {
    Stored,
    Deflate { inflater: Decompress, finished: bool },
}

impl PayloadDecoder {
    fn new(method: CompressionMethod) -> Result<Self> {
        match method {
            CompressionMethod::Stored => Ok(Self::Stored),
            // ZIP stores raw deflate streams without a zlib header
            CompressionMethod::Deflate => Ok(Self::Deflate {
                inflater: Decompress::new(false),
                finished: false,
            }),
            CompressionMethod::Unknown(m) => Err(Error::UnsupportedCompression(m)),
        }
    }

    /// Decode from `input` into `out`, returning (consumed, produced).
    fn step(&mut self, input: &[u8], out: &mut [u8]) -> Result<(usize, usize)> {
        match self {
            Self::Stored => {
                let n = input.len().min(out.len());
                out[..n].copy_from_slice(&input[..n]);
                Ok((n, n))
            }
            Self::Deflate { inflater, finished } => {
                if *finished {
                    return Ok((0, 0));
                }
                let (in_before, out_before) = (inflater.total_in(), inflater.total_out());
                let status = inflater
                    .decompress(input, out, FlushDecompress::None)
                    .map_err(|e| Error::Integrity(format!("corrupt deflate stream: {}", e)))?;
                if status == Status::StreamEnd {
                    *finished = true;
                }
                Ok((
                    (inflater.total_in() - in_before) as usize,
                    (inflater.total_out() - out_before) as usize,
                ))
            }
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            Self::Stored => true,
            Self::Deflate { finished, .. } => *finished,
        }
    }
}

/// Extracts selected entries of one archive.
///
/// Each entry costs one request for its local header plus one request per
/// payload segment. Entries are independent: a failure is recorded in that
/// entry's [`ExtractionResult`] and never stops its siblings.
pub struct EntryExtractor<T: RangeTransport> {
    fetcher: Arc<RangeFetcher<T>>,
    handle: ArchiveHandle,
    sink: SafeSink,
    overwrite: OverwritePolicy,
    segment_size: u64,
    progress: Option<Arc<dyn ProgressSink>>,
    limiter: Option<Arc<Semaphore>>,
    range_refused: AtomicBool,
}

impl<T: RangeTransport> EntryExtractor<T> {
    pub fn new(fetcher: Arc<RangeFetcher<T>>, handle: ArchiveHandle, sink: SafeSink) -> Self {
        Self {
            fetcher,
            handle,
            sink,
            overwrite: OverwritePolicy::default(),
            segment_size: 4 * 1024 * 1024,
            progress: None,
            limiter: None,
            range_refused: AtomicBool::new(false),
        }
    }

    pub fn with_overwrite(mut self, overwrite: OverwritePolicy) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Request payloads in ranges of at most `segment_size` bytes.
    pub fn with_segment_size(mut self, segment_size: u64) -> Self {
        self.segment_size = segment_size.max(1);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Hold a permit of `limiter` while an entry is being extracted.
    pub fn with_limiter(mut self, limiter: Arc<Semaphore>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Extract `entries` with up to `concurrency` in flight.
    ///
    /// Results are returned in the order of `entries`, whatever order the
    /// extractions finish in.
    pub async fn extract_all(
        &self,
        entries: &[CentralDirectoryEntry],
        concurrency: usize,
    ) -> Vec<ExtractionResult> {
        stream::iter(entries)
            .map(|entry| self.extract(entry))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    /// Extract a single entry.
    pub async fn extract(&self, entry: &CentralDirectoryEntry) -> ExtractionResult {
        let outcome = self.extract_entry(entry).await;

        match &outcome {
            Ok(file) if file.reused => info!(
                archive = self.handle.name(),
                entry = %entry.file_name,
                "already present with matching size and CRC32, skipping"
            ),
            Ok(file) => info!(
                archive = self.handle.name(),
                entry = %entry.file_name,
                bytes = file.bytes,
                path = %file.path.display(),
                "extracted"
            ),
            Err(e) => {
                if e.kind() == ErrorKind::ProtocolViolation {
                    self.range_refused.store(true, Ordering::Relaxed);
                }
                warn!(
                    archive = self.handle.name(),
                    entry = %entry.file_name,
                    error = %e,
                    "extraction failed"
                );
            }
        }
        if let Some(progress) = &self.progress {
            progress.on_entry_finish(&entry.file_name, outcome.is_ok());
        }

        ExtractionResult {
            entry_name: entry.file_name.clone(),
            outcome,
        }
    }

    async fn extract_entry(&self, entry: &CentralDirectoryEntry) -> Result<ExtractedFile> {
        let _permit = match &self.limiter {
            Some(limiter) => Some(limiter.acquire().await.map_err(|_| Error::Cancelled)?),
            None => None,
        };

        if self.range_refused.load(Ordering::Relaxed) {
            return Err(Error::ProtocolViolation(
                "server stopped honoring range requests for this archive".to_string(),
            ));
        }
        if entry.is_encrypted() {
            return Err(Error::Encrypted);
        }
        if let CompressionMethod::Unknown(m) = entry.compression_method {
            return Err(Error::UnsupportedCompression(m));
        }
        if entry.compression_method == CompressionMethod::Stored
            && entry.compressed_size != entry.uncompressed_size
        {
            return Err(Error::malformed(format!(
                "stored entry '{}' has compressed size {} but uncompressed size {}",
                entry.file_name, entry.compressed_size, entry.uncompressed_size
            )));
        }

        let dest = self.sink.resolve(&entry.file_name)?;
        if self.overwrite == OverwritePolicy::SkipVerified
            && sink::is_verified_copy(&dest, entry.uncompressed_size, entry.crc32).await?
        {
            return Ok(ExtractedFile {
                path: dest,
                bytes: entry.uncompressed_size,
                crc32: entry.crc32,
                reused: true,
            });
        }

        let policy = *self.fetcher.retry_policy();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut reported = 0;
            match self.extract_once(entry, attempt == 1, &mut reported).await {
                Ok(file) => return Ok(file),
                Err(e) if e.is_retryable() && attempt < policy.attempts() => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        archive = self.handle.name(),
                        entry = %entry.file_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "integrity check failed, fetching entry again"
                    );
                    if let Some(progress) = &self.progress {
                        progress.on_entry_retry(&entry.file_name, reported);
                    }
                    self.fetcher.pause(delay).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch, decode, verify and commit an entry once.
    ///
    /// `reported` accumulates the bytes announced through `on_bytes`.
    async fn extract_once(
        &self,
        entry: &CentralDirectoryEntry,
        first_attempt: bool,
        reported: &mut u64,
    ) -> Result<ExtractedFile> {
        let data_offset = self.data_offset(entry).await?;
        let mut decoder = PayloadDecoder::new(entry.compression_method)?;
        let mut pending = self.sink.create(&entry.file_name).await?;
        let mut hasher = crc32fast::Hasher::new();
        let mut out = vec![0u8; CHUNK_SIZE];
        let cancel = self.fetcher.cancellation();

        if let Some(progress) = self.progress.as_ref().filter(|_| first_attempt) {
            progress.on_entry_start(self.handle.name(), &entry.file_name, entry.uncompressed_size);
        }

        let end = data_offset + entry.compressed_size;
        let mut pos = data_offset;
        while pos < end {
            let segment_end = end.min(pos.saturating_add(self.segment_size));
            let segment = self
                .fetcher
                .fetch(self.handle.url(), pos, segment_end - 1)
                .await?;
            pos = segment_end;

            let mut input: &[u8] = &segment;
            loop {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let (consumed, produced) = decoder.step(input, &mut out)?;
                input = &input[consumed..];

                if produced > 0 {
                    if pending.written() + produced as u64 > entry.uncompressed_size {
                        return Err(Error::Integrity(format!(
                            "decoded data exceeds the declared {} bytes",
                            entry.uncompressed_size
                        )));
                    }
                    let chunk = &out[..produced];
                    hasher.update(chunk);
                    pending.write(chunk).await?;
                    if let Some(progress) = &self.progress {
                        progress.on_bytes(&entry.file_name, produced as u64);
                        *reported += produced as u64;
                    }
                }

                let stalled = consumed == 0 && produced == 0;
                let drained = input.is_empty() && produced < out.len();
                if stalled || drained {
                    break;
                }
            }
        }

        if !decoder.is_finished() {
            return Err(Error::Integrity("deflate stream ended early".to_string()));
        }
        if pending.written() != entry.uncompressed_size {
            return Err(Error::Integrity(format!(
                "decoded {} bytes, expected {}",
                pending.written(),
                entry.uncompressed_size
            )));
        }
        let crc32 = hasher.finalize();
        if crc32 != entry.crc32 {
            return Err(Error::CrcMismatch {
                expected: entry.crc32,
                actual: crc32,
            });
        }

        let bytes = pending.written();
        let path = pending.commit().await?;
        Ok(ExtractedFile {
            path,
            bytes,
            crc32,
            reused: false,
        })
    }

    /// Read the local file header and return where the payload starts.
    ///
    /// The header's method, CRC32 and sizes must agree with the central
    /// directory. Zero values are accepted when the data-descriptor flag
    /// says they are written after the payload instead.
    async fn data_offset(&self, entry: &CentralDirectoryEntry) -> Result<u64> {
        let url = self.handle.url();
        let raw = self
            .fetcher
            .fetch(
                url,
                entry.lfh_offset,
                entry.lfh_offset + LocalFileHeader::SIZE as u64 - 1,
            )
            .await?;
        let lfh = LocalFileHeader::from_bytes(&raw)?;
        let descriptor = lfh.flags & flags::DATA_DESCRIPTOR != 0 || entry.has_data_descriptor();

        if lfh.compression_method != entry.compression_method.as_u16() {
            return Err(Error::malformed(format!(
                "local header of '{}' uses compression method {}, central directory says {}",
                entry.file_name,
                lfh.compression_method,
                entry.compression_method.as_u16()
            )));
        }

        let mut compressed = lfh.compressed_size as u64;
        let mut uncompressed = lfh.uncompressed_size as u64;
        let wide = lfh.compressed_size == ZIP64_SENTINEL_32
            || lfh.uncompressed_size == ZIP64_SENTINEL_32;
        if wide && lfh.extra_field_length > 0 {
            let extra_start =
                entry.lfh_offset + LocalFileHeader::SIZE as u64 + lfh.file_name_length as u64;
            let extra = self
                .fetcher
                .fetch(url, extra_start, extra_start + lfh.extra_field_length as u64 - 1)
                .await?;
            if let Some(info) = Zip64ExtendedInfo::parse(
                &extra,
                lfh.uncompressed_size,
                lfh.compressed_size,
                None,
            )? {
                uncompressed = info.uncompressed_size.unwrap_or(uncompressed);
                compressed = info.compressed_size.unwrap_or(compressed);
            }
        }

        let agree = |local: u64, central: u64, what: &str| -> Result<()> {
            let deferred = descriptor && (local == 0 || local == ZIP64_SENTINEL_32 as u64);
            if local == central || deferred {
                Ok(())
            } else {
                Err(Error::malformed(format!(
                    "local header {} {} of '{}' disagrees with central directory value {}",
                    what, local, entry.file_name, central
                )))
            }
        };
        agree(lfh.crc32 as u64, entry.crc32 as u64, "CRC32")?;
        agree(compressed, entry.compressed_size, "compressed size")?;
        agree(uncompressed, entry.uncompressed_size, "uncompressed size")?;

        let data_offset = entry.lfh_offset + lfh.total_len();
        if data_offset
            .checked_add(entry.compressed_size)
            .is_none_or(|end| end > self.handle.length())
        {
            return Err(Error::malformed(format!(
                "payload of '{}' runs past the end of the archive",
                entry.file_name
            )));
        }

        debug!(
            archive = self.handle.name(),
            entry = %entry.file_name,
            data_offset,
            "local header verified"
        );
        Ok(data_offset)
    }
}
