//! Central directory discovery over range requests.
//!
//! ## Request plan
//!
//! ZIP archives keep their index at the tail, so the locator never touches
//! the entry data:
//! 1. One request for the archive tail, large enough to contain the End of
//!    Central Directory (EOCD) record behind the longest possible comment.
//! 2. For ZIP64 archives only, one request for the ZIP64 EOCD record the
//!    locator points to.
//! 3. One request for exactly the Central Directory.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

use crate::io::{RangeFetcher, RangeTransport};
use crate::{Error, Result};

use super::handle::ArchiveHandle;
use super::structures::*;

/// Tail bytes fetched on top of the largest possible EOCD with comment.
pub const PROBE_WINDOW: u64 = 64 * 1024;

/// The parsed index of one archive.
#[derive(Debug, Clone)]
pub struct CentralDirectory {
    /// Entries in the order they are stored.
    pub entries: Vec<CentralDirectoryEntry>,
    /// Offset of the central directory within the archive.
    pub offset: u64,
    /// Size of the central directory in bytes.
    pub size: u64,
    /// Whether the ZIP64 EOCD was used.
    pub zip64: bool,
}

/// Reads an archive's central directory with as few requests as possible.
pub struct CentralDirectoryLocator<T: RangeTransport> {
    fetcher: Arc<RangeFetcher<T>>,
}

impl<T: RangeTransport> CentralDirectoryLocator<T> {
    pub fn new(fetcher: Arc<RangeFetcher<T>>) -> Self {
        Self { fetcher }
    }

    /// Fetch and parse the central directory of `handle`.
    pub async fn locate(&self, handle: &ArchiveHandle) -> Result<CentralDirectory> {
        let url = handle.url();
        let len = handle.length();
        if len < EndOfCentralDirectory::SIZE as u64 {
            return Err(Error::malformed(format!(
                "archive of {} bytes is too small to be a ZIP file",
                len
            )));
        }

        let window =
            len.min(PROBE_WINDOW + (EndOfCentralDirectory::SIZE + EndOfCentralDirectory::MAX_COMMENT) as u64);
        let window_start = len - window;
        let tail = self.fetcher.fetch(url, window_start, len - 1).await?;

        let pos = find_eocd(&tail).ok_or_else(|| {
            Error::malformed("no End of Central Directory signature found")
        })?;
        let eocd = EndOfCentralDirectory::from_bytes(&tail[pos..])?;
        let eocd_offset = window_start + pos as u64;

        let locator_bytes = pos
            .checked_sub(Zip64EOCDLocator::SIZE)
            .map(|start| &tail[start..pos])
            .filter(|bytes| bytes.starts_with(Zip64EOCDLocator::SIGNATURE));

        // (cd_offset, cd_size, declared entries, end of the region the CD must precede)
        let (cd_offset, cd_size, total_entries, cd_limit, zip64) = match locator_bytes {
            Some(bytes) => {
                let locator = Zip64EOCDLocator::from_bytes(bytes)?;
                let locator_offset = eocd_offset - Zip64EOCDLocator::SIZE as u64;
                let eocd64_end = locator
                    .eocd64_offset
                    .checked_add(Zip64EOCD::MIN_SIZE as u64)
                    .filter(|end| *end <= locator_offset)
                    .ok_or_else(|| {
                        Error::malformed("ZIP64 end of central directory lies outside the archive")
                    })?;

                let raw = self
                    .fetcher
                    .fetch(url, locator.eocd64_offset, eocd64_end - 1)
                    .await?;
                let eocd64 = Zip64EOCD::from_bytes(&raw)?;
                debug!(
                    archive = handle.name(),
                    entries = eocd64.total_entries,
                    "using ZIP64 end of central directory"
                );
                (
                    eocd64.cd_offset,
                    eocd64.cd_size,
                    eocd64.total_entries,
                    locator.eocd64_offset,
                    true,
                )
            }
            None => {
                if eocd.is_zip64() {
                    return Err(Error::malformed(
                        "ZIP64 sentinel values without a ZIP64 locator",
                    ));
                }
                (
                    eocd.cd_offset as u64,
                    eocd.cd_size as u64,
                    eocd.total_entries as u64,
                    eocd_offset,
                    false,
                )
            }
        };

        if cd_offset
            .checked_add(cd_size)
            .is_none_or(|end| end > cd_limit)
        {
            return Err(Error::malformed(format!(
                "central directory {}+{} lies outside the archive",
                cd_offset, cd_size
            )));
        }

        let entries = if cd_size == 0 {
            if total_entries != 0 {
                return Err(Error::malformed(format!(
                    "empty central directory declares {} entries",
                    total_entries
                )));
            }
            Vec::new()
        } else {
            // Read the entire Central Directory in one request
            let cd = self
                .fetcher
                .fetch(url, cd_offset, cd_offset + cd_size - 1)
                .await?;
            parse_central_directory(&cd, total_entries, len)?
        };

        debug!(
            archive = handle.name(),
            entries = entries.len(),
            cd_offset,
            cd_size,
            "central directory loaded"
        );

        Ok(CentralDirectory {
            entries,
            offset: cd_offset,
            size: cd_size,
            zip64,
        })
    }
}

/// Find the EOCD signature, searching backwards from the end.
///
/// A candidate whose comment exactly fills the rest of the buffer wins;
/// otherwise the last candidate whose comment fits is used, which tolerates
/// trailing garbage after the archive.
fn find_eocd(buf: &[u8]) -> Option<usize> {
    let last = buf.len().checked_sub(EndOfCentralDirectory::SIZE)?;
    let mut fallback = None;

    for i in (0..=last).rev() {
        if &buf[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
            continue;
        }
        let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
        let remaining = buf.len() - i - EndOfCentralDirectory::SIZE;
        if comment_len == remaining {
            return Some(i);
        }
        if comment_len < remaining && fallback.is_none() {
            fallback = Some(i);
        }
    }

    fallback
}

/// Parse every Central Directory File Header in `cd`.
///
/// Fails when the number of headers differs from `declared`, or when an
/// entry's local header and payload would not fit in `archive_len` bytes.
pub fn parse_central_directory(
    cd: &[u8],
    declared: u64,
    archive_len: u64,
) -> Result<Vec<CentralDirectoryEntry>> {
    let mut entries = Vec::with_capacity(declared.min(1 << 16) as usize);
    let mut cursor = Cursor::new(cd);

    while (cursor.position() as usize) + 4 <= cd.len() {
        let start = cursor.position() as usize;
        if &cd[start..start + 4] != CDFH_SIGNATURE {
            // e.g. a digital signature record after the last header
            break;
        }
        let entry = parse_cdfh(&mut cursor).map_err(|e| match e {
            Error::Io(_) => Error::malformed("truncated Central Directory File Header"),
            e => e,
        })?;

        let end = entry
            .lfh_offset
            .checked_add(LocalFileHeader::SIZE as u64)
            .and_then(|v| v.checked_add(entry.compressed_size));
        if end.is_none_or(|end| end > archive_len) {
            return Err(Error::malformed(format!(
                "entry '{}' lies outside the archive",
                entry.file_name
            )));
        }

        entries.push(entry);
    }

    if entries.len() as u64 != declared {
        return Err(Error::malformed(format!(
            "central directory declares {} entries but {} were found",
            declared,
            entries.len()
        )));
    }

    Ok(entries)
}

/// Parse a Central Directory File Header from a cursor.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<CentralDirectoryEntry> {
    let data: &[u8] = *cursor.get_ref();
    if data.len() - (cursor.position() as usize) < CDFH_MIN_SIZE {
        return Err(Error::malformed("truncated Central Directory File Header"));
    }

    // Signature already checked by the caller
    cursor.set_position(cursor.position() + 4);
    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let _last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let _last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let compressed_size32 = cursor.read_u32::<LittleEndian>()?;
    let uncompressed_size32 = cursor.read_u32::<LittleEndian>()?;
    let file_name_length = cursor.read_u16::<LittleEndian>()? as usize;
    let extra_field_length = cursor.read_u16::<LittleEndian>()? as usize;
    let file_comment_length = cursor.read_u16::<LittleEndian>()? as usize;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let _external_attrs = cursor.read_u32::<LittleEndian>()?;
    let lfh_offset32 = cursor.read_u32::<LittleEndian>()?;

    let name_start = cursor.position() as usize;
    let extra_start = name_start + file_name_length;
    let comment_start = extra_start + extra_field_length;
    let next = comment_start + file_comment_length;
    if next > data.len() {
        return Err(Error::malformed("Central Directory File Header overruns the directory"));
    }

    let raw_name = data[name_start..extra_start].to_vec();
    let file_name = decode_name(&raw_name, flags);

    let zip64_info = Zip64ExtendedInfo::parse(
        &data[extra_start..comment_start],
        uncompressed_size32,
        compressed_size32,
        Some(lfh_offset32),
    )?
    .unwrap_or_default();

    let resolve = |value32: u32, wide: Option<u64>, what: &str| -> Result<(u64, bool)> {
        match (value32, wide) {
            (ZIP64_SENTINEL_32, Some(v)) => Ok((v, true)),
            (ZIP64_SENTINEL_32, None) => Err(Error::malformed(format!(
                "entry '{}' has no ZIP64 {}",
                file_name, what
            ))),
            (v, _) => Ok((v as u64, false)),
        }
    };
    let (uncompressed_size, wide_u) =
        resolve(uncompressed_size32, zip64_info.uncompressed_size, "uncompressed size")?;
    let (compressed_size, wide_c) =
        resolve(compressed_size32, zip64_info.compressed_size, "compressed size")?;
    let (lfh_offset, wide_o) = resolve(lfh_offset32, zip64_info.lfh_offset, "header offset")?;

    cursor.set_position(next as u64);

    let is_directory = file_name.ends_with('/');

    Ok(CentralDirectoryEntry {
        raw_name,
        file_name,
        flags,
        compression_method: CompressionMethod::from_u16(compression_method),
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        zip64: wide_u || wide_c || wide_o,
        is_directory,
    })
}
