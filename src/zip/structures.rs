use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

use crate::{Error, Result};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// General purpose bit flags we act on.
pub mod flags {
    /// Entry is encrypted.
    pub const ENCRYPTED: u16 = 1 << 0;
    /// CRC32 and sizes follow the data in a data descriptor.
    pub const DATA_DESCRIPTOR: u16 = 1 << 3;
    /// File name and comment are UTF-8.
    pub const UTF8: u16 = 1 << 11;
}

/// Sentinel stored in 32-bit fields whose value lives in a Zip64 extra field.
pub const ZIP64_SENTINEL_32: u32 = 0xFFFF_FFFF;
/// Sentinel stored in 16-bit counters whose value lives in the Zip64 EOCD.
pub const ZIP64_SENTINEL_16: u16 = 0xFFFF;
/// Header ID of the Zip64 extended information extra field.
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, Copy)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;
    /// Maximum comment length the 16-bit field can declare.
    pub const MAX_COMMENT: usize = u16::MAX as usize;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::malformed("invalid End of Central Directory"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == ZIP64_SENTINEL_16
            || self.total_entries == ZIP64_SENTINEL_16
            || self.cd_size == ZIP64_SENTINEL_32
            || self.cd_offset == ZIP64_SENTINEL_32
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone, Copy)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::malformed("invalid ZIP64 end of central directory locator"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone, Copy)]
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::malformed("invalid ZIP64 end of central directory"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Fixed part of a Local File Header (LFH) - 30 bytes
#[derive(Debug, Clone, Copy)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_length: u16,
    pub extra_field_length: u16,
}

impl LocalFileHeader {
    pub const SIGNATURE: &'static [u8] = b"PK\x03\x04";
    pub const SIZE: usize = 30;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::malformed("invalid Local File Header"));
        }

        let mut cursor = Cursor::new(&data[4..]);
        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let _last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let _last_mod_date = cursor.read_u16::<LittleEndian>()?;

        Ok(Self {
            version_needed,
            flags,
            compression_method,
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
            file_name_length: cursor.read_u16::<LittleEndian>()?,
            extra_field_length: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Length of the header including its variable-length fields.
    pub fn total_len(&self) -> u64 {
        Self::SIZE as u64 + self.file_name_length as u64 + self.extra_field_length as u64
    }
}

/// Values carried by a Zip64 extended information extra field.
///
/// Each value is only present when the matching 32-bit header field holds
/// the 0xFFFFFFFF sentinel, in this fixed order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64ExtendedInfo {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub lfh_offset: Option<u64>,
}

impl Zip64ExtendedInfo {
    /// Find and decode the Zip64 field inside an extra-field block.
    ///
    /// Returns `None` when the block has no Zip64 field.
    pub fn parse(
        extra: &[u8],
        uncompressed_size: u32,
        compressed_size: u32,
        lfh_offset: Option<u32>,
    ) -> Result<Option<Self>> {
        let mut cursor = Cursor::new(extra);

        while extra.len() as u64 - cursor.position() >= 4 {
            let header_id = cursor.read_u16::<LittleEndian>()?;
            let field_size = cursor.read_u16::<LittleEndian>()? as u64;
            let body_start = cursor.position();
            if body_start + field_size > extra.len() as u64 {
                return Err(Error::malformed("extra field overruns its block"));
            }

            if header_id == ZIP64_EXTRA_ID {
                let body = &extra[body_start as usize..(body_start + field_size) as usize];
                let mut field = Cursor::new(body);
                let mut next = |wanted: bool| -> Result<Option<u64>> {
                    if !wanted {
                        return Ok(None);
                    }
                    field
                        .read_u64::<LittleEndian>()
                        .map(Some)
                        .map_err(|_| Error::malformed("truncated ZIP64 extra field"))
                };

                let info = Self {
                    uncompressed_size: next(uncompressed_size == ZIP64_SENTINEL_32)?,
                    compressed_size: next(compressed_size == ZIP64_SENTINEL_32)?,
                    lfh_offset: next(lfh_offset == Some(ZIP64_SENTINEL_32))?,
                };
                return Ok(Some(info));
            }

            cursor.set_position(body_start + field_size);
        }

        Ok(None)
    }
}

/// One entry of the archive's central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryEntry {
    /// Name exactly as stored in the archive.
    pub raw_name: Vec<u8>,
    /// Name decoded per the UTF-8 flag, with `\` normalized to `/`.
    pub file_name: String,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    /// Whether any size or offset was taken from a Zip64 extra field.
    pub zip64: bool,
    pub is_directory: bool,
}

impl CentralDirectoryEntry {
    pub fn is_encrypted(&self) -> bool {
        self.flags & flags::ENCRYPTED != 0
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & flags::DATA_DESCRIPTOR != 0
    }
}

/// Decode an entry name.
///
/// Names flagged UTF-8 are decoded lossily. Unflagged names are taken as
/// UTF-8 when valid (many tools write UTF-8 without setting the flag) and
/// as IBM code page 437 otherwise.
pub fn decode_name(raw: &[u8], flags: u16) -> String {
    let name = if flags & flags::UTF8 != 0 {
        String::from_utf8_lossy(raw).into_owned()
    } else {
        match std::str::from_utf8(raw) {
            Ok(s) => s.to_string(),
            Err(_) => raw.iter().map(|&b| cp437(b)).collect(),
        }
    };
    name.replace('\\', "/")
}

fn cp437(b: u8) -> char {
    const HIGH: [char; 128] = [
        'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', //
        'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', //
        'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', //
        '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', //
        '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', //
        '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', //
        'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', //
        '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}',
    ];
    if b < 0x80 {
        b as char
    } else {
        HIGH[(b - 0x80) as usize]
    }
}
