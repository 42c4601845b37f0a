//! Safe destination handling for extracted entries.
//!
//! Entry names come from untrusted archives. Every name is normalized and
//! confined to the destination root before anything touches the disk, and
//! data is written to a temporary file that only replaces the destination
//! once the caller commits it.

use std::path::{Component, Path, PathBuf};
use tempfile::TempPath;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task;

use crate::{Error, Result};

/// Turn an archive entry name into a relative path that stays inside the
/// destination root.
///
/// `\` is treated as a separator, `.` and empty components are dropped and
/// `..` removes the previous component. Absolute names, drive prefixes,
/// NUL bytes and names that climb above the root are rejected.
///
/// ```
/// use std::path::PathBuf;
/// use zipget::normalize_entry_path;
///
/// assert_eq!(normalize_entry_path("a/./b/../c.txt").unwrap(), PathBuf::from("a/c.txt"));
/// assert!(normalize_entry_path("../../etc/passwd").is_err());
/// assert!(normalize_entry_path("/etc/passwd").is_err());
/// ```
pub fn normalize_entry_path(name: &str) -> Result<PathBuf> {
    let unsafe_path = || Error::UnsafePath(name.to_string());

    if name.contains('\0') {
        return Err(unsafe_path());
    }
    let name = name.replace('\\', "/");
    let bytes = name.as_bytes();
    if name.starts_with('/') || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':') {
        return Err(unsafe_path());
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in name.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop().ok_or_else(unsafe_path)?;
            }
            part => parts.push(part),
        }
    }
    if parts.is_empty() {
        return Err(unsafe_path());
    }

    let path: PathBuf = parts.iter().collect();
    // Catch anything the platform parses differently, e.g. `C:` inside a component
    if !path.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(unsafe_path());
    }
    Ok(path)
}

/// Writes extracted entries under a fixed root directory.
#[derive(Debug, Clone)]
pub struct SafeSink {
    root: PathBuf,
}

impl SafeSink {
    /// Use `root` as destination, creating it if needed.
    ///
    /// Blocking; call it before extraction starts.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.canonicalize()?,
        })
    }

    /// Destination path of `name`, without touching the filesystem.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        Ok(self.root.join(normalize_entry_path(name)?))
    }

    /// Open a temporary file that becomes `name` on [`PendingFile::commit`].
    ///
    /// Intermediate directories are created. The directory the file lands
    /// in must still be inside the root once symlinks are resolved.
    pub async fn create(&self, name: &str) -> Result<PendingFile> {
        let dest = self.resolve(name)?;
        let (Some(parent), Some(file_name)) = (dest.parent(), dest.file_name()) else {
            return Err(Error::UnsafePath(name.to_string()));
        };

        fs::create_dir_all(parent).await?;
        let parent = fs::canonicalize(parent).await?;
        if !parent.starts_with(&self.root) {
            return Err(Error::UnsafePath(name.to_string()));
        }
        let dest = parent.join(file_name);

        let temp = task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(".zipget-")
                .suffix(".part")
                .tempfile_in(parent)
        })
        .await
        .map_err(join_error)??;
        let (file, temp) = temp.into_parts();

        Ok(PendingFile {
            file: File::from_std(file),
            temp,
            dest,
            written: 0,
        })
    }
}

/// A destination file being written.
///
/// Dropping it without calling [`commit`](Self::commit) deletes the
/// temporary file and leaves the destination untouched.
#[derive(Debug)]
pub struct PendingFile {
    file: File,
    temp: TempPath,
    dest: PathBuf,
    written: u64,
}

impl PendingFile {
    pub async fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.file.write_all(buf).await?;
        self.written += buf.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush, sync and atomically move the file into place.
    pub async fn commit(self) -> Result<PathBuf> {
        let Self {
            mut file,
            temp,
            dest,
            ..
        } = self;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        task::spawn_blocking(move || temp.persist(&dest).map(|()| dest))
            .await
            .map_err(join_error)?
            .map_err(|e| Error::Io(e.error))
    }
}

fn join_error(e: task::JoinError) -> Error {
    Error::Io(std::io::Error::other(e))
}

/// CRC32 of a file on disk.
pub async fn file_crc32(path: &Path) -> Result<u32> {
    let mut file = File::open(path).await?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Whether `path` is a regular file with exactly this size and CRC32.
pub(crate) async fn is_verified_copy(path: &Path, len: u64, crc32: u32) -> Result<bool> {
    let meta = match fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if !meta.is_file() || meta.len() != len {
        return Ok(false);
    }
    Ok(file_crc32(path).await? == crc32)
}
