use crate::io::{RangeFetcher, RangeTransport};
use crate::Result;

/// One remote ZIP archive: where it lives and how long it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHandle {
    name: String,
    url: String,
    length: u64,
}

impl ArchiveHandle {
    /// Handle for an archive whose length is already known.
    pub fn new(name: impl Into<String>, url: impl Into<String>, length: u64) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            length,
        }
    }

    /// Handle whose length comes from probing the server.
    pub async fn probe<T: RangeTransport>(
        fetcher: &RangeFetcher<T>,
        name: impl Into<String>,
        url: impl Into<String>,
    ) -> Result<Self> {
        let url = url.into();
        let length = fetcher.probe_length(&url).await?;
        Ok(Self::new(name, url, length))
    }

    /// Display name, usually the file key in the record.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Total size of the archive in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }
}
