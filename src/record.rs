//! Resolving a record identifier to the archives it contains.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::downloader::ArchiveSource;
use crate::{Error, Result};

const ZENODO_API: &str = "https://zenodo.org/api/records";
const ZENODO_DOI_PREFIX: &str = "10.5281/zenodo.";

/// Lists the downloadable files of a record.
#[async_trait]
pub trait RecordResolver: Send + Sync {
    async fn resolve(&self, record: &str) -> Result<Vec<ArchiveSource>>;
}

/// Extract the numeric record id from a bare id, a record URL or a DOI.
///
/// ```
/// use zipget::record::parse_record_id;
///
/// assert_eq!(parse_record_id("5423457").unwrap(), "5423457");
/// assert_eq!(parse_record_id("https://zenodo.org/records/5423457").unwrap(), "5423457");
/// assert_eq!(parse_record_id("doi:10.5281/zenodo.5423457").unwrap(), "5423457");
/// assert!(parse_record_id("10.1000/xyz").is_err());
/// ```
pub fn parse_record_id(input: &str) -> Result<String> {
    let trimmed = input.trim().trim_end_matches('/');
    let leading_digits = |s: &str| -> Option<String> {
        let digits: String = s.chars().take_while(char::is_ascii_digit).collect();
        (!digits.is_empty()).then_some(digits)
    };

    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(trimmed.to_string());
    }

    let host_path = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"));
    if let Some(path) = host_path {
        let id = path
            .strip_prefix("zenodo.org/records/")
            .or_else(|| path.strip_prefix("zenodo.org/record/"))
            .and_then(leading_digits);
        if let Some(id) = id {
            return Ok(id);
        }
    }

    trimmed
        .find(ZENODO_DOI_PREFIX)
        .and_then(|pos| leading_digits(&trimmed[pos + ZENODO_DOI_PREFIX.len()..]))
        .ok_or_else(|| Error::InvalidRecord(input.to_string()))
}

#[derive(Debug, Deserialize)]
struct RecordMetadata {
    #[serde(default)]
    files: Vec<RecordFile>,
}

#[derive(Debug, Deserialize)]
struct RecordFile {
    key: String,
    #[serde(default)]
    size: Option<u64>,
    links: FileLinks,
}

#[derive(Debug, Deserialize)]
struct FileLinks {
    #[serde(rename = "self")]
    download: String,
}

/// Parse a Zenodo records API response into archive sources.
pub fn parse_record_metadata(json: &str) -> Result<Vec<ArchiveSource>> {
    let metadata: RecordMetadata = serde_json::from_str(json)
        .map_err(|e| Error::Record(format!("invalid record metadata: {}", e)))?;
    Ok(metadata
        .files
        .into_iter()
        .map(|f| ArchiveSource::new(f.key, f.links.download, f.size))
        .collect())
}

/// Resolves records through the Zenodo REST API.
pub struct ZenodoResolver {
    client: Client,
    api_base: String,
    timeout: Duration,
}

impl ZenodoResolver {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            api_base: ZENODO_API.to_string(),
            timeout,
        }
    }

    /// Query a different API root, e.g. a sandbox instance.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn api_url(&self, id: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), id)
    }
}

#[async_trait]
impl RecordResolver for ZenodoResolver {
    async fn resolve(&self, record: &str) -> Result<Vec<ArchiveSource>> {
        let id = parse_record_id(record)?;
        let url = self.api_url(&id);
        debug!(record = %id, url = %url, "fetching record metadata");

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Record(format!("failed to fetch {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(Error::Record(format!(
                "{} answered with status {}",
                url,
                response.status().as_u16()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| Error::Record(format!("failed to read {}: {}", url, e)))?;

        parse_record_metadata(&body)
    }
}
