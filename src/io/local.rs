use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{RangeResponse, RangeTransport, ResourceInfo};
use crate::Result;

/// Serves range requests from the local filesystem.
///
/// URLs are plain paths or `file://` URLs. Responses mimic a well-behaved
/// HTTP server: `206` for satisfiable ranges, `416` otherwise and `404` for
/// missing files.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

fn local_path(url: &str) -> &Path {
    Path::new(url.strip_prefix("file://").unwrap_or(url))
}

async fn open(url: &str) -> Result<Option<(File, u64)>> {
    match File::open(local_path(url)).await {
        Ok(file) => {
            let size = file.metadata().await?.len();
            Ok(Some((file, size)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl RangeTransport for LocalTransport {
    async fn get_range(&self, url: &str, start: u64, end: u64) -> Result<RangeResponse> {
        let Some((mut file, size)) = open(url).await? else {
            return Ok(RangeResponse {
                status: 404,
                body: Bytes::new(),
            });
        };

        if start > end || end >= size {
            return Ok(RangeResponse {
                status: 416,
                body: Bytes::new(),
            });
        }

        let mut buf = vec![0u8; (end - start + 1) as usize];
        file.seek(SeekFrom::Start(start)).await?;
        file.read_exact(&mut buf).await?;

        Ok(RangeResponse {
            status: 206,
            body: Bytes::from(buf),
        })
    }

    async fn probe(&self, url: &str) -> Result<ResourceInfo> {
        Ok(match open(url).await? {
            Some((_, size)) => ResourceInfo {
                status: 200,
                length: Some(size),
                accepts_ranges: true,
            },
            None => ResourceInfo {
                status: 404,
                length: None,
                accepts_ranges: false,
            },
        })
    }
}
