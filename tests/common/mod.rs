//! Shared fixtures: an in-memory ZIP writer and a scripted range transport.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use zipget::io::{RangeResponse, ResourceInfo};
use zipget::{Error, RangeFetcher, RangeTransport, Result, RetryPolicy};

pub const ARCHIVE_URL: &str = "mock://archive.zip";

/// One file to put into a test archive.
#[derive(Debug, Clone)]
pub struct TestEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub method: u16,
    /// Recorded CRC32; defaults to the real one.
    pub crc32: Option<u32>,
    pub flags: u16,
}

impl TestEntry {
    pub fn stored(name: &str, data: &[u8]) -> Self {
        Self {
            name: name.to_string(),
            data: data.to_vec(),
            method: 0,
            crc32: None,
            flags: 0,
        }
    }

    pub fn deflated(name: &str, data: &[u8]) -> Self {
        Self {
            method: 8,
            ..Self::stored(name, data)
        }
    }

    /// Store the data as-is but record `method` in the headers.
    pub fn with_method(mut self, method: u16) -> Self {
        self.method = method;
        self
    }

    pub fn with_crc32(mut self, crc32: u32) -> Self {
        self.crc32 = Some(crc32);
        self
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    fn payload(&self) -> Vec<u8> {
        if self.method == 8 {
            let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
            enc.write_all(&self.data).unwrap();
            enc.finish().unwrap()
        } else {
            self.data.clone()
        }
    }

    fn crc(&self) -> u32 {
        self.crc32.unwrap_or_else(|| crc32fast::hash(&self.data))
    }
}

/// Where an entry ended up inside a built archive.
#[derive(Debug, Clone, Copy)]
pub struct EntryLayout {
    pub lfh_offset: u64,
    pub data_offset: u64,
    pub compressed_len: u64,
}

/// Writes minimal but valid ZIP archives byte by byte.
#[derive(Debug, Clone, Default)]
pub struct ZipBuilder {
    entries: Vec<TestEntry>,
    zip64: bool,
    comment: Vec<u8>,
}

fn put16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(mut self, entry: TestEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.entry(TestEntry::stored(name, data))
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        self.entry(TestEntry::deflated(name, data))
    }

    /// Write ZIP64 records and extra fields, with sentinels in every
    /// 32-bit size and offset field.
    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.build_with_layout().0
    }

    pub fn build_with_layout(&self) -> (Vec<u8>, Vec<EntryLayout>) {
        let mut out = Vec::new();
        let mut central = Vec::new();
        let mut layout = Vec::new();
        let version = if self.zip64 { 45 } else { 20 };

        for entry in &self.entries {
            let payload = entry.payload();
            let crc = entry.crc();
            let lfh_offset = out.len() as u64;

            // Local file header
            let mut local_extra = Vec::new();
            if self.zip64 {
                put16(&mut local_extra, 0x0001);
                put16(&mut local_extra, 16);
                put64(&mut local_extra, entry.data.len() as u64);
                put64(&mut local_extra, payload.len() as u64);
            }
            let (csize32, usize32) = if self.zip64 {
                (u32::MAX, u32::MAX)
            } else {
                (payload.len() as u32, entry.data.len() as u32)
            };
            out.extend_from_slice(b"PK\x03\x04");
            put16(&mut out, version);
            put16(&mut out, entry.flags);
            put16(&mut out, entry.method);
            put16(&mut out, 0); // time
            put16(&mut out, 0x0021); // 1980-01-01
            put32(&mut out, crc);
            put32(&mut out, csize32);
            put32(&mut out, usize32);
            put16(&mut out, entry.name.len() as u16);
            put16(&mut out, local_extra.len() as u16);
            out.extend_from_slice(entry.name.as_bytes());
            out.extend_from_slice(&local_extra);
            let data_offset = out.len() as u64;
            out.extend_from_slice(&payload);

            layout.push(EntryLayout {
                lfh_offset,
                data_offset,
                compressed_len: payload.len() as u64,
            });

            // Central directory header
            let mut central_extra = Vec::new();
            let offset32 = if self.zip64 {
                put16(&mut central_extra, 0x0001);
                put16(&mut central_extra, 24);
                put64(&mut central_extra, entry.data.len() as u64);
                put64(&mut central_extra, payload.len() as u64);
                put64(&mut central_extra, lfh_offset);
                u32::MAX
            } else {
                lfh_offset as u32
            };
            central.extend_from_slice(b"PK\x01\x02");
            put16(&mut central, 0x031E);
            put16(&mut central, version);
            put16(&mut central, entry.flags);
            put16(&mut central, entry.method);
            put16(&mut central, 0);
            put16(&mut central, 0x0021);
            put32(&mut central, crc);
            put32(&mut central, csize32);
            put32(&mut central, usize32);
            put16(&mut central, entry.name.len() as u16);
            put16(&mut central, central_extra.len() as u16);
            put16(&mut central, 0); // comment
            put16(&mut central, 0); // disk
            put16(&mut central, 0); // internal attrs
            put32(&mut central, 0); // external attrs
            put32(&mut central, offset32);
            central.extend_from_slice(entry.name.as_bytes());
            central.extend_from_slice(&central_extra);
        }

        let cd_offset = out.len() as u64;
        let cd_size = central.len() as u64;
        let count = self.entries.len() as u64;
        out.extend_from_slice(&central);

        if self.zip64 {
            let eocd64_offset = out.len() as u64;
            out.extend_from_slice(b"PK\x06\x06");
            put64(&mut out, 44);
            put16(&mut out, 45);
            put16(&mut out, 45);
            put32(&mut out, 0);
            put32(&mut out, 0);
            put64(&mut out, count);
            put64(&mut out, count);
            put64(&mut out, cd_size);
            put64(&mut out, cd_offset);

            out.extend_from_slice(b"PK\x06\x07");
            put32(&mut out, 0);
            put64(&mut out, eocd64_offset);
            put32(&mut out, 1);
        }

        out.extend_from_slice(b"PK\x05\x06");
        put16(&mut out, 0);
        put16(&mut out, 0);
        if self.zip64 {
            put16(&mut out, u16::MAX);
            put16(&mut out, u16::MAX);
            put32(&mut out, u32::MAX);
            put32(&mut out, u32::MAX);
        } else {
            put16(&mut out, count as u16);
            put16(&mut out, count as u16);
            put32(&mut out, cd_size as u32);
            put32(&mut out, cd_offset as u32);
        }
        put16(&mut out, self.comment.len() as u16);
        out.extend_from_slice(&self.comment);

        (out, layout)
    }
}

/// A misbehavior the transport performs on one upcoming request.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Never answer; the fetcher's timeout has to fire.
    Hang,
    /// Answer with this status and an empty body.
    Status(u16),
    /// Ignore the range and answer 200 with the whole resource.
    FullBody,
    /// Answer 206 with one byte missing.
    Short,
    /// Fail at the connection level.
    Reset,
}

/// In-memory range transport with call accounting and scripted faults.
#[derive(Default)]
pub struct MockTransport {
    resources: HashMap<String, Bytes>,
    calls: AtomicUsize,
    probes: AtomicUsize,
    requests: Mutex<Vec<(String, u64, u64)>>,
    faults: Mutex<VecDeque<Fault>>,
    flips: Mutex<Vec<u64>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Counts a request as in flight until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport serving a single archive at [`ARCHIVE_URL`].
    pub fn single(archive: Vec<u8>) -> Self {
        Self::new().with_resource(ARCHIVE_URL, archive)
    }

    pub fn with_resource(mut self, url: &str, data: Vec<u8>) -> Self {
        self.resources.insert(url.to_string(), Bytes::from(data));
        self
    }

    /// Delay every range response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Apply `faults` to the next requests, one per request.
    pub fn push_faults(&self, faults: impl IntoIterator<Item = Fault>) {
        self.faults.lock().unwrap().extend(faults);
    }

    /// Invert the byte at `offset` in the next response that contains it.
    pub fn corrupt_once(&self, offset: u64) {
        self.flips.lock().unwrap().push(offset);
    }

    /// Number of range requests received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Range requests received for `url`.
    pub fn calls_for(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _, _)| u == url)
            .count()
    }

    /// Most range requests that were ever running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Every requested `(start, end)` in arrival order.
    pub fn ranges(&self) -> Vec<(u64, u64)> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, s, e)| (*s, *e))
            .collect()
    }
}

#[async_trait]
impl RangeTransport for MockTransport {
    async fn get_range(&self, url: &str, start: u64, end: u64) -> Result<RangeResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), start, end));

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let Some(data) = self.resources.get(url) else {
            return Ok(RangeResponse {
                status: 404,
                body: Bytes::new(),
            });
        };

        let fault = self.faults.lock().unwrap().pop_front();
        match fault {
            Some(Fault::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                unreachable!("the fetcher times out first")
            }
            Some(Fault::Status(status)) => {
                return Ok(RangeResponse {
                    status,
                    body: Bytes::new(),
                });
            }
            Some(Fault::FullBody) => {
                return Ok(RangeResponse {
                    status: 200,
                    body: data.clone(),
                });
            }
            Some(Fault::Reset) => {
                return Err(Error::TransientNetwork("connection reset".to_string()));
            }
            Some(Fault::Short) | None => {}
        }

        if start >= data.len() as u64 {
            return Ok(RangeResponse {
                status: 416,
                body: Bytes::new(),
            });
        }
        let last = end.min(data.len() as u64 - 1);
        let mut body = data[start as usize..=last as usize].to_vec();
        if matches!(fault, Some(Fault::Short)) {
            body.pop();
        }

        let mut flips = self.flips.lock().unwrap();
        flips.retain(|&offset| {
            let hit = offset >= start && offset <= last && ((offset - start) as usize) < body.len();
            if hit {
                body[(offset - start) as usize] ^= 0xFF;
            }
            !hit
        });

        Ok(RangeResponse {
            status: 206,
            body: Bytes::from(body),
        })
    }

    async fn probe(&self, url: &str) -> Result<ResourceInfo> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(match self.resources.get(url) {
            Some(data) => ResourceInfo {
                status: 200,
                length: Some(data.len() as u64),
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

/// Quick retry schedule for tests that do not look at timing.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff_base: Duration::from_millis(1),
        max_backoff: Duration::from_millis(10),
    }
}

pub fn fetcher(transport: MockTransport) -> Arc<RangeFetcher<MockTransport>> {
    Arc::new(RangeFetcher::new(
        transport,
        fast_retry(),
        Duration::from_secs(5),
    ))
}
