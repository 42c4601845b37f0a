//! Central directory discovery against in-memory archives

mod common;

use common::{ARCHIVE_URL, MockTransport, ZipBuilder, fetcher};
use zipget::zip::CompressionMethod;
use zipget::{ArchiveHandle, CentralDirectoryLocator, ErrorKind};

fn handle(archive: &[u8]) -> ArchiveHandle {
    ArchiveHandle::new("archive.zip", ARCHIVE_URL, archive.len() as u64)
}

#[tokio::test]
async fn test_n_entries_in_two_requests() {
    let mut builder = ZipBuilder::new();
    for i in 0..50 {
        let body = format!("entry number {i}\n").repeat(i + 1);
        builder = if i % 2 == 0 {
            builder.stored(&format!("dir/file{i:02}.txt"), body.as_bytes())
        } else {
            builder.deflated(&format!("dir/file{i:02}.txt"), body.as_bytes())
        };
    }
    let archive = builder.build();
    let fetcher = fetcher(MockTransport::single(archive.clone()));

    let directory = CentralDirectoryLocator::new(fetcher.clone())
        .locate(&handle(&archive))
        .await
        .unwrap();

    assert_eq!(fetcher.transport().calls(), 2);
    assert!(!directory.zip64);
    assert_eq!(directory.entries.len(), 50);
    for (i, entry) in directory.entries.iter().enumerate() {
        let body = format!("entry number {i}\n").repeat(i + 1);
        assert_eq!(entry.file_name, format!("dir/file{i:02}.txt"));
        assert_eq!(entry.uncompressed_size, body.len() as u64);
        assert_eq!(entry.crc32, crc32fast::hash(body.as_bytes()));
        let method = if i % 2 == 0 {
            CompressionMethod::Stored
        } else {
            CompressionMethod::Deflate
        };
        assert_eq!(entry.compression_method, method);
    }
}

#[tokio::test]
async fn test_zip64_needs_one_extra_request() {
    let archive = ZipBuilder::new()
        .zip64()
        .stored("big/a.bin", &[1u8; 1000])
        .deflated("big/b.bin", &[2u8; 5000])
        .build();
    let fetcher = fetcher(MockTransport::single(archive.clone()));

    let directory = CentralDirectoryLocator::new(fetcher.clone())
        .locate(&handle(&archive))
        .await
        .unwrap();

    assert_eq!(fetcher.transport().calls(), 3);
    assert!(directory.zip64);
    assert_eq!(directory.entries.len(), 2);
    assert!(directory.entries.iter().all(|e| e.zip64));
    assert_eq!(directory.entries[0].uncompressed_size, 1000);
    assert_eq!(directory.entries[0].compressed_size, 1000);
    assert_eq!(directory.entries[0].lfh_offset, 0);
    assert_eq!(directory.entries[1].uncompressed_size, 5000);
}

#[tokio::test]
async fn test_empty_archive_skips_directory_fetch() {
    let archive = ZipBuilder::new().build();
    assert_eq!(archive.len(), 22);
    let fetcher = fetcher(MockTransport::single(archive.clone()));

    let directory = CentralDirectoryLocator::new(fetcher.clone())
        .locate(&handle(&archive))
        .await
        .unwrap();

    assert!(directory.entries.is_empty());
    assert_eq!(fetcher.transport().calls(), 1);
}

#[tokio::test]
async fn test_comment_with_fake_signature() {
    let mut comment = b"see PK\x05\x06".to_vec();
    comment.extend_from_slice(&[b'x'; 40]);
    let archive = ZipBuilder::new()
        .stored("a.txt", b"alpha")
        .comment(&comment)
        .build();
    let fetcher = fetcher(MockTransport::single(archive.clone()));

    let directory = CentralDirectoryLocator::new(fetcher)
        .locate(&handle(&archive))
        .await
        .unwrap();
    assert_eq!(directory.entries.len(), 1);
    assert_eq!(directory.entries[0].file_name, "a.txt");
}

#[tokio::test]
async fn test_large_archive_reads_only_the_tail() {
    let payload = vec![7u8; 300 * 1024];
    let archive = ZipBuilder::new()
        .stored("huge.bin", &payload)
        .stored("small.txt", b"tiny")
        .build();
    let fetcher = fetcher(MockTransport::single(archive.clone()));

    CentralDirectoryLocator::new(fetcher.clone())
        .locate(&handle(&archive))
        .await
        .unwrap();

    let ranges = fetcher.transport().ranges();
    assert_eq!(ranges.len(), 2);
    assert!(ranges[0].0 > 0);
    assert_eq!(ranges[0].1, archive.len() as u64 - 1);
    let fetched: u64 = ranges.iter().map(|(s, e)| e - s + 1).sum();
    assert!(fetched < 200 * 1024);
}

#[tokio::test]
async fn test_backslash_names_are_normalized() {
    let archive = ZipBuilder::new().stored("dir\\file.txt", b"x").build();
    let fetcher = fetcher(MockTransport::single(archive.clone()));

    let directory = CentralDirectoryLocator::new(fetcher)
        .locate(&handle(&archive))
        .await
        .unwrap();
    assert_eq!(directory.entries[0].file_name, "dir/file.txt");
}

#[tokio::test]
async fn test_probed_handle() {
    let archive = ZipBuilder::new().stored("a.txt", b"alpha").build();
    let fetcher = fetcher(MockTransport::single(archive.clone()));

    let handle = ArchiveHandle::probe(&fetcher, "archive.zip", ARCHIVE_URL)
        .await
        .unwrap();
    assert_eq!(handle.length(), archive.len() as u64);
    assert_eq!(fetcher.transport().probes(), 1);
}

#[tokio::test]
async fn test_malformed_archives() {
    // No EOCD at all
    let garbage: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 251) as u8).collect();
    let fetcher = fetcher(MockTransport::single(garbage.clone()));
    let err = CentralDirectoryLocator::new(fetcher.clone())
        .locate(&handle(&garbage))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedArchive);
    assert_eq!(fetcher.transport().calls(), 1);

    // Too short to hold an EOCD: rejected before any request
    let tiny = vec![0u8; 10];
    let fetcher = common::fetcher(MockTransport::single(tiny.clone()));
    let err = CentralDirectoryLocator::new(fetcher.clone())
        .locate(&handle(&tiny))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedArchive);
    assert_eq!(fetcher.transport().calls(), 0);
}

#[tokio::test]
async fn test_declared_count_mismatch() {
    let mut archive = ZipBuilder::new()
        .stored("a.txt", b"alpha")
        .stored("b.txt", b"beta")
        .build();
    // Bump both entry counts of the EOCD
    let eocd = archive.len() - 22;
    archive[eocd + 8] = 3;
    archive[eocd + 10] = 3;
    let fetcher = fetcher(MockTransport::single(archive.clone()));

    let err = CentralDirectoryLocator::new(fetcher)
        .locate(&handle(&archive))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedArchive);
}

#[tokio::test]
async fn test_directory_offset_out_of_range() {
    let mut archive = ZipBuilder::new().stored("a.txt", b"alpha").build();
    let eocd = archive.len() - 22;
    archive[eocd + 16..eocd + 20].copy_from_slice(&0x00FF_FFFFu32.to_le_bytes());
    let fetcher = fetcher(MockTransport::single(archive.clone()));

    let err = CentralDirectoryLocator::new(fetcher.clone())
        .locate(&handle(&archive))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedArchive);
    assert_eq!(fetcher.transport().calls(), 1);
}

#[tokio::test]
async fn test_entry_count_sentinel_needs_zip64_records() {
    let mut archive = ZipBuilder::new().stored("a.txt", b"alpha").build();
    let eocd = archive.len() - 22;
    archive[eocd + 8..eocd + 12].fill(0xFF);
    let fetcher = fetcher(MockTransport::single(archive.clone()));

    let err = CentralDirectoryLocator::new(fetcher.clone())
        .locate(&handle(&archive))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedArchive);
    assert!(err.to_string().contains("ZIP64"), "{err}");
    assert_eq!(fetcher.transport().calls(), 1);
}
