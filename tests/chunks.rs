use std::sync::Arc;
use taskvault::{
    chunk_count, BackupService, ChunkError, ChunkStore, ExportOptions, FileStore, MemoryStore, RecordStore,
    DEFAULT_MAX_RECORD_BYTES,
};

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// A payload is stored as ceil(len/m) contiguous chunks and reads back byte for byte.
#[test]
fn chunks_round_trip() {
    let store = Arc::new(MemoryStore::new(1_000));
    let chunks = ChunkStore::new(store.clone(), 1_000, 100_000);
    for len in [1usize, 999, 1_000, 1_001, 25_000] {
        let data = payload(len);
        let n = chunks.write("owner", &data).unwrap();
        assert_eq!(n, chunk_count(len, 1_000));
        assert_eq!(n, len.div_ceil(1_000));
        assert_eq!(store.keys_with_prefix("chunks/owner/").unwrap().len(), n);
        assert_eq!(chunks.read("owner").unwrap(), data);
    }
}

/// A shorter second write leaves no stale chunks from the first.
#[test]
fn rewrite_replaces_every_chunk() {
    let store = Arc::new(MemoryStore::new(10));
    let chunks = ChunkStore::new(store.clone(), 10, 1_000);
    chunks.write("u", &payload(95)).unwrap();
    assert_eq!(store.keys_with_prefix("chunks/u/").unwrap().len(), 10);
    chunks.write("u", b"short").unwrap();
    assert_eq!(store.keys_with_prefix("chunks/u/").unwrap().len(), 1);
    assert_eq!(chunks.read("u").unwrap(), b"short");
}

/// Owners do not see each other's chunks, even when one key is a prefix of another.
#[test]
fn owners_are_isolated() {
    let store = Arc::new(MemoryStore::default());
    let chunks = ChunkStore::new(store, 4, 1_000);
    chunks.write("a", b"aaaaaaaa").unwrap();
    chunks.write("ab", b"bb").unwrap();
    assert_eq!(chunks.read("a").unwrap(), b"aaaaaaaa");
    assert_eq!(chunks.read("ab").unwrap(), b"bb");
    assert_eq!(chunks.delete("a").unwrap(), 2);
    assert!(matches!(chunks.read("a"), Err(ChunkError::NotFound { .. })));
}

/// An empty payload stores nothing and therefore reads back as not found.
#[test]
fn empty_payload_writes_no_chunks() {
    let chunks = ChunkStore::new(Arc::new(MemoryStore::default()), 10, 100);
    assert_eq!(chunks.write("u", b"").unwrap(), 0);
    assert!(matches!(chunks.read("u"), Err(ChunkError::NotFound { .. })));
}

/// Oversized payloads fail with a capacity error, and the old chunks are gone.
#[test]
fn payload_over_the_footprint_is_rejected() {
    let store = Arc::new(MemoryStore::default());
    let chunks = ChunkStore::new(store.clone(), 10, 50);
    chunks.write("u", b"old data").unwrap();
    let err = chunks.write("u", &payload(51)).unwrap_err();
    assert!(matches!(err, ChunkError::PayloadTooLarge { size: 51, limit: 50 }));
    assert!(store.keys_with_prefix("chunks/u/").unwrap().is_empty());
}

/// Chunk size is capped by the store's record limit.
#[test]
fn chunk_size_never_exceeds_record_limit() {
    let store = Arc::new(MemoryStore::new(8));
    let chunks = ChunkStore::new(store.clone(), 1_000, 1_000);
    assert_eq!(chunks.max_chunk_bytes(), 8);
    assert_eq!(chunks.write("u", &payload(20)).unwrap(), 3);
}

/// A missing middle chunk is reported as corruption.
#[test]
fn gap_in_indices_is_corrupt() {
    let store = Arc::new(MemoryStore::new(4));
    let chunks = ChunkStore::new(store.clone(), 4, 1_000);
    chunks.write("u", &payload(12)).unwrap();
    assert!(store.delete("chunks/u/00000001").unwrap());
    assert!(matches!(chunks.read("u"), Err(ChunkError::Corrupt { .. })));
}

/// The directory-backed store round-trips chunks through real files, with
/// percent-encoded owner keys.
#[test]
fn file_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(dir.path(), 64).unwrap());
    let chunks = ChunkStore::new(store.clone(), 64, 10_000);
    let data = payload(1_000);
    assert_eq!(chunks.write("bob@example.com", &data).unwrap(), 16);
    assert_eq!(chunks.read("bob@example.com").unwrap(), data);

    // Reopen: records persist.
    drop(chunks);
    let reopened = Arc::new(FileStore::open(dir.path(), 64).unwrap());
    let chunks = ChunkStore::new(reopened.clone(), 64, 10_000);
    assert_eq!(chunks.read("bob@example.com").unwrap(), data);

    chunks.write("bob@example.com", b"tiny").unwrap();
    assert_eq!(reopened.keys_with_prefix("chunks/").unwrap(), vec!["chunks/bob%40example.com/00000000"]);
    assert!(!reopened.delete("jobs/nobody").unwrap());
}

/// Stores opened from options fit a configured chunk size above the default
/// record cap, on disk and in memory; smaller sizes keep the default cap.
#[test]
fn opened_store_fits_configured_chunk_size() {
    let dir = tempfile::tempdir().unwrap();
    let options = ExportOptions::default().with_max_chunk_bytes(2_000_000).with_store_dir(dir.path());
    let service = BackupService::open(options).unwrap();
    assert_eq!(service.store().max_record_bytes(), 2_000_000);
    assert_eq!(service.chunk_bytes(), 2_000_000);

    let service = BackupService::open(ExportOptions::default().with_max_chunk_bytes(1_500_000)).unwrap();
    assert_eq!(service.chunk_bytes(), 1_500_000);

    let service = BackupService::open(ExportOptions::default().with_max_chunk_bytes(4_096)).unwrap();
    assert_eq!(service.store().max_record_bytes(), DEFAULT_MAX_RECORD_BYTES);
    assert_eq!(service.chunk_bytes(), 4_096);
}
