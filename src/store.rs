//! Key-value record stores with a per-record size cap.
//!
//! Keys are `/`-separated paths (e.g. `jobs/alice%40example.com`). Both stores
//! reject records larger than `max_record_bytes`.

use crate::util::{read_with_backoff, remove_with_backoff, write_file_synced};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

/// Default single-record cap, just under 1 MiB to leave room for store overhead.
pub const DEFAULT_MAX_RECORD_BYTES: usize = 1_000_000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {key} is {size} bytes, over the {limit} byte record limit")]
    RecordTooLarge { key: String, size: usize, limit: usize },

    #[error("record {key} was modified concurrently (expected revision {expected}, found {found})")]
    Conflict { key: String, expected: u64, found: u64 },

    #[error("invalid record key {0:?}")]
    InvalidKey(String),

    #[error("record {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

pub trait RecordStore: Send + Sync {
    fn max_record_bytes(&self) -> usize;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    /// `Ok(false)` if there was nothing to delete.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;
    /// All keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
    fn max_record_bytes(&self) -> usize { (**self).max_record_bytes() }
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> { (**self).put(key, value) }
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> { (**self).get(key) }
    fn delete(&self, key: &str) -> Result<bool, StoreError> { (**self).delete(key) }
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> { (**self).keys_with_prefix(prefix) }
}

fn check_size(key: &str, value: &[u8], limit: usize) -> Result<(), StoreError> {
    if value.len() > limit {
        return Err(StoreError::RecordTooLarge { key: key.to_string(), size: value.len(), limit });
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    let bad = key.is_empty()
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

// ----------------- in-process store -----------------

#[derive(Debug)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, Vec<u8>>>,
    max_record_bytes: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORD_BYTES)
    }
}

impl MemoryStore {
    pub fn new(max_record_bytes: usize) -> Self {
        Self { records: Mutex::new(BTreeMap::new()), max_record_bytes: max_record_bytes.max(1) }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl RecordStore for MemoryStore {
    fn max_record_bytes(&self) -> usize {
        self.max_record_bytes
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        check_size(key, value, self.max_record_bytes)?;
        self.records.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.records.lock().remove(key).is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let guard = self.records.lock();
        Ok(guard
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

// ----------------- directory-backed store -----------------

/// One file per record under `<root>/records/`, each key segment percent-encoded.
/// Writes are staged under `<root>/staging/` and renamed into place after fsync.
#[derive(Debug)]
pub struct FileStore {
    records_dir: PathBuf,
    staging_dir: PathBuf,
    max_record_bytes: usize,
    seq: AtomicU64,
}

impl FileStore {
    pub fn open(root: impl AsRef<Path>, max_record_bytes: usize) -> Result<Self, StoreError> {
        let root = root.as_ref();
        let records_dir = root.join("records");
        let staging_dir = root.join("staging");
        for dir in [&records_dir, &staging_dir] {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                key: dir.display().to_string(),
                source,
            })?;
        }
        Ok(Self { records_dir, staging_dir, max_record_bytes: max_record_bytes.max(1), seq: AtomicU64::new(0) })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        let mut p = self.records_dir.clone();
        for seg in key.split('/') {
            p.push(urlencoding::encode(seg).as_ref());
        }
        Ok(p)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.records_dir).ok()?;
        let segs: Option<Vec<String>> = rel
            .components()
            .map(|c| {
                let s = c.as_os_str().to_str()?;
                urlencoding::decode(s).ok().map(|d| d.into_owned())
            })
            .collect();
        Some(segs?.join("/"))
    }

    fn io_err(key: &str) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io { key: key.to_string(), source }
    }
}

impl RecordStore for FileStore {
    fn max_record_bytes(&self) -> usize {
        self.max_record_bytes
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let dest = self.path_for(key)?;
        check_size(key, value, self.max_record_bytes)?;
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self.staging_dir.join(format!("{}-{n}.tmp", std::process::id()));
        write_file_synced(&tmp, &dest, value).map_err(Self::io_err(key))
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        read_with_backoff(&path, 10, 20).map_err(Self::io_err(key))
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        remove_with_backoff(&path, 10, 20).map_err(Self::io_err(key))
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.records_dir).min_depth(1) {
            let entry = entry.map_err(|e| StoreError::Io {
                key: prefix.to_string(),
                source: e.into_io_error().unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walk failed")),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            match self.key_for(entry.path()) {
                Some(k) if k.starts_with(prefix) => keys.push(k),
                Some(_) => {}
                None => tracing::warn!("skipping undecodable record path {}", entry.path().display()),
            }
        }
        keys.sort();
        Ok(keys)
    }
}
