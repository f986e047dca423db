//! Splits a payload into size-bounded records and stitches it back together.
//!
//! Chunk keys are `<namespace>/<owner>/<index:08>`, so a prefix scan returns them in
//! sequence order. A write deletes every existing chunk for the owner before writing
//! the new set: while a write is in flight (or after it fails) the owner has no
//! readable payload.

use crate::store::{RecordStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CHUNK_NAMESPACE: &str = "chunks";

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("no stored data for {owner}")]
    NotFound { owner: String },

    #[error("stored data for {owner} is corrupt: {detail}")]
    Corrupt { owner: String, detail: String },

    #[error("payload of {size} bytes exceeds the {limit} byte storage limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Number of chunks a payload of `len` bytes occupies.
#[inline]
pub fn chunk_count(len: usize, max_chunk_bytes: usize) -> usize {
    len.div_ceil(max_chunk_bytes.max(1))
}

/// Consecutive slices of at most `max_chunk_bytes`; empty input gives no slices.
pub fn split(payload: &[u8], max_chunk_bytes: usize) -> Vec<&[u8]> {
    payload.chunks(max_chunk_bytes.max(1)).collect()
}

/// Concatenate `(index, bytes)` pairs in index order, requiring indices `0..n`.
pub fn reassemble(owner: &str, mut parts: Vec<(usize, Vec<u8>)>) -> Result<Vec<u8>, ChunkError> {
    if parts.is_empty() {
        return Err(ChunkError::NotFound { owner: owner.to_string() });
    }
    parts.sort_by_key(|(i, _)| *i);
    for (expected, (found, _)) in parts.iter().enumerate() {
        if *found != expected {
            return Err(ChunkError::Corrupt {
                owner: owner.to_string(),
                detail: format!("expected chunk {expected}, found chunk {found}"),
            });
        }
    }
    let total: usize = parts.iter().map(|(_, b)| b.len()).sum();
    let mut out = Vec::with_capacity(total);
    for (_, bytes) in parts {
        out.extend_from_slice(&bytes);
    }
    Ok(out)
}

pub struct ChunkStore {
    store: Arc<dyn RecordStore>,
    max_chunk_bytes: usize,
    max_total_bytes: usize,
}

impl ChunkStore {
    /// `max_chunk_bytes` is further capped by the store's own record limit.
    pub fn new(store: Arc<dyn RecordStore>, max_chunk_bytes: usize, max_total_bytes: usize) -> Self {
        let record_limit = store.max_record_bytes().max(1);
        if max_chunk_bytes > record_limit {
            warn!("chunk size {max_chunk_bytes} is over the store's record limit; using {record_limit}");
        }
        let max_chunk_bytes = max_chunk_bytes.clamp(1, record_limit);
        Self { store, max_chunk_bytes, max_total_bytes }
    }

    pub fn max_chunk_bytes(&self) -> usize {
        self.max_chunk_bytes
    }

    fn prefix(owner: &str) -> String {
        format!("{CHUNK_NAMESPACE}/{}/", urlencoding::encode(owner))
    }

    fn key(owner: &str, idx: usize) -> String {
        format!("{}{idx:08}", Self::prefix(owner))
    }

    fn parse_index(key: &str) -> Option<usize> {
        key.rsplit('/').next()?.parse().ok()
    }

    /// Delete every chunk for `owner`; returns how many were removed.
    pub fn delete(&self, owner: &str) -> Result<usize, ChunkError> {
        let keys = self.store.keys_with_prefix(&Self::prefix(owner))?;
        let mut n = 0;
        for k in &keys {
            if self.store.delete(k)? {
                n += 1;
            }
        }
        Ok(n)
    }

    /// Replace the owner's payload. Returns the number of chunks written.
    pub fn write(&self, owner: &str, payload: &[u8]) -> Result<usize, ChunkError> {
        let removed = self.delete(owner)?;
        debug!("deleted {removed} old chunks for {owner}");

        if payload.len() > self.max_total_bytes {
            return Err(ChunkError::PayloadTooLarge { size: payload.len(), limit: self.max_total_bytes });
        }

        let parts = split(payload, self.max_chunk_bytes);
        info!(
            "storing {} bytes for {owner} in {} chunks of up to {} bytes",
            payload.len(),
            parts.len(),
            self.max_chunk_bytes
        );
        for (i, part) in parts.iter().enumerate() {
            if let Err(e) = self.store.put(&Self::key(owner, i), part) {
                // A partial set must not look like a payload.
                if let Err(cleanup) = self.delete(owner) {
                    warn!("could not remove partial chunks for {owner}: {cleanup}");
                }
                return Err(match e {
                    StoreError::RecordTooLarge { .. } => {
                        ChunkError::PayloadTooLarge { size: payload.len(), limit: self.max_total_bytes }
                    }
                    other => ChunkError::Store(other),
                });
            }
        }
        Ok(parts.len())
    }

    pub fn read(&self, owner: &str) -> Result<Vec<u8>, ChunkError> {
        let keys = self.store.keys_with_prefix(&Self::prefix(owner))?;
        let mut parts = Vec::with_capacity(keys.len());
        for k in keys {
            let Some(idx) = Self::parse_index(&k) else {
                return Err(ChunkError::Corrupt { owner: owner.to_string(), detail: format!("unexpected key {k}") });
            };
            match self.store.get(&k)? {
                Some(bytes) => parts.push((idx, bytes)),
                None => {
                    return Err(ChunkError::Corrupt {
                        owner: owner.to_string(),
                        detail: format!("chunk {idx} disappeared during read"),
                    })
                }
            }
        }
        let payload = reassemble(owner, parts)?;
        debug!("reassembled {} bytes for {owner}", payload.len());
        Ok(payload)
    }
}
