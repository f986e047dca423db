//! Result payload encoding: JSON, optionally zstd-compressed.

use crate::model::TaskLists;
use anyhow::{Context, Result};
use std::io::Read;

/// zstd frame magic number, little endian.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
const ZSTD_LEVEL: i32 = 3;

pub fn encode(lists: &TaskLists, compress: bool) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(lists).context("serialize task lists")?;
    if !compress {
        return Ok(json);
    }
    zstd::stream::encode_all(json.as_slice(), ZSTD_LEVEL).context("compress task lists")
}

/// Accepts both compressed and plain JSON payloads.
pub fn decode(bytes: &[u8]) -> Result<TaskLists> {
    if bytes.starts_with(&ZSTD_MAGIC) {
        let mut json = Vec::new();
        zstd::stream::read::Decoder::new(bytes)
            .context("open zstd payload")?
            .read_to_end(&mut json)
            .context("decompress task lists")?;
        return serde_json::from_slice(&json).context("parse task lists");
    }
    serde_json::from_slice(bytes).context("parse task lists")
}
