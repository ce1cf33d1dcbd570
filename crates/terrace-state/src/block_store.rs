//! # Block Store
//!
//! Append-only persistence for finalized blocks, keyed by height, backed
//! by the KV store and the canonical wire codec. Serves the block-history
//! read API (`get`, `range`) consumed by operator tooling.

use crate::store::StateError;
use std::sync::Arc;
use terrace_kv::KvStore;
use terrace_types::codec;
use terrace_types::{Block, DecodeError};
use thiserror::Error;

const TIP_KEY: &[u8] = b"blk-tip";

/// Block store failure.
#[derive(Debug, Error)]
pub enum BlockStoreError {
    /// Underlying state/KV layer failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// A persisted block no longer decodes.
    #[error("corrupt block record at height {height}: {source}")]
    CorruptBlock {
        height: u64,
        source: DecodeError,
    },
}

/// Height-indexed persistent block storage.
pub struct BlockStore {
    kv: Arc<KvStore>,
}

impl BlockStore {
    /// Wrap a KV backend.
    #[must_use]
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    /// Append a finalized block. Overwrites any previous record at the
    /// same height; callers only append monotonically.
    pub fn append(&self, block: &Block) -> Result<(), BlockStoreError> {
        let height = block.header.height;
        self.kv
            .put(&block_key(height), &codec::encode_block(block))
            .map_err(StateError::from)?;
        let advance = self.latest().map_or(true, |tip| height > tip);
        if advance {
            self.kv
                .put(TIP_KEY, &height.to_le_bytes())
                .map_err(StateError::from)?;
        }
        Ok(())
    }

    /// Read the block at `height`, if stored.
    pub fn get(&self, height: u64) -> Result<Option<Block>, BlockStoreError> {
        match self.kv.get(&block_key(height)) {
            Some(raw) => codec::decode_block(&raw)
                .map(Some)
                .map_err(|source| BlockStoreError::CorruptBlock { height, source }),
            None => Ok(None),
        }
    }

    /// Height of the newest stored block.
    #[must_use]
    pub fn latest(&self) -> Option<u64> {
        let raw = self.kv.get(TIP_KEY)?;
        let bytes: [u8; 8] = raw.try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }

    /// Up to `count` consecutive blocks starting at `start`. Stops at the
    /// first gap.
    pub fn range(&self, start: u64, count: u64) -> Result<Vec<Block>, BlockStoreError> {
        let mut out = Vec::new();
        for height in start..start.saturating_add(count) {
            match self.get(height)? {
                Some(block) => out.push(block),
                None => break,
            }
        }
        Ok(out)
    }
}

fn block_key(height: u64) -> Vec<u8> {
    // Big-endian height keeps prefix scans in chain order.
    let mut key = b"blk:".to_vec();
    key.extend_from_slice(&height.to_be_bytes());
    key
}
