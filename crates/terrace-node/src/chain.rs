//! # Chain Tip
//!
//! The node's view of the newest finalized block: height, hash and
//! timestamp, behind one briefly-held mutex. Advancing the tip is the
//! last step of finalization, after the block store append.

use parking_lot::Mutex;
use terrace_types::{Hash, ZERO_HASH};

/// A point-in-time copy of the tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipInfo {
    /// Height of the newest finalized block (0 before any block).
    pub height: u64,
    /// Its hash (all-zero before any block).
    pub hash: Hash,
    /// Its timestamp in Unix seconds (0 before any block).
    pub timestamp: u64,
}

/// The shared tip.
pub struct ChainTip {
    inner: Mutex<TipInfo>,
}

impl ChainTip {
    /// A tip at genesis.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TipInfo {
                height: 0,
                hash: ZERO_HASH,
                timestamp: 0,
            }),
        }
    }

    /// Resume from a persisted tip.
    #[must_use]
    pub fn resume(height: u64, hash: Hash, timestamp: u64) -> Self {
        Self {
            inner: Mutex::new(TipInfo {
                height,
                hash,
                timestamp,
            }),
        }
    }

    /// Read the tip.
    #[must_use]
    pub fn get(&self) -> TipInfo {
        *self.inner.lock()
    }

    /// Advance to a newly finalized block. Stale heights are ignored with
    /// a warning, never applied.
    pub fn advance(&self, height: u64, hash: Hash, timestamp: u64) {
        let mut inner = self.inner.lock();
        if height <= inner.height && inner.height != 0 {
            tracing::warn!(height, tip = inner.height, "ignoring stale tip advance");
            return;
        }
        *inner = TipInfo {
            height,
            hash,
            timestamp,
        };
    }
}

impl Default for ChainTip {
    fn default() -> Self {
        Self::new()
    }
}
