//! # Mempool
//!
//! The ordered buffer of admitted, unsealed transactions. Admission
//! requires a structurally sound transaction with a non-empty effect
//! (value moved or call-data present). Ordering is gas price descending
//! with arrival order breaking ties, so the proposer always drains the
//! most profitable transactions first.
//!
//! One mutex guards the pool; every operation is a short critical
//! section. Re-admission after a failed proposal is the caller's choice,
//! never automatic.

use parking_lot::Mutex;
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use terrace_types::{Hash, Transaction};
use thiserror::Error;

/// Mempool admission failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MempoolError {
    /// Transaction hash already present.
    #[error("duplicate transaction {0}")]
    Duplicate(String),

    /// Zero amount and empty data: nothing to execute.
    #[error("transaction has no effect (zero amount, empty data)")]
    NoEffect,

    /// Call-data above the configured bound.
    #[error("payload of {len} bytes exceeds limit {limit}")]
    OversizedData { len: usize, limit: usize },

    /// Zero gas price never clears the fee market.
    #[error("gas price must be non-zero")]
    ZeroGasPrice,

    /// The stated hash does not match the canonical encoding.
    #[error("transaction hash does not match its contents")]
    HashMismatch,

    /// Pool at capacity.
    #[error("pool full at {0} transactions")]
    PoolFull(usize),
}

/// Tunables for the pool.
#[derive(Debug, Clone, Deserialize)]
pub struct MempoolConfig {
    /// Maximum resident transactions.
    pub capacity: usize,
    /// Maximum call-data bytes per transaction.
    pub max_data_bytes: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            max_data_bytes: 128 * 1024,
        }
    }
}

/// A pooled transaction with its priority key.
struct Pooled {
    gas_price: u64,
    arrival: u64,
    tx: Transaction,
}

impl PartialEq for Pooled {
    fn eq(&self, other: &Self) -> bool {
        self.arrival == other.arrival
    }
}

impl Eq for Pooled {}

impl Ord for Pooled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Highest gas price first; equal prices keep arrival order.
        other
            .gas_price
            .cmp(&self.gas_price)
            .then(self.arrival.cmp(&other.arrival))
    }
}

impl PartialOrd for Pooled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct PoolInner {
    queue: BTreeSet<Pooled>,
    hashes: HashSet<Hash>,
    next_arrival: u64,
}

/// The shared transaction pool.
pub struct Mempool {
    inner: Mutex<PoolInner>,
    config: MempoolConfig,
}

impl Mempool {
    /// Create a pool with the given limits.
    #[must_use]
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
            config,
        }
    }

    /// Create a pool with default limits.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(MempoolConfig::default())
    }

    /// Admit a transaction.
    ///
    /// # Errors
    ///
    /// Rejects duplicates, effect-free transactions, oversized payloads,
    /// zero gas prices, stale hashes and a full pool.
    pub fn add(&self, tx: Transaction) -> Result<(), MempoolError> {
        if tx.amount == 0 && tx.data.is_empty() {
            return Err(MempoolError::NoEffect);
        }
        if tx.data.len() > self.config.max_data_bytes {
            return Err(MempoolError::OversizedData {
                len: tx.data.len(),
                limit: self.config.max_data_bytes,
            });
        }
        if tx.gas_price == 0 {
            return Err(MempoolError::ZeroGasPrice);
        }
        if tx.hash != tx.compute_hash() {
            return Err(MempoolError::HashMismatch);
        }

        let mut inner = self.inner.lock();
        if inner.hashes.contains(&tx.hash) {
            return Err(MempoolError::Duplicate(hex_prefix(&tx.hash)));
        }
        if inner.hashes.len() >= self.config.capacity {
            return Err(MempoolError::PoolFull(self.config.capacity));
        }

        let arrival = inner.next_arrival;
        inner.next_arrival += 1;
        inner.hashes.insert(tx.hash);
        tracing::debug!(gas_price = tx.gas_price, pooled = inner.hashes.len(), "admitted transaction");
        inner.queue.insert(Pooled {
            gas_price: tx.gas_price,
            arrival,
            tx,
        });
        Ok(())
    }

    /// Remove and return the highest-priority transaction.
    #[must_use]
    pub fn pop(&self) -> Option<Transaction> {
        let mut inner = self.inner.lock();
        let first = inner.queue.pop_first()?;
        inner.hashes.remove(&first.tx.hash);
        Some(first.tx)
    }

    /// Number of pooled transactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().hashes.len()
    }

    /// Whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a transaction is already pooled.
    #[must_use]
    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.lock().hashes.contains(hash)
    }
}

fn hex_prefix(hash: &Hash) -> String {
    hash.iter().take(4).map(|b| format!("{b:02x}")).collect()
}
