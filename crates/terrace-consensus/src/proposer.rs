//! # Proposer
//!
//! When this node leads the round it drains the mempool, executes each
//! admitted transaction against a state snapshot, seals the roots into a
//! header and signs it. The snapshot is returned to the caller: committed
//! when the block finalizes, rolled back if consensus abandons it.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use terrace_crypto::Keypair;
use terrace_executor::{EngineError, ExecutionEngine};
use terrace_mempool::Mempool;
use terrace_state::{SnapshotHandle, StateError};
use terrace_types::merkle::merkle_root;
use terrace_types::{Address, Block, BlockHeader, Hash};

/// Cap on transactions per proposal.
pub const MAX_BLOCK_TXS: usize = 100;

/// Why a proposal could not be built.
#[derive(Debug, thiserror::Error)]
pub enum ProposeError {
    /// State layer failure.
    #[error(transparent)]
    State(#[from] StateError),

    /// The execution engine aborted (storage backend or overflow).
    #[error("proposal aborted: {0}")]
    Execution(String),
}

/// The block proposer for this node.
pub struct Proposer {
    mempool: Arc<Mempool>,
    engine: Arc<ExecutionEngine>,
    keypair: Keypair,
    address: Address,
}

impl Proposer {
    /// Build a proposer identified by `address` (also the coinbase for
    /// its blocks).
    #[must_use]
    pub fn new(
        mempool: Arc<Mempool>,
        engine: Arc<ExecutionEngine>,
        keypair: Keypair,
        address: Address,
    ) -> Self {
        Self {
            mempool,
            engine,
            keypair,
            address,
        }
    }

    /// The proposer's identity.
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Build and sign the block for `height`. State mutations live under
    /// the returned snapshot until the caller decides the block's fate.
    ///
    /// Invalid transactions are dropped, not re-queued; a storage failure
    /// rolls the snapshot back and propagates.
    pub fn propose(
        &self,
        height: u64,
        previous_timestamp: u64,
        previous_hash: Hash,
    ) -> Result<(Block, SnapshotHandle), ProposeError> {
        let snapshot = self.engine.state().snapshot();
        match self.build(height, previous_timestamp, previous_hash) {
            Ok(block) => Ok((block, snapshot)),
            Err(err) => {
                self.engine.state().rollback(snapshot)?;
                Err(err)
            }
        }
    }

    fn build(
        &self,
        height: u64,
        previous_timestamp: u64,
        previous_hash: Hash,
    ) -> Result<Block, ProposeError> {
        let timestamp = unix_now().max(previous_timestamp + 1);

        let mut transactions = Vec::new();
        while transactions.len() < MAX_BLOCK_TXS {
            let Some(tx) = self.mempool.pop() else {
                break;
            };
            if let Err(err) = self.engine.validate(&tx) {
                tracing::warn!(%err, "dropping invalid transaction from proposal");
                continue;
            }
            match self.engine.apply(&tx, &self.address, height) {
                Ok(_) => transactions.push(tx),
                Err(EngineError::Validation(err)) => {
                    tracing::warn!(%err, "dropping transaction rejected at apply time");
                }
                Err(EngineError::State(err)) => return Err(err.into()),
                Err(err) => {
                    tracing::error!(%err, "aborting proposal");
                    return Err(ProposeError::Execution(err.to_string()));
                }
            }
        }

        let tx_hashes: Vec<Hash> = transactions.iter().map(|tx| tx.hash).collect();
        let mut block = Block {
            header: BlockHeader {
                height,
                timestamp,
                previous_hash,
                state_root: self.engine.state().state_root(),
                tx_root: merkle_root(&tx_hashes),
                producer: self.address.clone(),
                signature: [0u8; 64],
            },
            transactions,
        };
        block.header.signature = self.keypair.sign(&block.hash());
        tracing::info!(
            height,
            txs = block.transactions.len(),
            "sealed block proposal"
        );
        Ok(block)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
