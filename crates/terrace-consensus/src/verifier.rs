//! # Block Verifier
//!
//! The validator-side mirror of the proposer: check the producer is the
//! leader for the round, check the header signature, re-execute every
//! transaction and compare the recomputed roots against the header. On
//! success the applied state stays under the returned snapshot; any
//! mismatch rolls it back.

use crate::committee::Committee;
use crate::errors::ConsensusError;
use std::sync::Arc;
use terrace_executor::ExecutionEngine;
use terrace_state::SnapshotHandle;
use terrace_types::merkle::merkle_root;
use terrace_types::{Address, Block, Hash};

/// Re-executes proposals before this node votes on them.
pub struct BlockVerifier {
    engine: Arc<ExecutionEngine>,
    committee: Committee,
}

impl BlockVerifier {
    /// Build a verifier over the shared engine.
    #[must_use]
    pub fn new(engine: Arc<ExecutionEngine>, committee: Committee) -> Self {
        Self { engine, committee }
    }

    /// Verify `block` as the proposal for `round`. On success the block's
    /// state effects are live under the returned snapshot; commit it when
    /// the block finalizes.
    ///
    /// # Errors
    ///
    /// Producer, signature, execution and root failures. State is rolled
    /// back before any error returns.
    pub fn verify(&self, block: &Block, round: u64) -> Result<SnapshotHandle, ConsensusError> {
        self.check_producer(&block.header.producer, round)?;
        self.check_producer_signature(block)?;

        let snapshot = self.engine.state().snapshot();
        match self.re_execute(block) {
            Ok(()) => Ok(snapshot),
            Err(err) => {
                self.engine.state().rollback(snapshot)?;
                Err(err)
            }
        }
    }

    fn check_producer(&self, producer: &Address, round: u64) -> Result<(), ConsensusError> {
        let expected = self
            .committee
            .leader(round)
            .ok_or_else(|| ConsensusError::InvalidBlock("empty committee".into()))?;
        let rendered = producer.canonical();
        if rendered != expected {
            return Err(ConsensusError::UnauthorizedProducer {
                producer: rendered,
                expected: expected.to_owned(),
            });
        }
        Ok(())
    }

    fn check_producer_signature(&self, block: &Block) -> Result<(), ConsensusError> {
        match &block.header.producer {
            Address::KeyBased(public_key) => {
                terrace_crypto::verify(&block.hash(), &block.header.signature, public_key)
                    .map_err(|_| {
                        ConsensusError::InvalidBlock("producer signature invalid".into())
                    })
            }
            _ => {
                tracing::warn!(
                    producer = %block.header.producer,
                    "producer has no embedded key; skipping signature check"
                );
                Ok(())
            }
        }
    }

    fn re_execute(&self, block: &Block) -> Result<(), ConsensusError> {
        for tx in &block.transactions {
            self.engine
                .validate(tx)
                .map_err(|err| ConsensusError::InvalidBlock(format!("invalid tx: {err}")))?;
            self.engine
                .apply(tx, &block.header.producer, block.header.height)
                .map_err(|err| match err {
                    terrace_executor::EngineError::State(state_err) => {
                        ConsensusError::State(state_err)
                    }
                    other => ConsensusError::InvalidBlock(format!("apply failed: {other}")),
                })?;
        }

        // Recompute both roots from scratch; never trust embedded hashes.
        let tx_hashes: Vec<Hash> = block.transactions.iter().map(|tx| tx.compute_hash()).collect();
        let tx_root = merkle_root(&tx_hashes);
        if tx_root != block.header.tx_root {
            return Err(ConsensusError::InvalidBlock(format!(
                "tx root mismatch: header {}, computed {}",
                hex::encode(&block.header.tx_root[..8]),
                hex::encode(&tx_root[..8]),
            )));
        }

        let state_root = self.engine.state().state_root();
        if state_root != block.header.state_root {
            return Err(ConsensusError::InvalidBlock(format!(
                "state root mismatch: header {}, computed {}",
                hex::encode(&block.header.state_root[..8]),
                hex::encode(&state_root[..8]),
            )));
        }

        Ok(())
    }
}
