//! # Settlement Batching & Bridge
//!
//! Finalized blocks queue up in the batch manager; once enough accumulate
//! they drain into a [`Batch`] whose root commits to every block's state
//! root. The bridge renders a textual settlement command and hands the
//! commitment to the external L1 submitter. Settlement is an audit
//! anchor: its outcome never feeds back into local finality, and
//! submissions run detached so a slow L1 cannot block consensus.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use terrace_crypto::Sha256Hasher;
use terrace_types::{Batch, Block, Hash};
use thiserror::Error;

/// Settlement layer failure. Submissions may be retried by operators;
/// the node itself never retries silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettlementError {
    /// The L1 submitter reported failure.
    #[error("submission failed: {0}")]
    Submission(String),

    /// A batch was requested while below the size threshold.
    #[error("batch not ready: {pending} of {required} blocks pending")]
    NotReady { pending: usize, required: usize },
}

/// Opaque result handed back by the L1 collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    /// Whether the L1 accepted the command.
    pub success: bool,
    /// The L1-side request key for polling.
    pub request_key: String,
    /// Error detail when `success` is false.
    pub error: Option<String>,
}

/// The external L1 submission collaborator. The core treats it as opaque.
#[async_trait]
pub trait L1Submitter: Send + Sync {
    /// Submit one batch commitment.
    async fn submit(
        &self,
        batch_id: &str,
        state_root_hex: &str,
        block_count: u64,
    ) -> Result<SubmissionReceipt, SettlementError>;
}

/// Collects finalized blocks into fixed-size batches.
pub struct BatchManager {
    pending: Mutex<Vec<Block>>,
    next_seq: Mutex<u64>,
    batch_size: usize,
}

impl BatchManager {
    /// Manager draining every `batch_size` finalized blocks.
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            next_seq: Mutex::new(1),
            batch_size: batch_size.max(1),
        }
    }

    /// Queue a finalized block.
    pub fn push(&self, block: Block) {
        self.pending.lock().push(block);
    }

    /// Number of blocks waiting for the next batch.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether enough blocks are queued to cut a batch.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.pending_len() >= self.batch_size
    }

    /// Drain the queue into a batch.
    ///
    /// # Errors
    ///
    /// `NotReady` below the size threshold.
    pub fn create_batch(&self) -> Result<Batch, SettlementError> {
        let mut pending = self.pending.lock();
        if pending.len() < self.batch_size {
            return Err(SettlementError::NotReady {
                pending: pending.len(),
                required: self.batch_size,
            });
        }
        let blocks: Vec<Block> = pending.drain(..).collect();
        drop(pending);

        let mut seq_guard = self.next_seq.lock();
        let seq = *seq_guard;
        *seq_guard += 1;
        drop(seq_guard);

        let root = aggregate_root(&blocks);
        Ok(Batch {
            seq,
            id: format!("BATCH-{seq:06}"),
            blocks,
            root,
        })
    }
}

/// SHA-256 over the concatenated per-block state roots, in block order.
#[must_use]
pub fn aggregate_root(blocks: &[Block]) -> Hash {
    let mut hasher = Sha256Hasher::new();
    for block in blocks {
        hasher.update(&block.header.state_root);
    }
    hasher.finalize()
}

/// Renders settlement commands and drives the L1 submitter.
pub struct SettlementBridge {
    submitter: Arc<dyn L1Submitter>,
    module: String,
}

impl SettlementBridge {
    /// Bridge submitting under the given L1 module name.
    #[must_use]
    pub fn new(submitter: Arc<dyn L1Submitter>, module: impl Into<String>) -> Self {
        Self {
            submitter,
            module: module.into(),
        }
    }

    /// The textual settlement command for a batch: id, aggregate root,
    /// block count and covered height range.
    #[must_use]
    pub fn settlement_command(&self, batch: &Batch) -> String {
        format!(
            "({}.submit-batch \"{}\" \"{}\" {} {} {})",
            self.module,
            batch.id,
            hex::encode(batch.root),
            batch.blocks.len(),
            batch.first_height(),
            batch.last_height(),
        )
    }

    /// Submit a batch commitment and log the outcome. Finality is not
    /// affected either way.
    pub async fn settle(&self, batch: &Batch) -> Result<SubmissionReceipt, SettlementError> {
        let command = self.settlement_command(batch);
        tracing::info!(
            batch = %batch.id,
            blocks = batch.blocks.len(),
            heights = format!("{}-{}", batch.first_height(), batch.last_height()),
            %command,
            "submitting batch to L1"
        );

        let receipt = self
            .submitter
            .submit(&batch.id, &hex::encode(batch.root), batch.blocks.len() as u64)
            .await?;

        if receipt.success {
            tracing::info!(batch = %batch.id, request_key = %receipt.request_key, "batch submitted");
        } else {
            tracing::warn!(
                batch = %batch.id,
                error = receipt.error.as_deref().unwrap_or("unspecified"),
                "batch submission rejected"
            );
        }
        Ok(receipt)
    }
}
