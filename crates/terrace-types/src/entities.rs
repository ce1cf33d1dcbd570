//! # Chain Entities
//!
//! The block, transaction, receipt and consensus-vote records that flow
//! between subsystems.
//!
//! ## Clusters
//!
//! - **Chain**: [`Transaction`], [`BlockHeader`], [`Block`]
//! - **Execution**: [`AccountState`], [`Receipt`], [`Log`]
//! - **Consensus**: [`Vote`], [`VotePhase`]
//! - **Settlement**: [`Batch`]
//!
//! Transaction and block hashes are SHA-256 digests of the canonical wire
//! encoding with the signature field excluded (see [`crate::codec`]); the
//! signature is emplaced after hashing so signing can never perturb the
//! identity it signs.

use crate::address::Address;
use crate::codec;
use crate::{Hash, Signature, ZERO_HASH};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use sha2::{Digest, Sha256};

/// The balance and replay counter of one account.
///
/// Unknown addresses read as the default `(nonce: 0, balance: 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountState {
    /// Number of transactions this account has sent.
    pub nonce: u64,
    /// Balance in base units.
    pub balance: u64,
}

impl AccountState {
    /// Convenience constructor.
    #[must_use]
    pub fn new(nonce: u64, balance: u64) -> Self {
        Self { nonce, balance }
    }
}

/// A signed value-transfer or contract transaction.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Originating account.
    pub sender: Address,
    /// Destination account; `None` deploys the payload as contract code.
    pub receiver: Option<Address>,
    /// Value moved from sender to receiver, in base units.
    pub amount: u64,
    /// Sender's nonce at submission time.
    pub nonce: u64,
    /// Maximum gas the sender is willing to burn.
    pub gas_limit: u64,
    /// Price per unit of gas, in base units.
    pub gas_price: u64,
    /// Contract call-data or deployment init code; empty for plain transfers.
    pub data: Vec<u8>,
    /// Ed25519 signature over [`Transaction::signing_bytes`].
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
    /// Cached content hash; see [`Transaction::compute_hash`].
    pub hash: Hash,
}

impl Transaction {
    /// Build an unsigned transaction with its hash already sealed.
    #[must_use]
    pub fn new(
        sender: Address,
        receiver: Option<Address>,
        amount: u64,
        nonce: u64,
        gas_limit: u64,
        gas_price: u64,
        data: Vec<u8>,
    ) -> Self {
        let mut tx = Self {
            sender,
            receiver,
            amount,
            nonce,
            gas_limit,
            gas_price,
            data,
            signature: [0u8; 64],
            hash: ZERO_HASH,
        };
        tx.hash = tx.compute_hash();
        tx
    }

    /// The canonical unsigned encoding: the wire layout with the trailing
    /// signature field omitted. This is the only input to hashing and
    /// signing.
    #[must_use]
    pub fn signing_bytes(&self) -> Vec<u8> {
        codec::tx_signing_bytes(self)
    }

    /// SHA-256 over [`Transaction::signing_bytes`].
    #[must_use]
    pub fn compute_hash(&self) -> Hash {
        Sha256::digest(self.signing_bytes()).into()
    }

    /// Re-derive and store the hash after any field change.
    pub fn seal(&mut self) {
        self.hash = self.compute_hash();
    }

    /// Worst-case cost the sender must be able to cover up front.
    #[must_use]
    pub fn max_cost(&self) -> u64 {
        self.amount
            .saturating_add(self.gas_limit.saturating_mul(self.gas_price))
    }

    /// Whether this transaction deploys a contract.
    #[must_use]
    pub fn is_deployment(&self) -> bool {
        self.receiver.is_none()
    }
}

/// Metadata sealing an ordered set of transactions into the chain.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Height in the chain; genesis is 0.
    pub height: u64,
    /// Unix timestamp in seconds, strictly greater than the parent's.
    pub timestamp: u64,
    /// Hash of the parent block header.
    pub previous_hash: Hash,
    /// State root after applying this block's transactions.
    pub state_root: Hash,
    /// Merkle root over the transaction hashes.
    pub tx_root: Hash,
    /// Address of the proposing validator.
    pub producer: Address,
    /// Producer's Ed25519 signature over the header hash.
    #[serde_as(as = "Bytes")]
    pub signature: Signature,
}

/// A block: header plus the ordered transactions it commits to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The sealed header.
    pub header: BlockHeader,
    /// Transactions in application order.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// SHA-256 of the header's canonical encoding, signature excluded.
    /// This is the identity consensus votes refer to.
    #[must_use]
    pub fn hash(&self) -> Hash {
        Sha256::digest(codec::header_signing_bytes(&self.header)).into()
    }
}

/// Execution status recorded in a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    /// Transaction applied in full.
    Success,
    /// The VM reverted or faulted; value transfer undone, gas charged.
    Reverted,
}

/// An event emitted by contract code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    /// The contract that emitted the event.
    pub address: Address,
    /// Up to four 32-byte indexed topics.
    pub topics: Vec<Hash>,
    /// Raw event payload.
    pub data: Vec<u8>,
}

/// The post-execution record of one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Hash of the executed transaction.
    pub tx_hash: Hash,
    /// Height of the block that included it.
    pub block_number: u64,
    /// Sender.
    pub from: Address,
    /// Receiver, when the transaction was not a deployment.
    pub to: Option<Address>,
    /// Address assigned to freshly deployed code.
    pub contract_address: Option<Address>,
    /// Gas actually consumed (never above the limit).
    pub gas_used: u64,
    /// Events emitted during execution.
    pub logs: Vec<Log>,
    /// Final status.
    pub status: ReceiptStatus,
}

/// Consensus phase a vote belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VotePhase {
    /// First voting round after a proposal is validated.
    Prepare,
    /// Second round, entered once Prepare reaches quorum.
    Commit,
}

impl VotePhase {
    /// Stable tag used by the vote log and the gossip codec.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            VotePhase::Prepare => "PREPARE",
            VotePhase::Commit => "COMMIT",
        }
    }

    /// Parse a tag produced by [`VotePhase::tag`].
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "PREPARE" => Some(VotePhase::Prepare),
            "COMMIT" => Some(VotePhase::Commit),
            _ => None,
        }
    }
}

/// A validator's vote for a block at one consensus phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Identity of the voting validator (its canonical address string).
    pub voter_id: String,
    /// The block being voted on.
    pub block_hash: Hash,
    /// Approval flag; disapproving votes are logged but never tallied.
    pub approve: bool,
    /// Signature over [`Vote::signing_bytes`].
    pub signature: Vec<u8>,
    /// Which phase this vote belongs to.
    pub phase: VotePhase,
}

impl Vote {
    /// Canonical bytes a vote signature covers.
    #[must_use]
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.voter_id.len() + 64);
        out.extend_from_slice(self.phase.tag().as_bytes());
        out.push(b'|');
        out.extend_from_slice(self.voter_id.as_bytes());
        out.push(b'|');
        out.extend_from_slice(&self.block_hash);
        out.push(if self.approve { 1 } else { 0 });
        out
    }
}

/// An ordered run of finalized blocks anchored to L1 as one commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Monotone sequence number, starting at 1.
    pub seq: u64,
    /// Rendered identifier, `BATCH-000001` style.
    pub id: String,
    /// The finalized blocks, in height order.
    pub blocks: Vec<Block>,
    /// SHA-256 over the concatenation of the per-block state roots.
    pub root: Hash,
}

impl Batch {
    /// Height of the first block in the batch.
    #[must_use]
    pub fn first_height(&self) -> u64 {
        self.blocks.first().map_or(0, |b| b.header.height)
    }

    /// Height of the last block in the batch.
    #[must_use]
    pub fn last_height(&self) -> u64 {
        self.blocks.last().map_or(0, |b| b.header.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction::new(
            Address::Simple("alice".into()),
            Some(Address::Simple("bob".into())),
            5000,
            0,
            21_000,
            1,
            Vec::new(),
        )
    }

    #[test]
    fn test_hash_excludes_signature() {
        let mut tx = sample_tx();
        let before = tx.hash;
        tx.signature = [0x77; 64];
        assert_eq!(tx.compute_hash(), before);
    }

    #[test]
    fn test_hash_covers_every_payload_field() {
        let base = sample_tx();
        let mut amount_changed = base.clone();
        amount_changed.amount += 1;
        amount_changed.seal();
        assert_ne!(base.hash, amount_changed.hash);

        let mut data_changed = base.clone();
        data_changed.data = vec![1, 2, 3];
        data_changed.seal();
        assert_ne!(base.hash, data_changed.hash);
    }

    #[test]
    fn test_max_cost_saturates() {
        let mut tx = sample_tx();
        tx.gas_limit = u64::MAX;
        tx.gas_price = 2;
        assert_eq!(tx.max_cost(), u64::MAX);
    }

    #[test]
    fn test_block_hash_ignores_producer_signature() {
        let header = BlockHeader {
            height: 1,
            timestamp: 1_700_000_000,
            previous_hash: ZERO_HASH,
            state_root: [1; 32],
            tx_root: [2; 32],
            producer: Address::Simple("node-1".into()),
            signature: [0; 64],
        };
        let mut block = Block {
            header,
            transactions: vec![],
        };
        let unsigned = block.hash();
        block.header.signature = [0xEE; 64];
        assert_eq!(block.hash(), unsigned);
    }

    #[test]
    fn test_vote_phase_tags_roundtrip() {
        for phase in [VotePhase::Prepare, VotePhase::Commit] {
            assert_eq!(VotePhase::from_tag(phase.tag()), Some(phase));
        }
        assert_eq!(VotePhase::from_tag("PRECOMMIT"), None);
    }

    #[test]
    fn test_deployment_flag() {
        let mut tx = sample_tx();
        assert!(!tx.is_deployment());
        tx.receiver = None;
        assert!(tx.is_deployment());
    }
}
