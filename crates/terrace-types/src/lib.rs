//! # Core Domain Types
//!
//! Shared entities for the terrace node: addresses, transactions, blocks,
//! receipts, consensus votes and settlement batches, together with the
//! canonical wire codec and the Merkle tree used for transaction and state
//! commitments.
//!
//! Everything that feeds a hash goes through the hand-rolled codec in
//! [`codec`]; serde derives exist for config and operator surfaces only.

pub mod address;
pub mod codec;
pub mod entities;
pub mod errors;
pub mod merkle;
pub mod word;

pub use address::Address;
pub use entities::{
    AccountState, Batch, Block, BlockHeader, Log, Receipt, ReceiptStatus, Transaction, Vote,
    VotePhase,
};
pub use errors::{AddressError, DecodeError};

/// A 32-byte SHA-256 digest.
pub type Hash = [u8; 32];

/// A 64-byte Ed25519 signature.
pub type Signature = [u8; 64];

/// A 32-byte Ed25519 public key.
pub type PublicKey = [u8; 32];

/// The all-zero hash, used for genesis parents and empty tx roots.
pub const ZERO_HASH: Hash = [0u8; 32];
