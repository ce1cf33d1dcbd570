//! # State Store
//!
//! The account map, contract code and 256-bit contract storage behind one
//! consistent commitment, plus the persistent block store.
//!
//! Reads are shared-concurrent; writes exclusive. Scoped snapshots give the
//! proposer and validator a rollback point that covers accounts, code and
//! storage alike.

mod block_store;
mod store;

pub use block_store::{BlockStore, BlockStoreError};
pub use store::{SnapshotHandle, StateError, StateStore};
