//! # Virtual Machine
//!
//! A stack machine over 256-bit words executing contract bytecode at
//! canonical EVM byte values. Persistent storage reaches the state layer
//! through the [`StorageBackend`] seam; built-in contracts at reserved
//! addresses come from the [`precompiles::PrecompileRegistry`].

pub mod errors;
pub mod gas;
pub mod interpreter;
pub mod memory;
pub mod opcodes;
pub mod precompiles;
pub mod stack;

pub use errors::VmError;
pub use interpreter::{address_from_word, execute, CallContext, Outcome, MAX_CALL_DEPTH};
pub use precompiles::PrecompileRegistry;

use terrace_types::word::U256;
use terrace_types::Address;

/// The VM's view of persistent state: per-contract 256-bit storage and
/// deployed code. Backend failures are reported as [`VmError::Backend`]
/// and abort the transaction rather than producing a failed receipt.
pub trait StorageBackend {
    /// Read a storage slot; absent slots are zero.
    fn get_storage(&self, contract: &Address, key: U256) -> Result<U256, VmError>;

    /// Write a storage slot; zero clears it.
    fn put_storage(&self, contract: &Address, key: U256, value: U256) -> Result<(), VmError>;

    /// Fetch deployed code for a call target.
    fn get_code(&self, contract: &Address) -> Result<Option<Vec<u8>>, VmError>;
}
