//! # Node Runtime
//!
//! The assembly layer: configuration, the chain tip, the gossip message
//! codec and the driver loop that wires mempool, execution, consensus,
//! storage and settlement into a running validator.

pub mod chain;
pub mod config;
pub mod driver;
pub mod gossip;

pub use chain::{ChainTip, TipInfo};
pub use config::{GenesisAccount, NodeConfig};
pub use driver::{BlockBroadcaster, Node, NodeError, NullBroadcaster};
