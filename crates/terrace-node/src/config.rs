//! Node configuration.

use serde::Deserialize;
use std::path::PathBuf;
use terrace_executor::ExecutionConfig;
use terrace_mempool::MempoolConfig;

/// One genesis allocation.
#[derive(Debug, Clone, Deserialize)]
pub struct GenesisAccount {
    /// Account address (any of the three shapes).
    pub address: String,
    /// Starting balance in base units.
    pub balance: u64,
}

/// Full node configuration. Deserializable from a JSON file; every field
/// has a development default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's validator identity; must sit on the committee.
    pub node_id: String,

    /// Root directory for state, blocks and the vote log.
    pub data_dir: PathBuf,

    /// Ordered validator identities.
    pub committee: Vec<String>,

    /// Finalized blocks per settlement batch.
    pub batch_size: usize,

    /// Proposer tick interval in seconds.
    pub block_interval_secs: u64,

    /// Produce an empty heartbeat block after this much silence.
    pub heartbeat_secs: u64,

    /// L1 module name referenced by settlement commands.
    pub l1_module: String,

    /// Genesis allocations, applied once to a fresh state.
    pub genesis: Vec<GenesisAccount>,

    /// Execution engine policy.
    pub execution: ExecutionConfig,

    /// Mempool limits.
    pub mempool: MempoolConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node-1".into(),
            data_dir: PathBuf::from("terrace-data"),
            committee: vec!["node-1".into()],
            batch_size: 2,
            block_interval_secs: 5,
            heartbeat_secs: 10,
            l1_module: "terrace".into(),
            genesis: vec![
                GenesisAccount {
                    address: "alice".into(),
                    balance: 10_000_000,
                },
                GenesisAccount {
                    address: "bob".into(),
                    balance: 10_000_000,
                },
            ],
            execution: ExecutionConfig::default(),
            mempool: MempoolConfig::default(),
        }
    }
}
