//! # Node Driver
//!
//! Wires every subsystem together and runs the production loop: when this
//! node leads the next height and there is work (or the heartbeat is
//! due), propose, enter consensus, and broadcast. Finalization appends to
//! the block store, advances the chain tip, and feeds the settlement
//! batcher; batch submissions run detached so the L1 can never stall
//! consensus. Shutdown is cooperative via a flag.

use crate::chain::ChainTip;
use crate::config::NodeConfig;
use crate::gossip::{self, GossipError, MessageKind, PeerMessage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use terrace_consensus::{
    BlockVerifier, Committee, ConsensusEngine, ConsensusError, ProposeError, Proposer,
    VoteBroadcaster,
};
use terrace_crypto::Keypair;
use terrace_executor::ExecutionEngine;
use terrace_kv::KvStore;
use terrace_mempool::{Mempool, MempoolError};
use terrace_settlement::{BatchManager, L1Submitter, SettlementBridge};
use terrace_state::{BlockStore, StateError, StateStore};
use terrace_types::{AccountState, Address, AddressError, Block, Transaction};
use terrace_vm::precompiles::verifier::PairingCheck;
use terrace_vm::PrecompileRegistry;
use thiserror::Error;

/// Outbound block gossip. Transport is external; the driver only needs a
/// way to hand a sealed proposal to the network layer.
#[async_trait]
pub trait BlockBroadcaster: Send + Sync {
    /// Send a proposed block to every peer.
    async fn broadcast_block(&self, block: &Block);
}

/// A broadcaster for single-node and test deployments.
pub struct NullBroadcaster;

#[async_trait]
impl BlockBroadcaster for NullBroadcaster {
    async fn broadcast_block(&self, _block: &Block) {}
}

#[async_trait]
impl VoteBroadcaster for NullBroadcaster {
    async fn broadcast(&self, _vote: &terrace_types::Vote) {}
}

/// Node bootstrap or runtime failure.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration is inconsistent.
    #[error("bad configuration: {0}")]
    Config(String),

    /// A configured address does not parse.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// State layer failure.
    #[error(transparent)]
    State(#[from] StateError),

    /// KV layer failure.
    #[error(transparent)]
    Storage(#[from] terrace_kv::StorageError),

    /// Consensus failure.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    /// Proposal failure.
    #[error(transparent)]
    Propose(#[from] ProposeError),

    /// Block store failure.
    #[error(transparent)]
    BlockStore(#[from] terrace_state::BlockStoreError),

    /// Gossip decode failure; the message is dropped.
    #[error(transparent)]
    Gossip(#[from] GossipError),
}

/// The assembled node.
pub struct Node {
    config: NodeConfig,
    committee: Committee,
    mempool: Arc<Mempool>,
    exec: Arc<ExecutionEngine>,
    consensus: Arc<ConsensusEngine>,
    proposer: Proposer,
    block_store: Arc<BlockStore>,
    chain_tip: Arc<ChainTip>,
    block_broadcaster: Arc<dyn BlockBroadcaster>,
    boot_time: u64,
    shutdown: AtomicBool,
}

impl Node {
    /// Build a node from configuration and its collaborator ports.
    ///
    /// Applies genesis allocations to a fresh state, resumes the chain
    /// tip from the block store, and replays the consensus vote log.
    pub fn bootstrap(
        config: NodeConfig,
        keypair: Keypair,
        vote_broadcaster: Arc<dyn VoteBroadcaster>,
        block_broadcaster: Arc<dyn BlockBroadcaster>,
        submitter: Arc<dyn L1Submitter>,
        pairing: Arc<dyn PairingCheck>,
    ) -> Result<Arc<Self>, NodeError> {
        if !config.committee.contains(&config.node_id) {
            return Err(NodeError::Config(format!(
                "node id {:?} is not on the committee",
                config.node_id
            )));
        }
        let node_address = Address::parse(&config.node_id)?;
        let committee = Committee::new(config.committee.clone());

        // Storage stack.
        let state_kv = Arc::new(KvStore::open(config.data_dir.join("state"))?);
        let state = Arc::new(StateStore::open(state_kv)?);
        let block_kv = Arc::new(KvStore::open(config.data_dir.join("blocks"))?);
        let block_store = Arc::new(BlockStore::new(block_kv));

        // Genesis applies exactly once, before the first block exists.
        if block_store.latest().is_none() {
            for alloc in &config.genesis {
                let address = Address::parse(&alloc.address)?;
                if state.get_account(&address) == AccountState::default() {
                    state.put_account(&address, AccountState::new(0, alloc.balance))?;
                }
            }
            tracing::info!(accounts = config.genesis.len(), "applied genesis allocations");
        }

        // Resume the tip from persisted blocks.
        let chain_tip = Arc::new(match block_store.latest() {
            Some(height) => {
                let block = block_store
                    .get(height)?
                    .ok_or_else(|| NodeError::Config("tip block missing".into()))?;
                ChainTip::resume(height, block.hash(), block.header.timestamp)
            }
            None => ChainTip::new(),
        });

        // Execution stack.
        let mempool = Arc::new(Mempool::new(config.mempool.clone()));
        let exec = Arc::new(ExecutionEngine::new(
            Arc::clone(&state),
            PrecompileRegistry::with_defaults(pairing),
            config.execution.clone(),
        ));

        // Settlement stack; finalized blocks flow through the callback.
        let batcher = Arc::new(BatchManager::new(config.batch_size));
        let bridge = Arc::new(SettlementBridge::new(submitter, config.l1_module.clone()));
        let on_finalized = finalized_callback(
            Arc::clone(&block_store),
            Arc::clone(&chain_tip),
            Arc::clone(&batcher),
            bridge,
        );

        let consensus = Arc::new(ConsensusEngine::open(
            config.node_id.clone(),
            committee.clone(),
            chain_tip.get().height + 1,
            config.data_dir.join("votes.log"),
            Keypair::from_seed(keypair.to_seed()),
            Arc::clone(&state),
            BlockVerifier::new(Arc::clone(&exec), committee.clone()),
            vote_broadcaster,
            on_finalized,
        )?);

        let proposer = Proposer::new(
            Arc::clone(&mempool),
            Arc::clone(&exec),
            keypair,
            node_address,
        );

        Ok(Arc::new(Self {
            config,
            committee,
            mempool,
            exec,
            consensus,
            proposer,
            block_store,
            chain_tip,
            block_broadcaster,
            boot_time: unix_now(),
            shutdown: AtomicBool::new(false),
        }))
    }

    /// The mempool, for the RPC collaborator.
    #[must_use]
    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    /// The execution engine (receipts, state reads).
    #[must_use]
    pub fn execution(&self) -> &Arc<ExecutionEngine> {
        &self.exec
    }

    /// The block store, for the block-history read API.
    #[must_use]
    pub fn block_store(&self) -> &Arc<BlockStore> {
        &self.block_store
    }

    /// The chain tip.
    #[must_use]
    pub fn chain_tip(&self) -> &Arc<ChainTip> {
        &self.chain_tip
    }

    /// Submit a decoded transaction (the RPC collaborator's entry point).
    /// Returns the request key: the hex of the transaction hash.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<String, MempoolError> {
        let key = hex::encode(tx.hash);
        self.mempool.add(tx)?;
        tracing::debug!(request_key = %key, "transaction admitted");
        Ok(key)
    }

    /// Handle one decoded peer message.
    pub async fn handle_peer_message(&self, message: PeerMessage) -> Result<(), NodeError> {
        match message.kind {
            MessageKind::Vote => {
                let vote = gossip::decode_vote_payload(&message.payload)?;
                self.consensus.handle_vote(vote).await?;
            }
            MessageKind::Block => {
                let block = gossip::decode_block_payload(&message.payload)?;
                let round = block.header.height;
                self.consensus.handle_pre_prepare(block, round).await?;
            }
        }
        Ok(())
    }

    /// One production opportunity: propose if this node leads the next
    /// height and there is either mempool work or an overdue heartbeat.
    /// Returns whether a block was proposed.
    pub async fn try_produce(&self) -> Result<bool, NodeError> {
        let tip = self.chain_tip.get();
        let next_height = tip.height + 1;

        let leader = self.committee.leader(next_height);
        if leader != Some(self.config.node_id.as_str()) {
            return Ok(false);
        }

        // Silence is measured from the newest block, or from boot while
        // no block exists yet.
        let silence = unix_now().saturating_sub(tip.timestamp.max(self.boot_time));
        if self.mempool.is_empty() && silence < self.config.heartbeat_secs {
            return Ok(false);
        }

        let (block, snapshot) = self
            .proposer
            .propose(next_height, tip.timestamp, tip.hash)?;
        tracing::info!(
            height = next_height,
            txs = block.transactions.len(),
            "proposing block"
        );

        self.block_broadcaster.broadcast_block(&block).await;
        self.consensus.handle_own_proposal(block, snapshot).await?;
        Ok(true)
    }

    /// The production loop. Runs until [`Node::stop`].
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(
            self.config.block_interval_secs.max(1),
        ));
        tracing::info!(node = %self.config.node_id, "driver loop started");
        while !self.shutdown.load(Ordering::Relaxed) {
            ticker.tick().await;
            match self.try_produce().await {
                Ok(_) => {}
                Err(NodeError::Consensus(err)) if err.is_fatal() => {
                    tracing::error!(%err, "halting: durable vote log failure");
                    break;
                }
                Err(err) => tracing::warn!(%err, "production attempt failed"),
            }
        }
        tracing::info!("driver loop drained");
    }

    /// Request cooperative shutdown.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// Finalization pipeline: persist, advance the tip, batch, settle
/// detached. Ordering is load-bearing: the block store append happens
/// before the tip advance.
fn finalized_callback(
    block_store: Arc<BlockStore>,
    chain_tip: Arc<ChainTip>,
    batcher: Arc<BatchManager>,
    bridge: Arc<SettlementBridge>,
) -> terrace_consensus::FinalizedCallback {
    Box::new(move |block: Block| {
        let height = block.header.height;
        let hash = block.hash();
        if let Err(err) = block_store.append(&block) {
            tracing::error!(%err, height, "failed to persist finalized block");
            return;
        }
        chain_tip.advance(height, hash, block.header.timestamp);

        batcher.push(block);
        if batcher.is_ready() {
            match batcher.create_batch() {
                Ok(batch) => {
                    let bridge = Arc::clone(&bridge);
                    if let Ok(handle) = tokio::runtime::Handle::try_current() {
                        handle.spawn(async move {
                            let _ = bridge.settle(&batch).await;
                        });
                    } else {
                        tracing::warn!(batch = %batch.id, "no runtime; skipping settlement");
                    }
                }
                Err(err) => tracing::warn!(%err, "batch creation failed"),
            }
        }
    })
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
