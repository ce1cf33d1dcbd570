//! # Consensus Engine
//!
//! Wraps the pure phase machine with everything impure: the durable vote
//! log (fsync before tally), vote signatures, the broadcast port, pending
//! state snapshots and the finalized callback.
//!
//! Locking discipline: one mutex guards the phase machine. Log appends
//! happen inside the critical section (durability strictly precedes
//! tallying); broadcasts and the finalized callback are flushed after the
//! lock is released, so a broadcast looping back into this node re-enters
//! cleanly.

use crate::committee::Committee;
use crate::machine::{ConsensusCore, ConsensusEvent, Effect, Phase};
use crate::errors::ConsensusError;
use crate::verifier::BlockVerifier;
use crate::vote_log::VoteLog;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use terrace_crypto::Keypair;
use terrace_state::{SnapshotHandle, StateStore};
use terrace_types::{Address, Block, Hash, Vote};

/// Outbound side of the gossip layer. Implementations must not be called
/// while engine locks are held; the engine guarantees that.
#[async_trait]
pub trait VoteBroadcaster: Send + Sync {
    /// Send a vote to every peer.
    async fn broadcast(&self, vote: &Vote);
}

/// Callback invoked exactly once per finalized block.
pub type FinalizedCallback = Box<dyn Fn(Block) + Send + Sync>;

/// The engine.
pub struct ConsensusEngine {
    node_id: String,
    core: Mutex<ConsensusCore>,
    vote_log: VoteLog,
    broadcaster: Arc<dyn VoteBroadcaster>,
    verifier: BlockVerifier,
    state: Arc<StateStore>,
    keypair: Keypair,
    pending_snapshots: Mutex<HashMap<Hash, SnapshotHandle>>,
    on_finalized: FinalizedCallback,
}

impl ConsensusEngine {
    /// Open the engine, replaying the vote log so tallies and own-vote
    /// history survive restarts.
    #[allow(clippy::too_many_arguments)]
    pub fn open<P: AsRef<Path>>(
        node_id: String,
        committee: Committee,
        next_height: u64,
        log_path: P,
        keypair: Keypair,
        state: Arc<StateStore>,
        verifier: BlockVerifier,
        broadcaster: Arc<dyn VoteBroadcaster>,
        on_finalized: FinalizedCallback,
    ) -> Result<Self, ConsensusError> {
        let vote_log = VoteLog::open(log_path)?;
        let mut core = ConsensusCore::new(node_id.clone(), committee, next_height);
        let replayed = vote_log.replay()?;
        for vote in &replayed {
            core.replay(vote);
        }
        if !replayed.is_empty() {
            tracing::info!(votes = replayed.len(), "replayed consensus vote log");
        }

        Ok(Self {
            node_id,
            core: Mutex::new(core),
            vote_log,
            broadcaster,
            verifier,
            state,
            keypair,
            pending_snapshots: Mutex::new(HashMap::new()),
            on_finalized,
        })
    }

    /// This node's validator identity.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Current phase (for operator surfaces and tests).
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.core.lock().phase()
    }

    /// Height the engine expects next.
    #[must_use]
    pub fn next_height(&self) -> u64 {
        self.core.lock().next_height()
    }

    /// Peer path: verify a received proposal, then enter the prepare
    /// phase for it. The proposal's state effects stay under a pending
    /// snapshot until the block finalizes or is abandoned.
    pub async fn handle_pre_prepare(&self, block: Block, round: u64) -> Result<(), ConsensusError> {
        {
            let core = self.core.lock();
            if !core.accepts_proposal_at(block.header.height) {
                return Err(ConsensusError::HeightMismatch {
                    expected: core.next_height(),
                    actual: block.header.height,
                });
            }
        }

        let snapshot = self.verifier.verify(&block, round)?;
        self.enter_prepare(block, snapshot).await
    }

    /// Leader path: this node built (and already executed) the block, so
    /// no re-verification happens. `snapshot` is the proposer's.
    pub async fn handle_own_proposal(
        &self,
        block: Block,
        snapshot: SnapshotHandle,
    ) -> Result<(), ConsensusError> {
        self.enter_prepare(block, snapshot).await
    }

    /// A vote arrived from the network (or looped back locally).
    pub async fn handle_vote(&self, vote: Vote) -> Result<(), ConsensusError> {
        self.verify_vote_signature(&vote)?;
        let flush = {
            let mut core = self.core.lock();
            self.drive(&mut core, ConsensusEvent::VoteReceived(vote))?
        };
        self.flush(flush).await;
        Ok(())
    }

    async fn enter_prepare(
        &self,
        block: Block,
        snapshot: SnapshotHandle,
    ) -> Result<(), ConsensusError> {
        let hash = block.hash();
        let flush = {
            let mut core = self.core.lock();
            match self.drive(&mut core, ConsensusEvent::PrePrepare(block)) {
                Ok(flush) => {
                    self.pending_snapshots.lock().insert(hash, snapshot);
                    flush
                }
                Err(err) => {
                    // The proposal was rejected; its state effects go too.
                    drop(core);
                    self.state.rollback(snapshot)?;
                    return Err(err);
                }
            }
        };
        self.flush(flush).await;
        Ok(())
    }

    /// Run the machine to a fixed point: own votes produced by one step
    /// are persisted and fed back until no new effects appear. Returns
    /// what must happen outside the lock.
    fn drive(
        &self,
        core: &mut ConsensusCore,
        first: ConsensusEvent,
    ) -> Result<FlushPlan, ConsensusError> {
        let mut plan = FlushPlan::default();
        let mut queue = vec![first];

        while let Some(event) = queue.pop() {
            // Durability precedes tallying for every vote event.
            if let ConsensusEvent::VoteReceived(vote) = &event {
                self.vote_log.append(vote)?;
            }
            for effect in core.step(event)? {
                match effect {
                    Effect::CastVote(mut vote) => {
                        vote.signature = self.keypair.sign(&vote.signing_bytes()).to_vec();
                        plan.broadcasts.push(vote.clone());
                        queue.push(ConsensusEvent::VoteReceived(vote));
                    }
                    Effect::Finalize(block) => {
                        plan.finalized = Some(block);
                    }
                }
            }
        }
        Ok(plan)
    }

    async fn flush(&self, plan: FlushPlan) {
        for vote in &plan.broadcasts {
            self.broadcaster.broadcast(vote).await;
        }
        if let Some(block) = plan.finalized {
            let hash = block.hash();
            if let Some(snapshot) = self.pending_snapshots.lock().remove(&hash) {
                if let Err(err) = self.state.commit(snapshot) {
                    tracing::error!(%err, "failed to commit finalized state");
                }
            }
            (self.on_finalized)(block);
        }
    }

    fn verify_vote_signature(&self, vote: &Vote) -> Result<(), ConsensusError> {
        // Committee ids that embed a key must prove it; bare ids are
        // membership-checked only (the core rejects strangers).
        if let Ok(Address::KeyBased(public_key)) = vote.voter_id.parse::<Address>() {
            let sig: [u8; 64] = vote
                .signature
                .as_slice()
                .try_into()
                .map_err(|_| ConsensusError::BadVoteSignature(vote.voter_id.clone()))?;
            terrace_crypto::verify(&vote.signing_bytes(), &sig, &public_key)
                .map_err(|_| ConsensusError::BadVoteSignature(vote.voter_id.clone()))?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct FlushPlan {
    broadcasts: Vec<Vote>,
    finalized: Option<Block>,
}
