//! # Phase State Machine
//!
//! The pure heart of the consensus engine: no I/O, no locks, no clocks.
//! [`ConsensusCore::step`] consumes one event and returns the side effects
//! the engine must perform (persist-and-broadcast a vote, finalize a
//! block). Factoring the machine this way lets the engine flush network
//! effects outside its mutex, so a broadcast that loops back locally can
//! never deadlock.
//!
//! Per block, each node casts at most one Prepare and one Commit; the
//! own-vote sets survive restarts via vote-log replay. Quorum on Prepare
//! moves the phase to Commit; quorum on Commit finalizes and returns the
//! machine to Idle for the next height.

use crate::committee::Committee;
use crate::errors::ConsensusError;
use std::collections::{HashMap, HashSet};
use terrace_types::{Block, Hash, Vote, VotePhase};

/// Where the machine stands for the block in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No proposal in flight.
    Idle,
    /// Proposal accepted, collecting Prepare votes.
    Prepare,
    /// Prepare quorum seen, collecting Commit votes.
    Commit,
}

/// One input to the machine.
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    /// A validated proposal for the next height.
    PrePrepare(Block),
    /// A durably-logged vote, ready to tally.
    VoteReceived(Vote),
}

/// One side effect the engine must carry out.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Sign, persist, broadcast, then feed back as `VoteReceived`.
    CastVote(Vote),
    /// The block reached Commit quorum; hand it to the finalized path.
    Finalize(Block),
}

/// The machine.
pub struct ConsensusCore {
    node_id: String,
    committee: Committee,
    phase: Phase,
    next_height: u64,
    pending: Option<(Hash, Block)>,
    prepare_votes: HashMap<Hash, HashSet<String>>,
    commit_votes: HashMap<Hash, HashSet<String>>,
    own_prepares: HashSet<Hash>,
    own_commits: HashSet<Hash>,
}

impl ConsensusCore {
    /// A fresh machine expecting `next_height` as the first proposal.
    #[must_use]
    pub fn new(node_id: String, committee: Committee, next_height: u64) -> Self {
        Self {
            node_id,
            committee,
            phase: Phase::Idle,
            next_height,
            pending: None,
            prepare_votes: HashMap::new(),
            commit_votes: HashMap::new(),
            own_prepares: HashSet::new(),
            own_commits: HashSet::new(),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Height the machine will accept a proposal for.
    #[must_use]
    pub fn next_height(&self) -> u64 {
        self.next_height
    }

    /// Prepare tally for a block.
    #[must_use]
    pub fn prepare_count(&self, hash: &Hash) -> usize {
        self.prepare_votes.get(hash).map_or(0, HashSet::len)
    }

    /// Commit tally for a block.
    #[must_use]
    pub fn commit_count(&self, hash: &Hash) -> usize {
        self.commit_votes.get(hash).map_or(0, HashSet::len)
    }

    /// Whether a proposal at `height` could currently be accepted.
    #[must_use]
    pub fn accepts_proposal_at(&self, height: u64) -> bool {
        self.phase == Phase::Idle && height == self.next_height
    }

    /// Rebuild tallies from one replayed vote-log record, without
    /// emitting effects. Restores the own-vote sets so a restarted node
    /// cannot cast a second Prepare or Commit for the same block.
    pub fn replay(&mut self, vote: &Vote) {
        if !vote.approve {
            return;
        }
        let tally = match vote.phase {
            VotePhase::Prepare => &mut self.prepare_votes,
            VotePhase::Commit => &mut self.commit_votes,
        };
        tally
            .entry(vote.block_hash)
            .or_default()
            .insert(vote.voter_id.clone());
        if vote.voter_id == self.node_id {
            match vote.phase {
                VotePhase::Prepare => self.own_prepares.insert(vote.block_hash),
                VotePhase::Commit => self.own_commits.insert(vote.block_hash),
            };
        }
    }

    /// Advance the machine by one event.
    ///
    /// # Errors
    ///
    /// Message-level [`ConsensusError`]s (double votes, unknown voters,
    /// phase or height mismatches). The machine state is unchanged when
    /// an error is returned.
    pub fn step(&mut self, event: ConsensusEvent) -> Result<Vec<Effect>, ConsensusError> {
        match event {
            ConsensusEvent::PrePrepare(block) => self.on_pre_prepare(block),
            ConsensusEvent::VoteReceived(vote) => self.on_vote(vote),
        }
    }

    fn on_pre_prepare(&mut self, block: Block) -> Result<Vec<Effect>, ConsensusError> {
        if self.phase != Phase::Idle {
            return Err(ConsensusError::PhaseMismatch(format!(
                "proposal while in {:?}",
                self.phase
            )));
        }
        let height = block.header.height;
        if height != self.next_height {
            return Err(ConsensusError::HeightMismatch {
                expected: self.next_height,
                actual: height,
            });
        }

        let hash = block.hash();
        self.pending = Some((hash, block));
        self.phase = Phase::Prepare;
        tracing::debug!(height, hash = %short(&hash), "entered prepare phase");

        if self.own_prepares.contains(&hash) {
            // Already prepared this block before a restart; never vote twice.
            return Ok(Vec::new());
        }
        Ok(vec![Effect::CastVote(self.own_vote(hash, VotePhase::Prepare))])
    }

    fn on_vote(&mut self, vote: Vote) -> Result<Vec<Effect>, ConsensusError> {
        if !self.committee.contains(&vote.voter_id) {
            return Err(ConsensusError::UnknownVoter(vote.voter_id));
        }
        if !vote.approve {
            tracing::debug!(voter = %vote.voter_id, "disapproving vote logged, not tallied");
            return Ok(Vec::new());
        }

        match vote.phase {
            VotePhase::Prepare => {
                let fresh = self
                    .prepare_votes
                    .entry(vote.block_hash)
                    .or_default()
                    .insert(vote.voter_id.clone());
                if !fresh {
                    return Err(ConsensusError::DoubleVote {
                        voter: vote.voter_id,
                        phase: "prepare",
                    });
                }
                if vote.voter_id == self.node_id {
                    self.own_prepares.insert(vote.block_hash);
                }
                Ok(self.check_prepare_quorum(vote.block_hash))
            }
            VotePhase::Commit => {
                let fresh = self
                    .commit_votes
                    .entry(vote.block_hash)
                    .or_default()
                    .insert(vote.voter_id.clone());
                if !fresh {
                    return Err(ConsensusError::DoubleVote {
                        voter: vote.voter_id,
                        phase: "commit",
                    });
                }
                if vote.voter_id == self.node_id {
                    self.own_commits.insert(vote.block_hash);
                }
                Ok(self.check_commit_quorum(vote.block_hash))
            }
        }
    }

    fn check_prepare_quorum(&mut self, hash: Hash) -> Vec<Effect> {
        let quorum = self.committee.quorum();
        let count = self.prepare_count(&hash);
        tracing::debug!(count, quorum, hash = %short(&hash), "prepare tally");

        if self.phase != Phase::Prepare || count < quorum {
            return Vec::new();
        }
        let Some((pending_hash, _)) = &self.pending else {
            return Vec::new();
        };
        if *pending_hash != hash {
            return Vec::new();
        }

        self.phase = Phase::Commit;
        if self.own_commits.contains(&hash) {
            return Vec::new();
        }
        vec![Effect::CastVote(self.own_vote(hash, VotePhase::Commit))]
    }

    fn check_commit_quorum(&mut self, hash: Hash) -> Vec<Effect> {
        let quorum = self.committee.quorum();
        let count = self.commit_count(&hash);
        tracing::debug!(count, quorum, hash = %short(&hash), "commit tally");

        if self.phase != Phase::Commit || count < quorum {
            return Vec::new();
        }
        let Some((pending_hash, _)) = &self.pending else {
            return Vec::new();
        };
        if *pending_hash != hash {
            return Vec::new();
        }

        let (_, block) = self.pending.take().expect("pending checked above");
        self.phase = Phase::Idle;
        self.next_height += 1;
        self.prepare_votes.remove(&hash);
        self.commit_votes.remove(&hash);
        self.own_prepares.remove(&hash);
        self.own_commits.remove(&hash);
        tracing::info!(height = block.header.height, hash = %short(&hash), "block finalized");
        vec![Effect::Finalize(block)]
    }

    fn own_vote(&self, hash: Hash, phase: VotePhase) -> Vote {
        Vote {
            voter_id: self.node_id.clone(),
            block_hash: hash,
            approve: true,
            signature: Vec::new(),
            phase,
        }
    }
}

fn short(hash: &Hash) -> String {
    hex::encode(&hash[..4])
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrace_types::{Address, BlockHeader, ZERO_HASH};

    fn committee(n: usize) -> Committee {
        Committee::new((0..n).map(|i| format!("node-{i}")).collect())
    }

    fn block_at(height: u64) -> Block {
        Block {
            header: BlockHeader {
                height,
                timestamp: 1_700_000_000,
                previous_hash: ZERO_HASH,
                state_root: ZERO_HASH,
                tx_root: ZERO_HASH,
                producer: Address::Simple("node-0".into()),
                signature: [0; 64],
            },
            transactions: vec![],
        }
    }

    fn vote(voter: &str, hash: Hash, phase: VotePhase) -> Vote {
        Vote {
            voter_id: voter.into(),
            block_hash: hash,
            approve: true,
            signature: Vec::new(),
            phase,
        }
    }

    fn core() -> ConsensusCore {
        ConsensusCore::new("node-0".into(), committee(4), 1)
    }

    #[test]
    fn test_pre_prepare_casts_single_prepare() {
        let mut machine = core();
        let block = block_at(1);
        let effects = machine.step(ConsensusEvent::PrePrepare(block)).unwrap();
        assert_eq!(effects.len(), 1);
        assert!(matches!(
            &effects[0],
            Effect::CastVote(v) if v.phase == VotePhase::Prepare && v.voter_id == "node-0"
        ));
        assert_eq!(machine.phase(), Phase::Prepare);
    }

    #[test]
    fn test_wrong_height_rejected() {
        let mut machine = core();
        let err = machine
            .step(ConsensusEvent::PrePrepare(block_at(5)))
            .unwrap_err();
        assert!(matches!(
            err,
            ConsensusError::HeightMismatch {
                expected: 1,
                actual: 5
            }
        ));
        assert_eq!(machine.phase(), Phase::Idle);
    }

    #[test]
    fn test_second_proposal_in_flight_rejected() {
        let mut machine = core();
        machine
            .step(ConsensusEvent::PrePrepare(block_at(1)))
            .unwrap();
        assert!(matches!(
            machine.step(ConsensusEvent::PrePrepare(block_at(1))),
            Err(ConsensusError::PhaseMismatch(_))
        ));
    }

    #[test]
    fn test_no_commit_before_prepare_quorum() {
        // Quorum for 4 validators is 3: the own vote plus one peer must
        // not produce a Commit vote.
        let mut machine = core();
        let block = block_at(1);
        let hash = block.hash();
        let effects = machine.step(ConsensusEvent::PrePrepare(block)).unwrap();
        let own = match &effects[0] {
            Effect::CastVote(v) => v.clone(),
            Effect::Finalize(_) => panic!("unexpected finalize"),
        };
        assert!(machine
            .step(ConsensusEvent::VoteReceived(own))
            .unwrap()
            .is_empty());
        let effects = machine
            .step(ConsensusEvent::VoteReceived(vote("node-1", hash, VotePhase::Prepare)))
            .unwrap();
        assert!(effects.is_empty());
        assert_eq!(machine.phase(), Phase::Prepare);
        assert_eq!(machine.prepare_count(&hash), 2);
    }

    #[test]
    fn test_prepare_quorum_casts_commit() {
        let mut machine = core();
        let block = block_at(1);
        let hash = block.hash();
        let effects = machine.step(ConsensusEvent::PrePrepare(block)).unwrap();
        let own = match &effects[0] {
            Effect::CastVote(v) => v.clone(),
            Effect::Finalize(_) => panic!("unexpected finalize"),
        };
        machine.step(ConsensusEvent::VoteReceived(own)).unwrap();
        machine
            .step(ConsensusEvent::VoteReceived(vote("node-1", hash, VotePhase::Prepare)))
            .unwrap();
        let effects = machine
            .step(ConsensusEvent::VoteReceived(vote("node-2", hash, VotePhase::Prepare)))
            .unwrap();
        assert!(matches!(
            &effects[0],
            Effect::CastVote(v) if v.phase == VotePhase::Commit
        ));
        assert_eq!(machine.phase(), Phase::Commit);
    }

    #[test]
    fn test_commit_quorum_finalizes_and_resets() {
        let mut machine = core();
        let block = block_at(1);
        let hash = block.hash();
        let own_prepare = match &machine.step(ConsensusEvent::PrePrepare(block)).unwrap()[0] {
            Effect::CastVote(v) => v.clone(),
            Effect::Finalize(_) => panic!("unexpected finalize"),
        };
        machine
            .step(ConsensusEvent::VoteReceived(own_prepare))
            .unwrap();
        machine
            .step(ConsensusEvent::VoteReceived(vote("node-1", hash, VotePhase::Prepare)))
            .unwrap();
        let own_commit = match &machine
            .step(ConsensusEvent::VoteReceived(vote("node-2", hash, VotePhase::Prepare)))
            .unwrap()[0]
        {
            Effect::CastVote(v) => v.clone(),
            Effect::Finalize(_) => panic!("unexpected finalize"),
        };
        machine.step(ConsensusEvent::VoteReceived(own_commit)).unwrap();
        machine
            .step(ConsensusEvent::VoteReceived(vote("node-1", hash, VotePhase::Commit)))
            .unwrap();
        let effects = machine
            .step(ConsensusEvent::VoteReceived(vote("node-2", hash, VotePhase::Commit)))
            .unwrap();
        assert!(matches!(&effects[0], Effect::Finalize(b) if b.header.height == 1));
        assert_eq!(machine.phase(), Phase::Idle);
        assert_eq!(machine.next_height(), 2);
        assert_eq!(machine.prepare_count(&hash), 0);
        assert_eq!(machine.commit_count(&hash), 0);
    }

    #[test]
    fn test_double_vote_rejected_without_tally_change() {
        let mut machine = core();
        let block = block_at(1);
        let hash = block.hash();
        machine.step(ConsensusEvent::PrePrepare(block)).unwrap();
        machine
            .step(ConsensusEvent::VoteReceived(vote("node-1", hash, VotePhase::Prepare)))
            .unwrap();
        let err = machine
            .step(ConsensusEvent::VoteReceived(vote("node-1", hash, VotePhase::Prepare)))
            .unwrap_err();
        assert!(matches!(err, ConsensusError::DoubleVote { .. }));
        assert_eq!(machine.prepare_count(&hash), 1);
    }

    #[test]
    fn test_unknown_voter_rejected() {
        let mut machine = core();
        let hash = block_at(1).hash();
        assert!(matches!(
            machine.step(ConsensusEvent::VoteReceived(vote(
                "stranger",
                hash,
                VotePhase::Prepare
            ))),
            Err(ConsensusError::UnknownVoter(_))
        ));
    }

    #[test]
    fn test_disapproving_votes_are_not_tallied() {
        let mut machine = core();
        let hash = block_at(1).hash();
        let mut nay = vote("node-1", hash, VotePhase::Prepare);
        nay.approve = false;
        assert!(machine.step(ConsensusEvent::VoteReceived(nay)).unwrap().is_empty());
        assert_eq!(machine.prepare_count(&hash), 0);
    }

    #[test]
    fn test_replayed_prepare_suppresses_second_own_vote() {
        let mut machine = core();
        let block = block_at(1);
        let hash = block.hash();
        machine.replay(&vote("node-0", hash, VotePhase::Prepare));

        let effects = machine.step(ConsensusEvent::PrePrepare(block)).unwrap();
        assert!(effects.is_empty(), "must not cast a second prepare");
        assert_eq!(machine.phase(), Phase::Prepare);
        assert_eq!(machine.prepare_count(&hash), 1);

        // Peer prepares complete the quorum; the machine moves to Commit.
        machine
            .step(ConsensusEvent::VoteReceived(vote("node-1", hash, VotePhase::Prepare)))
            .unwrap();
        let effects = machine
            .step(ConsensusEvent::VoteReceived(vote("node-2", hash, VotePhase::Prepare)))
            .unwrap();
        assert!(matches!(
            &effects[0],
            Effect::CastVote(v) if v.phase == VotePhase::Commit
        ));
    }

    #[test]
    fn test_votes_for_other_blocks_do_not_advance_pending() {
        let mut machine = core();
        let block = block_at(1);
        let pending_hash = block.hash();
        machine.step(ConsensusEvent::PrePrepare(block)).unwrap();

        let other = [0xEE; 32];
        for peer in ["node-1", "node-2", "node-3"] {
            let _ = machine.step(ConsensusEvent::VoteReceived(vote(
                peer,
                other,
                VotePhase::Prepare,
            )));
        }
        // Quorum exists for a block that is not pending: no commit vote.
        assert_eq!(machine.phase(), Phase::Prepare);
        assert_eq!(machine.prepare_count(&other), 3);
        // The own prepare has not been fed back yet.
        assert_eq!(machine.prepare_count(&pending_hash), 0);
    }
}
