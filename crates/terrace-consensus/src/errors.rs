//! Consensus error types.

use terrace_state::StateError;
use thiserror::Error;

/// Why a consensus message was dropped or a block rejected. Message-level
/// errors never advance the phase machine; they are logged and discarded.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// The block producer is not the leader for this round.
    #[error("unauthorized producer {producer}, expected {expected}")]
    UnauthorizedProducer { producer: String, expected: String },

    /// A message arrived in a phase that cannot accept it.
    #[error("phase mismatch: {0}")]
    PhaseMismatch(String),

    /// Proposal height is not the next expected height.
    #[error("height mismatch: expected {expected}, got {actual}")]
    HeightMismatch { expected: u64, actual: u64 },

    /// A validator voted twice in the same phase for the same block.
    #[error("double {phase} vote from {voter}")]
    DoubleVote { voter: String, phase: &'static str },

    /// Vote from an identity outside the committee.
    #[error("vote from unknown validator {0}")]
    UnknownVoter(String),

    /// A key-based voter's signature did not verify.
    #[error("bad vote signature from {0}")]
    BadVoteSignature(String),

    /// Block re-execution or root comparison failed.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// State layer failure during verification.
    #[error(transparent)]
    State(#[from] StateError),

    /// The durable vote log could not be appended or synced. Counting a
    /// vote that might not survive a crash risks equivocation, so the
    /// node halts on this.
    #[error("fatal: vote log append failed: {0}")]
    LogAppend(#[from] std::io::Error),

    /// The vote log on disk is unreadable.
    #[error("fatal: vote log corrupt at line {line}: {reason}")]
    LogCorrupt { line: usize, reason: String },
}

impl ConsensusError {
    /// Whether the node must halt rather than continue (durability loss).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConsensusError::LogAppend(_) | ConsensusError::LogCorrupt { .. }
        )
    }
}
