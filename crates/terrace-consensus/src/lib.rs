//! # PBFT-Style Consensus
//!
//! Round-robin leadership over a fixed committee, three-phase voting
//! (PrePrepare -> Prepare -> Commit) with `floor(2N/3) + 1` quorums, a durable
//! fsync-before-tally vote log, and the proposer/verifier pair that turns
//! mempool contents into verified blocks.

mod committee;
mod engine;
mod errors;
mod machine;
mod proposer;
mod verifier;
mod vote_log;

pub use committee::Committee;
pub use engine::{ConsensusEngine, FinalizedCallback, VoteBroadcaster};
pub use machine::{ConsensusCore, ConsensusEvent, Effect, Phase};
pub use errors::ConsensusError;
pub use proposer::{ProposeError, Proposer, MAX_BLOCK_TXS};
pub use verifier::BlockVerifier;
pub use vote_log::VoteLog;
