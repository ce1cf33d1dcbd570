//! # Peer Message Codec
//!
//! The line-framed gossip envelope:
//!
//! ```text
//! typeCode(int)|timestamp(u64)|senderId|payload
//! ```
//!
//! with type-dependent payloads: votes travel as
//! `phase|voterId|hex(blockHash)|approve`, blocks as the hex of their wire
//! encoding. Socket transport is an external collaborator; this module
//! only encodes and decodes, and every malformed input is an error that
//! drops the message.

use terrace_types::codec;
use terrace_types::{Block, DecodeError, Hash, Vote, VotePhase};
use thiserror::Error;

/// Gossip decode failure.
#[derive(Debug, Error)]
pub enum GossipError {
    /// The envelope or a payload field was malformed.
    #[error("malformed gossip message: {0}")]
    Malformed(String),

    /// An embedded block failed wire decoding.
    #[error(transparent)]
    Block(#[from] DecodeError),
}

/// Message kinds on the gossip wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// A consensus vote.
    Vote,
    /// A full block.
    Block,
}

impl MessageKind {
    fn code(self) -> u8 {
        match self {
            MessageKind::Vote => 1,
            MessageKind::Block => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MessageKind::Vote),
            2 => Some(MessageKind::Block),
            _ => None,
        }
    }
}

/// A decoded gossip envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerMessage {
    /// What the payload carries.
    pub kind: MessageKind,
    /// Sender-side Unix timestamp.
    pub timestamp: u64,
    /// Sender's node identity.
    pub sender_id: String,
    /// Kind-dependent payload text.
    pub payload: String,
}

/// Render an envelope to its wire line.
#[must_use]
pub fn encode_message(message: &PeerMessage) -> String {
    format!(
        "{}|{}|{}|{}",
        message.kind.code(),
        message.timestamp,
        message.sender_id,
        message.payload
    )
}

/// Parse a wire line into an envelope.
pub fn decode_message(line: &str) -> Result<PeerMessage, GossipError> {
    let mut parts = line.splitn(4, '|');
    let code = parts
        .next()
        .ok_or_else(|| GossipError::Malformed("empty message".into()))?
        .parse::<u8>()
        .map_err(|_| GossipError::Malformed("bad type code".into()))?;
    let kind = MessageKind::from_code(code)
        .ok_or_else(|| GossipError::Malformed(format!("unknown type code {code}")))?;
    let timestamp = parts
        .next()
        .ok_or_else(|| GossipError::Malformed("missing timestamp".into()))?
        .parse::<u64>()
        .map_err(|_| GossipError::Malformed("bad timestamp".into()))?;
    let sender_id = parts
        .next()
        .ok_or_else(|| GossipError::Malformed("missing sender".into()))?
        .to_owned();
    let payload = parts
        .next()
        .ok_or_else(|| GossipError::Malformed("missing payload".into()))?
        .to_owned();
    Ok(PeerMessage {
        kind,
        timestamp,
        sender_id,
        payload,
    })
}

/// Render a vote payload: `phase|voterId|hex(blockHash)|approve`.
#[must_use]
pub fn encode_vote_payload(vote: &Vote) -> String {
    format!(
        "{}|{}|{}|{}",
        vote.phase.tag(),
        vote.voter_id,
        hex::encode(vote.block_hash),
        u8::from(vote.approve)
    )
}

/// Parse a vote payload. The wire carries no signature; the consensus
/// layer enforces committee membership instead.
pub fn decode_vote_payload(payload: &str) -> Result<Vote, GossipError> {
    let fields: Vec<&str> = payload.split('|').collect();
    if fields.len() != 4 {
        return Err(GossipError::Malformed(format!(
            "vote payload has {} fields, expected 4",
            fields.len()
        )));
    }
    let phase = VotePhase::from_tag(fields[0])
        .ok_or_else(|| GossipError::Malformed(format!("unknown phase {:?}", fields[0])))?;
    let raw = hex::decode(fields[2])
        .map_err(|_| GossipError::Malformed("bad block hash hex".into()))?;
    let block_hash: Hash = raw
        .try_into()
        .map_err(|_| GossipError::Malformed("block hash is not 32 bytes".into()))?;
    let approve = match fields[3] {
        "1" => true,
        "0" => false,
        other => {
            return Err(GossipError::Malformed(format!(
                "bad approve flag {other:?}"
            )))
        }
    };
    Ok(Vote {
        voter_id: fields[1].to_owned(),
        block_hash,
        approve,
        signature: Vec::new(),
        phase,
    })
}

/// Render a block payload: hex of the canonical wire encoding.
#[must_use]
pub fn encode_block_payload(block: &Block) -> String {
    hex::encode(codec::encode_block(block))
}

/// Parse a block payload.
pub fn decode_block_payload(payload: &str) -> Result<Block, GossipError> {
    let raw = hex::decode(payload)
        .map_err(|_| GossipError::Malformed("block payload is not hex".into()))?;
    Ok(codec::decode_block(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrace_types::{Address, BlockHeader, Transaction, ZERO_HASH};

    fn sample_vote() -> Vote {
        Vote {
            voter_id: "node-2".into(),
            block_hash: [0xCD; 32],
            approve: true,
            signature: Vec::new(),
            phase: VotePhase::Commit,
        }
    }

    fn sample_block() -> Block {
        Block {
            header: BlockHeader {
                height: 3,
                timestamp: 1_700_000_000,
                previous_hash: [1; 32],
                state_root: [2; 32],
                tx_root: ZERO_HASH,
                producer: Address::Simple("node-1".into()),
                signature: [7; 64],
            },
            transactions: vec![Transaction::new(
                Address::Simple("alice".into()),
                Some(Address::Simple("bob".into())),
                12,
                0,
                21_000,
                1,
                vec![],
            )],
        }
    }

    #[test]
    fn test_envelope_roundtrip() {
        let message = PeerMessage {
            kind: MessageKind::Vote,
            timestamp: 1_700_000_000,
            sender_id: "node-2".into(),
            payload: encode_vote_payload(&sample_vote()),
        };
        let line = encode_message(&message);
        assert!(line.starts_with("1|1700000000|node-2|COMMIT|"));
        assert_eq!(decode_message(&line).unwrap(), message);
    }

    #[test]
    fn test_vote_payload_roundtrip() {
        let vote = sample_vote();
        let decoded = decode_vote_payload(&encode_vote_payload(&vote)).unwrap();
        assert_eq!(decoded, vote);
    }

    #[test]
    fn test_block_payload_roundtrip() {
        let block = sample_block();
        let decoded = decode_block_payload(&encode_block_payload(&block)).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn test_malformed_envelopes_rejected() {
        assert!(decode_message("").is_err());
        assert!(decode_message("9|0|x|y").is_err());
        assert!(decode_message("1|notatime|x|y").is_err());
        assert!(decode_message("1|0|onlysender").is_err());
    }

    #[test]
    fn test_malformed_vote_payloads_rejected() {
        assert!(decode_vote_payload("PREPARE|v|zz|1").is_err());
        assert!(decode_vote_payload("PRECOMMIT|v|00|1").is_err());
        assert!(decode_vote_payload(&format!("PREPARE|v|{}|2", "00".repeat(32))).is_err());
        assert!(decode_vote_payload("PREPARE|v").is_err());
    }

    #[test]
    fn test_corrupt_block_payload_rejected() {
        assert!(decode_block_payload("nothex").is_err());
        let mut hex_payload = encode_block_payload(&sample_block());
        hex_payload.truncate(hex_payload.len() - 8);
        assert!(decode_block_payload(&hex_payload).is_err());
    }
}
