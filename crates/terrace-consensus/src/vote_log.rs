//! # Durable Vote Log
//!
//! One line per vote, appended and fsync'd before the vote is tallied:
//!
//! ```text
//! TYPE|voterId|hex(blockHash)|approve
//! ```
//!
//! where `TYPE ∈ {PREPARE, COMMIT}` and `approve ∈ {0, 1}`. On restart the
//! log is replayed to rebuild tallies and the own-vote sets, which is what
//! prevents double-voting across a crash.

use crate::errors::ConsensusError;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use terrace_types::{Hash, Vote, VotePhase};

/// The per-node persistent vote log.
pub struct VoteLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl VoteLog {
    /// Open (or create) the log at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConsensusError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Append one vote and fsync. The caller must not tally the vote
    /// until this returns.
    pub fn append(&self, vote: &Vote) -> Result<(), ConsensusError> {
        let line = format!(
            "{}|{}|{}|{}\n",
            vote.phase.tag(),
            vote.voter_id,
            hex::encode(vote.block_hash),
            u8::from(vote.approve),
        );
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    /// Read every record back, oldest first. Missing file means an empty
    /// history; a malformed line is fatal corruption.
    pub fn replay(&self) -> Result<Vec<Vote>, ConsensusError> {
        replay_path(&self.path)
    }
}

fn replay_path(path: &Path) -> Result<Vec<Vote>, ConsensusError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut votes = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        votes.push(parse_line(&line).map_err(|reason| ConsensusError::LogCorrupt {
            line: index + 1,
            reason,
        })?);
    }
    Ok(votes)
}

fn parse_line(line: &str) -> Result<Vote, String> {
    let mut parts = line.split('|');
    let tag = parts.next().ok_or("missing type")?;
    let voter_id = parts.next().ok_or("missing voter")?;
    let hash_hex = parts.next().ok_or("missing block hash")?;
    let approve = parts.next().ok_or("missing approve flag")?;
    if parts.next().is_some() {
        return Err("trailing fields".into());
    }

    let phase = VotePhase::from_tag(tag).ok_or_else(|| format!("unknown type {tag:?}"))?;
    let raw = hex::decode(hash_hex).map_err(|_| "bad hash hex".to_string())?;
    let block_hash: Hash = raw
        .try_into()
        .map_err(|_| "hash is not 32 bytes".to_string())?;
    let approve = match approve {
        "1" => true,
        "0" => false,
        other => return Err(format!("bad approve flag {other:?}")),
    };

    Ok(Vote {
        voter_id: voter_id.to_owned(),
        block_hash,
        approve,
        signature: Vec::new(),
        phase,
    })
}
