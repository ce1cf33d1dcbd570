//! # Validator Committee
//!
//! The fixed, ordered list of validator identities every node knows.
//! Leadership rotates round-robin; quorum is `floor(2N/3) + 1`.

use serde::Deserialize;

/// The committee.
#[derive(Debug, Clone, Deserialize)]
pub struct Committee {
    members: Vec<String>,
}

impl Committee {
    /// Build a committee from its ordered member identities.
    #[must_use]
    pub fn new(members: Vec<String>) -> Self {
        Self { members }
    }

    /// Number of validators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the committee is empty (a configuration error).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Votes required for quorum: `floor(2N/3) + 1`.
    #[must_use]
    pub fn quorum(&self) -> usize {
        self.members.len() * 2 / 3 + 1
    }

    /// The leader for a round (round-robin).
    #[must_use]
    pub fn leader(&self, round: u64) -> Option<&str> {
        if self.members.is_empty() {
            return None;
        }
        let index = (round % self.members.len() as u64) as usize;
        Some(&self.members[index])
    }

    /// Whether `id` sits on the committee.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.members.iter().any(|m| m == id)
    }

    /// The ordered member identities.
    #[must_use]
    pub fn members(&self) -> &[String] {
        &self.members
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committee(n: usize) -> Committee {
        Committee::new((0..n).map(|i| format!("node-{i}")).collect())
    }

    #[test]
    fn test_quorum_sizes() {
        assert_eq!(committee(1).quorum(), 1);
        assert_eq!(committee(3).quorum(), 3);
        assert_eq!(committee(4).quorum(), 3);
        assert_eq!(committee(7).quorum(), 5);
        assert_eq!(committee(10).quorum(), 7);
    }

    #[test]
    fn test_leader_rotates_round_robin() {
        let c = committee(4);
        assert_eq!(c.leader(0), Some("node-0"));
        assert_eq!(c.leader(3), Some("node-3"));
        assert_eq!(c.leader(4), Some("node-0"));
        assert_eq!(c.leader(9), Some("node-1"));
    }

    #[test]
    fn test_empty_committee_has_no_leader() {
        assert_eq!(Committee::new(vec![]).leader(0), None);
    }

    #[test]
    fn test_membership() {
        let c = committee(2);
        assert!(c.contains("node-1"));
        assert!(!c.contains("node-9"));
    }
}
