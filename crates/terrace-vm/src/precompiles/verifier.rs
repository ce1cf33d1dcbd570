//! # Proof Verifier Precompile (address 9)
//!
//! Accepts a Groth16-shaped proof blob and returns a 32-byte word whose
//! least significant byte is 1 when the proof verifies, 0 otherwise.
//!
//! Input layout (big-endian, fixed offsets):
//!
//! ```text
//! A(64) || B(128) || C(64) || numInputs(32) || inputs[numInputs * 32]
//! ```
//!
//! The pairing equation itself is behind [`PairingCheck`], so deployments
//! supply an audited pairing library at bootstrap while the precompile
//! owns only the wire shape and gas.

use terrace_types::word::{self, U256};

/// Gas charged for one verification.
pub const PROOF_VERIFY_GAS: u64 = 50_000;

/// Bound on public inputs, to keep hostile blobs from allocating wildly.
pub const MAX_PUBLIC_INPUTS: usize = 256;

const A_LEN: usize = 64;
const B_LEN: usize = 128;
const C_LEN: usize = 64;
const HEADER_LEN: usize = A_LEN + B_LEN + C_LEN + 32;

/// A parsed proof blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofInput {
    /// G1 point A.
    pub a: [u8; 64],
    /// G2 point B.
    pub b: [u8; 128],
    /// G1 point C.
    pub c: [u8; 64],
    /// Public inputs, 32 bytes each.
    pub inputs: Vec<[u8; 32]>,
}

/// The pluggable pairing backend.
pub trait PairingCheck: Send + Sync {
    /// Whether the proof verifies against the public inputs.
    fn verify(&self, proof: &ProofInput) -> bool;
}

/// Stand-in pairing used outside production deployments: rejects proofs
/// with degenerate (all-zero) A or C points and accepts the rest. Real
/// nodes register an audited implementation at bootstrap.
pub struct ShapeCheckPairing;

impl PairingCheck for ShapeCheckPairing {
    fn verify(&self, proof: &ProofInput) -> bool {
        let a_zero = proof.a.iter().all(|b| *b == 0);
        let c_zero = proof.c.iter().all(|b| *b == 0);
        !(a_zero || c_zero)
    }
}

/// Parse the fixed-layout blob. Returns `None` on any shape violation.
#[must_use]
pub fn parse(input: &[u8]) -> Option<ProofInput> {
    if input.len() < HEADER_LEN {
        return None;
    }
    let mut a = [0u8; 64];
    a.copy_from_slice(&input[..A_LEN]);
    let mut b = [0u8; 128];
    b.copy_from_slice(&input[A_LEN..A_LEN + B_LEN]);
    let mut c = [0u8; 64];
    c.copy_from_slice(&input[A_LEN + B_LEN..A_LEN + B_LEN + C_LEN]);

    let count_word = word::from_be_bytes(&input[A_LEN + B_LEN + C_LEN..HEADER_LEN]);
    if count_word > U256::from(MAX_PUBLIC_INPUTS as u64) {
        return None;
    }
    let count = count_word.as_usize();
    if input.len() != HEADER_LEN + count * 32 {
        return None;
    }

    let mut inputs = Vec::with_capacity(count);
    for i in 0..count {
        let start = HEADER_LEN + i * 32;
        let mut word_bytes = [0u8; 32];
        word_bytes.copy_from_slice(&input[start..start + 32]);
        inputs.push(word_bytes);
    }
    Some(ProofInput { a, b, c, inputs })
}

/// Precompile body: parse, check, encode the result word.
#[must_use]
pub fn run(input: &[u8], pairing: &dyn PairingCheck) -> Option<Vec<u8>> {
    let proof = parse(input)?;
    let valid = pairing.verify(&proof);
    let mut out = vec![0u8; 32];
    out[31] = u8::from(valid);
    Some(out)
}
