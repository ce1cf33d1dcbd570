//! Crypto error types.

use thiserror::Error;

/// Errors from key handling and signature verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// The 32 bytes are not a valid Ed25519 public key point.
    #[error("invalid Ed25519 public key")]
    InvalidPublicKey,

    /// Signature did not verify against the message and key.
    #[error("signature verification failed")]
    VerificationFailed,
}
