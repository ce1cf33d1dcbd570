//! # Cryptographic Primitives
//!
//! SHA-256 content addressing and Ed25519 signatures for the terrace node,
//! plus address derivation from public keys.
//!
//! Signatures are deterministic (no RNG on the signing path) and secret
//! seeds are zeroized on drop. All hash inputs are canonical encodings
//! produced by `terrace-types`; nothing here consumes randomness except
//! explicit keypair generation.

mod errors;
mod hashing;
mod signatures;

pub use errors::CryptoError;
pub use hashing::{sha256, sha256_concat, Sha256Hasher};
pub use signatures::{contract_address, derive_address, derive_public_key, verify, Keypair};
