//! # Ed25519 Signatures & Address Derivation
//!
//! Seed-based keypairs with deterministic signing, plus the two address
//! derivations the chain uses:
//!
//! - account addresses: `k:<hex(pubkey)>`
//! - contract addresses: the trailing 20 bytes of
//!   `SHA-256(sender || nonce)`, rendered as a simple hex name

use crate::errors::CryptoError;
use crate::hashing::sha256_concat;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use terrace_types::{Address, PublicKey, Signature};
use zeroize::Zeroize;

/// An Ed25519 keypair owned by this node or a wallet.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a fresh random keypair.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut rand::thread_rng()),
        }
    }

    /// Rebuild a keypair from its 32-byte secret seed.
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// The 32-byte public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The `k:`-form address owned by this keypair.
    #[must_use]
    pub fn address(&self) -> Address {
        derive_address(&self.public_key())
    }

    /// Sign a message. Deterministic: equal inputs give equal signatures.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message).to_bytes()
    }

    /// The secret seed, for durable storage.
    #[must_use]
    pub fn to_seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl Drop for Keypair {
    fn drop(&mut self) {
        let mut seed = self.signing_key.to_bytes();
        seed.zeroize();
    }
}

/// Verify a 64-byte signature over `message` against a 32-byte public key.
pub fn verify(message: &[u8], signature: &Signature, public_key: &PublicKey) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig = ed25519_dalek::Signature::from_bytes(signature);
    key.verify(message, &sig)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// Derive the public key for a secret seed.
#[must_use]
pub fn derive_public_key(seed: [u8; 32]) -> PublicKey {
    Keypair::from_seed(seed).public_key()
}

/// Render a public key as its `k:`-form account address.
#[must_use]
pub fn derive_address(public_key: &PublicKey) -> Address {
    Address::KeyBased(*public_key)
}

/// Deterministic contract address for a deployment: the trailing 20 bytes
/// of `SHA-256(canonical(sender) || nonce_be)`, hex-rendered as a simple
/// name.
#[must_use]
pub fn contract_address(sender: &Address, nonce: u64) -> Address {
    let digest = sha256_concat(&[&sender.canonical_bytes(), &nonce.to_be_bytes()]);
    Address::Simple(hex::encode(&digest[12..]))
}
