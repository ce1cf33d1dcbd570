//! # Precompile Registry
//!
//! Built-in contracts reachable via STATICCALL at reserved addresses 1..9.
//! The registry is a plug-in surface: the node registers implementations
//! at bootstrap, so heavyweight verifiers never have to live inside the
//! VM crate.
//!
//! Default registrations:
//!
//! | address | contract |
//! |---|---|
//! | `0x02` | SHA-256 of the input |
//! | `0x04` | identity (returns the input) |
//! | `0x09` | Groth16-shaped proof verifier (see [`verifier`]) |

pub mod verifier;

use std::collections::HashMap;
use std::sync::Arc;
use terrace_crypto::sha256;

/// Lowest reserved precompile address.
pub const PRECOMPILE_MIN: u64 = 1;
/// Highest reserved precompile address.
pub const PRECOMPILE_MAX: u64 = 9;

/// Base gas for the SHA-256 precompile.
pub const SHA256_GAS: u64 = 60;
/// Base gas for the identity precompile.
pub const IDENTITY_GAS: u64 = 15;

/// A precompile body: input bytes to output bytes, `None` on failure.
pub type PrecompileFn = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// One registered precompile.
#[derive(Clone)]
pub struct Precompile {
    /// Gas charged before the body runs.
    pub base_gas: u64,
    /// The body.
    pub run: PrecompileFn,
}

/// The dispatch table for reserved addresses.
#[derive(Clone, Default)]
pub struct PrecompileRegistry {
    entries: HashMap<u64, Precompile>,
}

impl PrecompileRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the stock contracts installed, using the given
    /// pairing backend for the proof verifier at address 9.
    #[must_use]
    pub fn with_defaults(pairing: Arc<dyn verifier::PairingCheck>) -> Self {
        let mut registry = Self::new();
        registry.register(2, SHA256_GAS, |input| Some(sha256(input).to_vec()));
        registry.register(4, IDENTITY_GAS, |input| Some(input.to_vec()));
        registry.register(9, verifier::PROOF_VERIFY_GAS, move |input| {
            verifier::run(input, pairing.as_ref())
        });
        registry
    }

    /// Install (or replace) a precompile at a reserved address.
    ///
    /// Out-of-range addresses are ignored with a warning rather than
    /// silently shadowing contract space.
    pub fn register<F>(&mut self, address: u64, base_gas: u64, run: F)
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        if !(PRECOMPILE_MIN..=PRECOMPILE_MAX).contains(&address) {
            tracing::warn!(address, "ignoring precompile outside reserved range");
            return;
        }
        self.entries.insert(
            address,
            Precompile {
                base_gas,
                run: Arc::new(run),
            },
        );
    }

    /// Look up the precompile at `address`.
    #[must_use]
    pub fn get(&self, address: u64) -> Option<&Precompile> {
        self.entries.get(&address)
    }

    /// Whether `address` falls in the reserved range (registered or not).
    #[must_use]
    pub fn is_reserved(address: u64) -> bool {
        (PRECOMPILE_MIN..=PRECOMPILE_MAX).contains(&address)
    }
}
