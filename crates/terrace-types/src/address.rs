//! # Account Addresses
//!
//! An address names an account or contract and comes in three shapes:
//!
//! - **Simple**: a bare name like `alice` (`[A-Za-z0-9_-]{3,64}`)
//! - **Key-based**: `k:<64-hex>`, carrying a 32-byte Ed25519 public key
//! - **Keyset-based**: `w:<64-hex>`, carrying a 32-byte keyset digest
//!
//! Ethereum-style `0x…` identifiers are rejected. Parsing normalises at the
//! boundary so the rest of the node only ever sees the tagged variant.

use crate::errors::AddressError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Minimum length of a simple name.
const SIMPLE_MIN: usize = 3;
/// Maximum length of a simple name.
const SIMPLE_MAX: usize = 64;

/// A parsed account address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// A bare user-chosen name.
    Simple(String),
    /// A single-key account, owned by the embedded public key.
    KeyBased([u8; 32]),
    /// A keyset-guarded account, identified by the keyset digest.
    KeysetBased([u8; 32]),
}

impl Address {
    /// Parse an address from its string form.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] for `0x…` identifiers, malformed `k:`/`w:`
    /// payloads, and simple names outside the allowed alphabet or length.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        if s.starts_with("0x") || s.starts_with("0X") {
            return Err(AddressError::HexPrefixed);
        }
        if let Some(hex_part) = s.strip_prefix("k:") {
            return decode_key_hex(hex_part, 'k').map(Address::KeyBased);
        }
        if let Some(hex_part) = s.strip_prefix("w:") {
            return decode_key_hex(hex_part, 'w').map(Address::KeysetBased);
        }

        let len = s.len();
        if len < SIMPLE_MIN || len > SIMPLE_MAX || !s.bytes().all(is_simple_char) {
            return Err(AddressError::BadSimpleName(s.to_owned()));
        }
        Ok(Address::Simple(s.to_owned()))
    }

    /// Whether a string is a well-formed address of any shape.
    #[must_use]
    pub fn is_valid(s: &str) -> bool {
        Self::parse(s).is_ok()
    }

    /// The embedded public key, when this is a `k:` address.
    #[must_use]
    pub fn public_key(&self) -> Option<&[u8; 32]> {
        match self {
            Address::KeyBased(pk) => Some(pk),
            _ => None,
        }
    }

    /// Canonical string rendering, identical to `Display`.
    #[must_use]
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    /// Canonical bytes for hashing. Hash inputs use these bytes, never the
    /// in-memory representation.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

fn is_simple_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

fn decode_key_hex(hex_part: &str, tag: char) -> Result<[u8; 32], AddressError> {
    if hex_part.len() != 64 {
        return Err(AddressError::BadKeyHex(tag));
    }
    let raw = hex::decode(hex_part).map_err(|_| AddressError::BadKeyHex(tag))?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&raw);
    Ok(out)
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Simple(name) => f.write_str(name),
            Address::KeyBased(pk) => write!(f, "k:{}", hex::encode(pk)),
            Address::KeysetBased(ks) => write!(f, "w:{}", hex::encode(ks)),
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

// Addresses sort by their canonical rendering; the state root relies on
// this order being total and stable.
impl Ord for Address {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.canonical().cmp(&other.canonical())
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::parse(&s).map_err(de::Error::custom)
    }
}
