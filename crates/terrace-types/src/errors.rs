//! Error types shared across the workspace boundary.

use thiserror::Error;

/// Failure while decoding wire bytes. Never retried; the transport layer
/// drops the offending message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A length prefix pointed past the end of the buffer.
    #[error("truncated input: needed {needed} bytes at offset {offset}, {remaining} remain")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    /// A declared length exceeds the sanity cap for its field.
    #[error("length {len} exceeds limit {limit} for {field}")]
    LengthOverflow {
        field: &'static str,
        len: usize,
        limit: usize,
    },

    /// Trailing bytes after a complete value.
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    /// An embedded address failed to parse.
    #[error("invalid address in wire data: {0}")]
    BadAddress(#[from] AddressError),

    /// A string field was not valid UTF-8.
    #[error("non-UTF-8 bytes in {0}")]
    BadUtf8(&'static str),
}

/// Failure while parsing an account address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Ethereum-style `0x…` identifiers are not part of the address space.
    #[error("0x-prefixed addresses are not supported")]
    HexPrefixed,

    /// A `k:`/`w:` form whose payload is not exactly 64 hex characters.
    #[error("expected 64 hex characters after `{0}:`")]
    BadKeyHex(char),

    /// A simple name outside `[A-Za-z0-9_-]{{3,64}}`.
    #[error("invalid simple name: {0:?}")]
    BadSimpleName(String),
}
