//! # 256-bit Words
//!
//! Re-exports `primitive_types::U256` as the VM word type and adds the
//! machine-level conventions on top: wrapping arithmetic, division and
//! modulo by zero yielding zero, shifts of 256 or more yielding zero, and
//! big-endian byte / `0x`-hex I/O.

pub use primitive_types::U256;

/// Wrapping addition mod 2^256.
#[must_use]
pub fn add(a: U256, b: U256) -> U256 {
    a.overflowing_add(b).0
}

/// Wrapping subtraction mod 2^256.
#[must_use]
pub fn sub(a: U256, b: U256) -> U256 {
    a.overflowing_sub(b).0
}

/// Wrapping multiplication mod 2^256.
#[must_use]
pub fn mul(a: U256, b: U256) -> U256 {
    a.overflowing_mul(b).0
}

/// Unsigned division; division by zero yields zero.
#[must_use]
pub fn div(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        U256::zero()
    } else {
        a / b
    }
}

/// Unsigned modulo; modulo by zero yields zero.
#[must_use]
pub fn rem(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        U256::zero()
    } else {
        a % b
    }
}

/// Logical left shift; shifts of 256 or more yield zero.
#[must_use]
pub fn shl(value: U256, shift: U256) -> U256 {
    if shift >= U256::from(256u32) {
        U256::zero()
    } else {
        value << shift.as_usize()
    }
}

/// Logical right shift; shifts of 256 or more yield zero.
#[must_use]
pub fn shr(value: U256, shift: U256) -> U256 {
    if shift >= U256::from(256u32) {
        U256::zero()
    } else {
        value >> shift.as_usize()
    }
}

/// Two's-complement negation, so `add(a, neg(a)) == 0`.
#[must_use]
pub fn neg(a: U256) -> U256 {
    (!a).overflowing_add(U256::one()).0
}

/// Serialize to a 32-byte big-endian array.
#[must_use]
pub fn to_be_bytes(value: U256) -> [u8; 32] {
    let mut out = [0u8; 32];
    value.to_big_endian(&mut out);
    out
}

/// Parse from big-endian bytes. Inputs shorter than 32 bytes are
/// right-aligned; longer inputs keep the trailing 32 bytes.
#[must_use]
pub fn from_be_bytes(bytes: &[u8]) -> U256 {
    if bytes.len() <= 32 {
        U256::from_big_endian(bytes)
    } else {
        U256::from_big_endian(&bytes[bytes.len() - 32..])
    }
}

/// Render as minimal `0x`-prefixed hex.
#[must_use]
pub fn to_hex(value: U256) -> String {
    format!("{value:#x}")
}

/// Error from [`from_hex`]: the input was not a hex number that fits in
/// 256 bits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid 256-bit hex literal: {0:?}")]
pub struct ParseWordError(pub String);

/// Parse from hex, with or without the `0x` prefix.
pub fn from_hex(s: &str) -> Result<U256, ParseWordError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    U256::from_str_radix(digits, 16).map_err(|_| ParseWordError(s.to_owned()))
}
