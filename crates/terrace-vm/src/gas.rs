//! # Gas Schedule
//!
//! Static per-opcode base costs in a dense table indexed by opcode byte,
//! plus the dynamic cost formulas (memory expansion lives with
//! [`crate::memory`]).

/// Named cost constants.
pub mod costs {
    /// Cheap ALU operations (ADD, comparisons, bitwise).
    pub const VERY_LOW: u64 = 3;
    /// MUL, DIV, MOD.
    pub const LOW: u64 = 5;
    /// JUMP.
    pub const MID: u64 = 8;
    /// JUMPI.
    pub const HIGH: u64 = 10;
    /// POP and other trivial stack ops.
    pub const BASE: u64 = 2;
    /// JUMPDEST marker.
    pub const JUMPDEST: u64 = 1;
    /// Storage read.
    pub const SLOAD: u64 = 800;
    /// Storage write setting a non-zero value.
    pub const SSTORE_SET: u64 = 20_000;
    /// Storage write clearing a slot to zero.
    pub const SSTORE_CLEAR: u64 = 5_000;
    /// LOG base cost.
    pub const LOG: u64 = 375;
    /// LOG cost per topic.
    pub const LOG_TOPIC: u64 = 375;
    /// LOG cost per payload byte.
    pub const LOG_DATA: u64 = 8;
    /// STATICCALL base cost.
    pub const STATIC_CALL: u64 = 700;
    /// Intrinsic cost of any transaction (covers a pure transfer).
    pub const TX_INTRINSIC: u64 = 21_000;
}

/// Static base gas per opcode byte. Dynamic parts (SSTORE flavour, log
/// payload, memory growth, forwarded call gas) are charged at the
/// operation.
#[rustfmt::skip]
pub const BASE_GAS: [u64; 256] = {
    let mut table = [0u64; 256];

    table[0x00] = 0;                  // STOP
    table[0x01] = costs::VERY_LOW;    // ADD
    table[0x02] = costs::LOW;         // MUL
    table[0x03] = costs::VERY_LOW;    // SUB
    table[0x04] = costs::LOW;         // DIV
    table[0x06] = costs::LOW;         // MOD
    table[0x10] = costs::VERY_LOW;    // LT
    table[0x11] = costs::VERY_LOW;    // GT
    table[0x14] = costs::VERY_LOW;    // EQ
    table[0x15] = costs::VERY_LOW;    // ISZERO
    table[0x16] = costs::VERY_LOW;    // AND
    table[0x17] = costs::VERY_LOW;    // OR
    table[0x18] = costs::VERY_LOW;    // XOR
    table[0x19] = costs::VERY_LOW;    // NOT
    table[0x1B] = costs::VERY_LOW;    // SHL
    table[0x1C] = costs::VERY_LOW;    // SHR
    table[0x35] = costs::VERY_LOW;    // CALLDATALOAD
    table[0x36] = costs::BASE;        // CALLDATASIZE
    table[0x50] = costs::BASE;        // POP
    table[0x51] = costs::VERY_LOW;    // MLOAD
    table[0x52] = costs::VERY_LOW;    // MSTORE
    table[0x53] = costs::VERY_LOW;    // MSTORE8
    table[0x54] = costs::SLOAD;       // SLOAD
    table[0x55] = 0;                  // SSTORE (fully dynamic)
    table[0x56] = costs::MID;         // JUMP
    table[0x57] = costs::HIGH;        // JUMPI
    table[0x5B] = costs::JUMPDEST;    // JUMPDEST

    // PUSH1..PUSH32, DUP1..DUP16, SWAP1..SWAP16
    let mut i = 0x60;
    while i <= 0x9F {
        table[i] = costs::VERY_LOW;
        i += 1;
    }

    // LOG0..LOG4 carry their base; topics and bytes are dynamic.
    let mut i = 0xA0;
    while i <= 0xA4 {
        table[i] = costs::LOG;
        i += 1;
    }

    table[0xF3] = 0;                  // RETURN
    table[0xFA] = costs::STATIC_CALL; // STATICCALL
    table[0xFD] = 0;                  // REVERT
    table[0xFE] = 0;                  // INVALID (consumes everything)

    table
};

/// Dynamic part of a LOG: per-topic and per-byte charges on top of the
/// base already taken from the table.
#[must_use]
pub fn log_dynamic_gas(data_len: usize, topic_count: usize) -> u64 {
    costs::LOG_TOPIC * topic_count as u64 + costs::LOG_DATA * data_len as u64
}

/// Gas forwarded to a subcall: the requested amount, capped at 63/64 of
/// what remains so the caller can always finish.
#[must_use]
pub fn forwarded_call_gas(remaining: u64, requested: u64) -> u64 {
    let cap = remaining - remaining / 64;
    requested.min(cap)
}
