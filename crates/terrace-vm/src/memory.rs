//! # Byte-Addressed Memory
//!
//! Linear memory growing in 32-byte words. Expansion is paid per new word
//! at a flat rate; reads and writes past the current size first expand and
//! charge, so memory use is always bounded by the gas limit.

use crate::errors::VmError;

/// Gas per freshly allocated 32-byte word.
pub const MEMORY_WORD_GAS: u64 = 3;

/// Hard cap on addressable memory, well above anything a sane gas limit
/// can pay for. Offsets past this are treated as out-of-gas.
pub const MAX_MEMORY_BYTES: usize = 1 << 25;

/// VM memory.
#[derive(Clone, Debug, Default)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Create empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Current size in bytes (always a multiple of 32).
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether no memory has been touched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current size in 32-byte words.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.data.len() / 32
    }

    /// Grow to cover `end` bytes, returning the expansion gas owed.
    /// A zero-length access never expands.
    pub fn expansion_gas(&mut self, end: usize) -> Result<u64, VmError> {
        if end > MAX_MEMORY_BYTES {
            return Err(VmError::OutOfGas);
        }
        let needed_words = end.div_ceil(32);
        let current_words = self.word_count();
        if needed_words <= current_words {
            return Ok(0);
        }
        let new_words = needed_words - current_words;
        self.data.resize(needed_words * 32, 0);
        Ok(MEMORY_WORD_GAS * new_words as u64)
    }

    /// Copy out `size` bytes at `offset`. The range must already be
    /// covered by a prior expansion.
    #[must_use]
    pub fn read(&self, offset: usize, size: usize) -> Vec<u8> {
        if size == 0 {
            return Vec::new();
        }
        self.data[offset..offset + size].to_vec()
    }

    /// Read a 32-byte word at `offset`.
    #[must_use]
    pub fn read_word(&self, offset: usize) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.data[offset..offset + 32]);
        out
    }

    /// Write bytes at `offset`.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Write one byte at `offset`.
    pub fn write_byte(&mut self, offset: usize, byte: u8) {
        self.data[offset] = byte;
    }
}
