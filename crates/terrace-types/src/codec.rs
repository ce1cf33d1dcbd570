//! # Canonical Wire Codec
//!
//! The self-describing binary layout blocks travel in, with little-endian
//! integers and `u32` length prefixes for variable fields:
//!
//! ```text
//! header := height(u64) || timestamp(u64) || prevHash(32) || stateRoot(32) ||
//!           txRoot(32) || producerLen(u32) || producer || signature(64)
//! tx     := senderLen(u32) || sender || receiverLen(u32) || receiver ||
//!           amount(u64) || nonce(u64) || gasLimit(u64) || gasPrice(u64) ||
//!           dataLen(u32) || data || sigLen(u32) || signature
//! block  := header || txCount(u32) || { txLen(u32) || tx } * txCount
//! ```
//!
//! Signing bytes for transactions and headers are the same layouts with
//! the trailing signature field omitted. Every length read is bounds
//! checked; an overrun is a [`DecodeError`], never a panic.

use crate::address::Address;
use crate::entities::{Block, BlockHeader, Transaction};
use crate::errors::DecodeError;

/// Upper bound on any single variable-length field.
const MAX_FIELD_LEN: usize = 4 * 1024 * 1024;
/// Upper bound on transactions per block.
const MAX_TX_COUNT: usize = 65_536;

// =============================================================================
// READER
// =============================================================================

/// Bounds-checked cursor over wire bytes.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::Truncated {
                offset: self.pos,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let raw = self.take(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(raw);
        Ok(u64::from_le_bytes(bytes))
    }

    fn read_hash(&mut self) -> Result<[u8; 32], DecodeError> {
        let raw = self.take(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(raw);
        Ok(out)
    }

    fn read_signature(&mut self) -> Result<[u8; 64], DecodeError> {
        let raw = self.take(64)?;
        let mut out = [0u8; 64];
        out.copy_from_slice(raw);
        Ok(out)
    }

    /// Read a u32 length prefix and the bytes it announces.
    fn read_var_bytes(&mut self, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let len = self.read_u32()? as usize;
        if len > MAX_FIELD_LEN {
            return Err(DecodeError::LengthOverflow {
                field,
                len,
                limit: MAX_FIELD_LEN,
            });
        }
        self.take(len)
    }

    fn read_string(&mut self, field: &'static str) -> Result<&'a str, DecodeError> {
        let raw = self.read_var_bytes(field)?;
        std::str::from_utf8(raw).map_err(|_| DecodeError::BadUtf8(field))
    }

    fn finish(self) -> Result<(), DecodeError> {
        if self.remaining() != 0 {
            return Err(DecodeError::TrailingBytes(self.remaining()));
        }
        Ok(())
    }
}

// =============================================================================
// WRITER HELPERS
// =============================================================================

fn put_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn put_address(out: &mut Vec<u8>, addr: &Address) {
    put_var_bytes(out, &addr.canonical_bytes());
}

fn put_opt_address(out: &mut Vec<u8>, addr: &Option<Address>) {
    match addr {
        Some(a) => put_address(out, a),
        None => put_var_bytes(out, &[]),
    }
}

// =============================================================================
// TRANSACTIONS
// =============================================================================

/// The unsigned transaction layout: everything up to and excluding the
/// signature field. This feeds hashing and signing.
#[must_use]
pub fn tx_signing_bytes(tx: &Transaction) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + tx.data.len());
    put_address(&mut out, &tx.sender);
    put_opt_address(&mut out, &tx.receiver);
    out.extend_from_slice(&tx.amount.to_le_bytes());
    out.extend_from_slice(&tx.nonce.to_le_bytes());
    out.extend_from_slice(&tx.gas_limit.to_le_bytes());
    out.extend_from_slice(&tx.gas_price.to_le_bytes());
    put_var_bytes(&mut out, &tx.data);
    out
}

/// Full wire encoding of one transaction.
#[must_use]
pub fn encode_tx(tx: &Transaction) -> Vec<u8> {
    let mut out = tx_signing_bytes(tx);
    put_var_bytes(&mut out, &tx.signature);
    out
}

fn decode_tx_inner(r: &mut Reader<'_>) -> Result<Transaction, DecodeError> {
    let sender = Address::parse(r.read_string("sender")?)?;
    let receiver_raw = r.read_string("receiver")?;
    let receiver = if receiver_raw.is_empty() {
        None
    } else {
        Some(Address::parse(receiver_raw)?)
    };
    let amount = r.read_u64()?;
    let nonce = r.read_u64()?;
    let gas_limit = r.read_u64()?;
    let gas_price = r.read_u64()?;
    let data = r.read_var_bytes("data")?.to_vec();
    let sig_raw = r.read_var_bytes("signature")?;
    let mut signature = [0u8; 64];
    if sig_raw.len() == 64 {
        signature.copy_from_slice(sig_raw);
    } else if !sig_raw.is_empty() {
        return Err(DecodeError::LengthOverflow {
            field: "signature",
            len: sig_raw.len(),
            limit: 64,
        });
    }

    let mut tx = Transaction {
        sender,
        receiver,
        amount,
        nonce,
        gas_limit,
        gas_price,
        data,
        signature,
        hash: [0u8; 32],
    };
    tx.seal();
    Ok(tx)
}

/// Decode a single transaction, rejecting trailing bytes.
pub fn decode_tx(bytes: &[u8]) -> Result<Transaction, DecodeError> {
    let mut r = Reader::new(bytes);
    let tx = decode_tx_inner(&mut r)?;
    r.finish()?;
    Ok(tx)
}

// =============================================================================
// HEADERS & BLOCKS
// =============================================================================

/// The unsigned header layout; the producer signs SHA-256 of these bytes.
#[must_use]
pub fn header_signing_bytes(header: &BlockHeader) -> Vec<u8> {
    let mut out = Vec::with_capacity(160);
    out.extend_from_slice(&header.height.to_le_bytes());
    out.extend_from_slice(&header.timestamp.to_le_bytes());
    out.extend_from_slice(&header.previous_hash);
    out.extend_from_slice(&header.state_root);
    out.extend_from_slice(&header.tx_root);
    put_address(&mut out, &header.producer);
    out
}

/// Full wire encoding of a header.
#[must_use]
pub fn encode_header(header: &BlockHeader) -> Vec<u8> {
    let mut out = header_signing_bytes(header);
    out.extend_from_slice(&header.signature);
    out
}

fn decode_header_inner(r: &mut Reader<'_>) -> Result<BlockHeader, DecodeError> {
    let height = r.read_u64()?;
    let timestamp = r.read_u64()?;
    let previous_hash = r.read_hash()?;
    let state_root = r.read_hash()?;
    let tx_root = r.read_hash()?;
    let producer = Address::parse(r.read_string("producer")?)?;
    let signature = r.read_signature()?;
    Ok(BlockHeader {
        height,
        timestamp,
        previous_hash,
        state_root,
        tx_root,
        producer,
        signature,
    })
}

/// Full wire encoding of a block.
#[must_use]
pub fn encode_block(block: &Block) -> Vec<u8> {
    let mut out = encode_header(&block.header);
    out.extend_from_slice(&(block.transactions.len() as u32).to_le_bytes());
    for tx in &block.transactions {
        let tx_bytes = encode_tx(tx);
        put_var_bytes(&mut out, &tx_bytes);
    }
    out
}

/// Decode a block, rejecting truncation, oversized counts and trailing
/// bytes.
pub fn decode_block(bytes: &[u8]) -> Result<Block, DecodeError> {
    let mut r = Reader::new(bytes);
    let header = decode_header_inner(&mut r)?;
    let tx_count = r.read_u32()? as usize;
    if tx_count > MAX_TX_COUNT {
        return Err(DecodeError::LengthOverflow {
            field: "tx_count",
            len: tx_count,
            limit: MAX_TX_COUNT,
        });
    }
    let mut transactions = Vec::with_capacity(tx_count.min(1024));
    for _ in 0..tx_count {
        let tx_bytes = r.read_var_bytes("tx")?;
        transactions.push(decode_tx(tx_bytes)?);
    }
    r.finish()?;
    Ok(Block {
        header,
        transactions,
    })
}
