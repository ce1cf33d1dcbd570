//! VM error types.

use thiserror::Error;

/// A fault inside one contract execution. Faults are contained: the
/// executor turns them into a failed receipt that consumes all remaining
/// gas. The one exception is [`VmError::Backend`], which signals a storage
/// layer failure and aborts the whole transaction instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// Push beyond the 1024-element stack bound.
    #[error("stack overflow")]
    StackOverflow,

    /// Pop from an empty stack or too-shallow DUP/SWAP.
    #[error("stack underflow")]
    StackUnderflow,

    /// Jump target is not a JUMPDEST byte outside PUSH payloads.
    #[error("invalid jump destination {0}")]
    InvalidJump(usize),

    /// Gas exhausted mid-execution.
    #[error("out of gas")]
    OutOfGas,

    /// Unknown or explicitly invalid opcode.
    #[error("bad opcode 0x{0:02x}")]
    BadOpcode(u8),

    /// State mutation attempted inside a static call.
    #[error("state write inside static call")]
    WriteInStaticContext,

    /// STATICCALL nesting beyond the depth bound.
    #[error("call depth limit exceeded")]
    CallDepthExceeded,

    /// The storage backend failed; not a contract fault.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl VmError {
    /// Whether this error is a contained contract fault (as opposed to a
    /// storage failure that must abort the transaction).
    #[must_use]
    pub fn is_fault(&self) -> bool {
        !matches!(self, VmError::Backend(_))
    }
}
