//! # Interpreter
//!
//! The execution loop: fetch, charge base gas from the dense table,
//! dispatch. Machine faults (bad opcode, stack violation, invalid jump,
//! gas exhaustion) consume all remaining gas and surface as a failed
//! outcome; REVERT keeps the gas it actually burned and carries a reason;
//! storage backend failures abort the transaction instead of producing a
//! receipt.

use crate::errors::VmError;
use crate::gas::{self, costs, BASE_GAS};
use crate::memory::Memory;
use crate::opcodes::{analyze_jump_dests, Opcode};
use crate::precompiles::PrecompileRegistry;
use crate::stack::Stack;
use crate::StorageBackend;
use terrace_types::word::{self, U256};
use terrace_types::{Address, Hash, Log};

/// STATICCALL nesting bound.
pub const MAX_CALL_DEPTH: u32 = 1024;

/// The environment one contract frame executes in.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// The contract whose storage this frame owns.
    pub contract: Address,
    /// The immediate caller.
    pub caller: Address,
    /// Input bytes for CALLDATALOAD/CALLDATASIZE.
    pub call_data: Vec<u8>,
    /// Gas budget for this frame.
    pub gas_limit: u64,
    /// Whether state writes are forbidden.
    pub is_static: bool,
    /// Current call depth (0 for the outermost frame).
    pub depth: u32,
}

impl CallContext {
    /// Top-level context for executing `contract` with `call_data`.
    #[must_use]
    pub fn top_level(contract: Address, caller: Address, call_data: Vec<u8>, gas_limit: u64) -> Self {
        Self {
            contract,
            caller,
            call_data,
            gas_limit,
            is_static: false,
            depth: 0,
        }
    }
}

/// The result of one execution.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Whether execution completed without revert or fault.
    pub success: bool,
    /// RETURN (or REVERT) payload.
    pub output: Vec<u8>,
    /// Gas consumed; never exceeds the frame's gas limit.
    pub gas_used: u64,
    /// Logs emitted. Empty unless successful.
    pub logs: Vec<Log>,
    /// REVERT reason bytes, when the contract reverted explicitly.
    pub revert_reason: Option<Vec<u8>>,
    /// The machine fault that ended execution, if any.
    pub fault: Option<VmError>,
}

/// Execute `code` in `ctx` against `backend`.
///
/// # Errors
///
/// Only storage backend failures are returned as `Err`; every contract
/// fault is folded into the [`Outcome`].
pub fn execute<B: StorageBackend>(
    code: &[u8],
    ctx: CallContext,
    backend: &B,
    precompiles: &PrecompileRegistry,
) -> Result<Outcome, VmError> {
    let gas_limit = ctx.gas_limit;
    let mut frame = Frame::new(code, ctx, backend, precompiles);
    match frame.run() {
        Ok(()) => {
            let gas_used = gas_limit - frame.gas_remaining;
            if frame.reverted {
                Ok(Outcome {
                    success: false,
                    output: frame.output.clone(),
                    gas_used,
                    logs: Vec::new(),
                    revert_reason: Some(frame.output),
                    fault: None,
                })
            } else {
                Ok(Outcome {
                    success: true,
                    output: frame.output,
                    gas_used,
                    logs: frame.logs,
                    revert_reason: None,
                    fault: None,
                })
            }
        }
        Err(err) if err.is_fault() => Ok(Outcome {
            success: false,
            output: Vec::new(),
            gas_used: gas_limit,
            logs: Vec::new(),
            revert_reason: None,
            fault: Some(err),
        }),
        Err(backend_failure) => Err(backend_failure),
    }
}

struct Frame<'a, B: StorageBackend> {
    ctx: CallContext,
    code: &'a [u8],
    pc: usize,
    stack: Stack,
    memory: Memory,
    gas_remaining: u64,
    logs: Vec<Log>,
    output: Vec<u8>,
    return_data: Vec<u8>,
    jump_dests: Vec<bool>,
    backend: &'a B,
    precompiles: &'a PrecompileRegistry,
    stopped: bool,
    reverted: bool,
}

impl<'a, B: StorageBackend> Frame<'a, B> {
    fn new(
        code: &'a [u8],
        ctx: CallContext,
        backend: &'a B,
        precompiles: &'a PrecompileRegistry,
    ) -> Self {
        let gas_remaining = ctx.gas_limit;
        Self {
            ctx,
            code,
            pc: 0,
            stack: Stack::new(),
            memory: Memory::new(),
            gas_remaining,
            logs: Vec::new(),
            output: Vec::new(),
            return_data: Vec::new(),
            jump_dests: analyze_jump_dests(code),
            backend,
            precompiles,
            stopped: false,
            reverted: false,
        }
    }

    fn run(&mut self) -> Result<(), VmError> {
        while !self.stopped && self.pc < self.code.len() {
            let byte = self.code[self.pc];
            let opcode = Opcode::from_byte(byte).ok_or(VmError::BadOpcode(byte))?;
            self.charge(BASE_GAS[byte as usize])?;
            self.step(opcode)?;
        }
        Ok(())
    }

    fn charge(&mut self, amount: u64) -> Result<(), VmError> {
        if amount > self.gas_remaining {
            self.gas_remaining = 0;
            return Err(VmError::OutOfGas);
        }
        self.gas_remaining -= amount;
        Ok(())
    }

    /// Pop a stack word destined to be a memory offset or size.
    fn pop_usize(&mut self) -> Result<usize, VmError> {
        let value = self.stack.pop()?;
        if value > U256::from(crate::memory::MAX_MEMORY_BYTES as u64) {
            // No gas limit can pay for memory this far out.
            return Err(VmError::OutOfGas);
        }
        Ok(value.as_usize())
    }

    /// Expand memory to cover `[offset, offset + size)` and charge for it.
    fn touch_memory(&mut self, offset: usize, size: usize) -> Result<(), VmError> {
        if size == 0 {
            return Ok(());
        }
        let end = offset.checked_add(size).ok_or(VmError::OutOfGas)?;
        let expansion = self.memory.expansion_gas(end)?;
        self.charge(expansion)
    }

    fn step(&mut self, opcode: Opcode) -> Result<(), VmError> {
        self.pc += 1;

        match opcode {
            // =================================================================
            // HALTS
            // =================================================================
            Opcode::Stop => {
                self.stopped = true;
            }

            Opcode::Return => {
                let offset = self.pop_usize()?;
                let size = self.pop_usize()?;
                self.touch_memory(offset, size)?;
                self.output = self.memory.read(offset, size);
                self.stopped = true;
            }

            Opcode::Revert => {
                let offset = self.pop_usize()?;
                let size = self.pop_usize()?;
                self.touch_memory(offset, size)?;
                self.output = self.memory.read(offset, size);
                self.stopped = true;
                self.reverted = true;
            }

            Opcode::Invalid => {
                return Err(VmError::BadOpcode(0xFE));
            }

            // =================================================================
            // ARITHMETIC & LOGIC
            // =================================================================
            Opcode::Add => self.binary(word::add)?,
            Opcode::Mul => self.binary(word::mul)?,
            Opcode::Sub => self.binary(word::sub)?,
            Opcode::Div => self.binary(word::div)?,
            Opcode::Mod => self.binary(word::rem)?,
            Opcode::And => self.binary(|a, b| a & b)?,
            Opcode::Or => self.binary(|a, b| a | b)?,
            Opcode::Xor => self.binary(|a, b| a ^ b)?,
            Opcode::Lt => self.binary(|a, b| bool_word(a < b))?,
            Opcode::Gt => self.binary(|a, b| bool_word(a > b))?,
            Opcode::Eq => self.binary(|a, b| bool_word(a == b))?,
            // Shift operands arrive as (shift, value).
            Opcode::Shl => self.binary(|shift, value| word::shl(value, shift))?,
            Opcode::Shr => self.binary(|shift, value| word::shr(value, shift))?,

            Opcode::IsZero => {
                let a = self.stack.pop()?;
                self.stack.push(bool_word(a.is_zero()))?;
            }

            Opcode::Not => {
                let a = self.stack.pop()?;
                self.stack.push(!a)?;
            }

            // =================================================================
            // CALL DATA
            // =================================================================
            Opcode::CallDataLoad => {
                let offset = self.stack.pop()?;
                let mut out = [0u8; 32];
                if offset <= U256::from(u32::MAX) {
                    let start = offset.as_usize();
                    for (i, slot) in out.iter_mut().enumerate() {
                        if let Some(byte) = self.ctx.call_data.get(start + i) {
                            *slot = *byte;
                        }
                    }
                }
                self.stack.push(U256::from_big_endian(&out))?;
            }

            Opcode::CallDataSize => {
                self.stack.push(U256::from(self.ctx.call_data.len()))?;
            }

            // =================================================================
            // STACK & MEMORY
            // =================================================================
            Opcode::Pop => {
                self.stack.pop()?;
            }

            Opcode::Push(len) => {
                let end = (self.pc + len).min(self.code.len());
                let mut bytes = [0u8; 32];
                let copied = end - self.pc;
                bytes[32 - len..32 - len + copied].copy_from_slice(&self.code[self.pc..end]);
                self.stack.push(U256::from_big_endian(&bytes))?;
                self.pc += len;
            }

            Opcode::Dup(depth) => self.stack.dup(depth)?,
            Opcode::Swap(depth) => self.stack.swap(depth)?,

            Opcode::MLoad => {
                let offset = self.pop_usize()?;
                self.touch_memory(offset, 32)?;
                let word_bytes = self.memory.read_word(offset);
                self.stack.push(U256::from_big_endian(&word_bytes))?;
            }

            Opcode::MStore => {
                let offset = self.pop_usize()?;
                let value = self.stack.pop()?;
                self.touch_memory(offset, 32)?;
                self.memory.write(offset, &word::to_be_bytes(value));
            }

            Opcode::MStore8 => {
                let offset = self.pop_usize()?;
                let value = self.stack.pop()?;
                self.touch_memory(offset, 1)?;
                self.memory.write_byte(offset, value.byte(0));
            }

            // =================================================================
            // STORAGE
            // =================================================================
            Opcode::SLoad => {
                let key = self.stack.pop()?;
                let value = self.backend.get_storage(&self.ctx.contract, key)?;
                self.stack.push(value)?;
            }

            Opcode::SStore => {
                if self.ctx.is_static {
                    return Err(VmError::WriteInStaticContext);
                }
                let key = self.stack.pop()?;
                let value = self.stack.pop()?;
                let cost = if value.is_zero() {
                    costs::SSTORE_CLEAR
                } else {
                    costs::SSTORE_SET
                };
                self.charge(cost)?;
                self.backend.put_storage(&self.ctx.contract, key, value)?;
            }

            // =================================================================
            // CONTROL FLOW
            // =================================================================
            Opcode::Jump => {
                let dest = self.stack.pop()?;
                self.pc = self.jump_target(dest)?;
            }

            Opcode::JumpI => {
                let dest = self.stack.pop()?;
                let condition = self.stack.pop()?;
                if !condition.is_zero() {
                    self.pc = self.jump_target(dest)?;
                }
            }

            Opcode::JumpDest => {}

            // =================================================================
            // LOGS
            // =================================================================
            Opcode::Log(topic_count) => {
                if self.ctx.is_static {
                    return Err(VmError::WriteInStaticContext);
                }
                let offset = self.pop_usize()?;
                let size = self.pop_usize()?;
                let mut topics: Vec<Hash> = Vec::with_capacity(topic_count);
                for _ in 0..topic_count {
                    topics.push(word::to_be_bytes(self.stack.pop()?));
                }
                self.touch_memory(offset, size)?;
                self.charge(gas::log_dynamic_gas(size, topic_count))?;
                let data = self.memory.read(offset, size);
                self.logs.push(Log {
                    address: self.ctx.contract.clone(),
                    topics,
                    data,
                });
            }

            // =================================================================
            // EXTERNAL CALLS
            // =================================================================
            Opcode::StaticCall => {
                self.static_call()?;
            }
        }

        Ok(())
    }

    fn binary(&mut self, op: impl FnOnce(U256, U256) -> U256) -> Result<(), VmError> {
        let a = self.stack.pop()?;
        let b = self.stack.pop()?;
        self.stack.push(op(a, b))
    }

    fn jump_target(&self, dest: U256) -> Result<usize, VmError> {
        if dest > U256::from(u32::MAX) {
            return Err(VmError::InvalidJump(usize::MAX));
        }
        let target = dest.as_usize();
        if !self.jump_dests.get(target).copied().unwrap_or(false) {
            return Err(VmError::InvalidJump(target));
        }
        Ok(target)
    }

    /// STATICCALL: `gas, address, argsOffset, argsSize, retOffset, retSize`
    /// popped in order; pushes 1 on success, 0 on failure. Addresses 1..9
    /// dispatch the precompile registry; anything else runs the callee's
    /// code in a nested read-only frame.
    fn static_call(&mut self) -> Result<(), VmError> {
        let gas_requested = self.stack.pop()?;
        let target_word = self.stack.pop()?;
        let args_offset = self.pop_usize()?;
        let args_size = self.pop_usize()?;
        let ret_offset = self.pop_usize()?;
        let ret_size = self.pop_usize()?;

        self.touch_memory(args_offset, args_size)?;
        self.touch_memory(ret_offset, ret_size)?;
        let input = self.memory.read(args_offset, args_size);

        let requested = if gas_requested > U256::from(u64::MAX) {
            u64::MAX
        } else {
            gas_requested.as_u64()
        };
        let forwarded = gas::forwarded_call_gas(self.gas_remaining, requested);

        let result = if is_precompile_address(target_word) {
            self.call_precompile(target_word.as_u64(), &input, forwarded)
        } else {
            self.call_contract(target_word, input, forwarded)?
        };

        match result {
            Some((output, gas_spent)) => {
                self.charge(gas_spent)?;
                let copy_len = output.len().min(ret_size);
                self.memory.write(ret_offset, &output[..copy_len]);
                self.return_data = output;
                self.stack.push(U256::one())?;
            }
            None => {
                // Failed subcall: forwarded gas is gone, caller continues.
                self.charge(forwarded)?;
                self.return_data.clear();
                self.stack.push(U256::zero())?;
            }
        }
        Ok(())
    }

    fn call_precompile(
        &self,
        address: u64,
        input: &[u8],
        forwarded: u64,
    ) -> Option<(Vec<u8>, u64)> {
        let entry = self.precompiles.get(address)?;
        if entry.base_gas > forwarded {
            return None;
        }
        let output = (entry.run)(input)?;
        Some((output, entry.base_gas))
    }

    fn call_contract(
        &self,
        target_word: U256,
        input: Vec<u8>,
        forwarded: u64,
    ) -> Result<Option<(Vec<u8>, u64)>, VmError> {
        if self.ctx.depth + 1 >= MAX_CALL_DEPTH {
            return Err(VmError::CallDepthExceeded);
        }
        let target = address_from_word(target_word);
        let Some(code) = self.backend.get_code(&target)? else {
            // Calling empty code trivially succeeds and returns nothing.
            return Ok(Some((Vec::new(), 0)));
        };

        let ctx = CallContext {
            contract: target,
            caller: self.ctx.contract.clone(),
            call_data: input,
            gas_limit: forwarded,
            is_static: true,
            depth: self.ctx.depth + 1,
        };
        let outcome = execute(&code, ctx, self.backend, self.precompiles)?;
        if outcome.success {
            Ok(Some((outcome.output, outcome.gas_used)))
        } else {
            Ok(None)
        }
    }
}

fn bool_word(condition: bool) -> U256 {
    if condition {
        U256::one()
    } else {
        U256::zero()
    }
}

fn is_precompile_address(word_value: U256) -> bool {
    word_value >= U256::from(crate::precompiles::PRECOMPILE_MIN)
        && word_value <= U256::from(crate::precompiles::PRECOMPILE_MAX)
}

/// Interpret a stack word as a call target: the trailing 20 bytes of its
/// big-endian form, hex-rendered the way deployments name contracts.
#[must_use]
pub fn address_from_word(word_value: U256) -> Address {
    let bytes = word::to_be_bytes(word_value);
    Address::Simple(hex_lower(&bytes[12..]))
}

fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
