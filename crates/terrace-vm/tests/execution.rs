//! End-to-end interpreter tests over an in-memory storage backend.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use terrace_types::word::{self, U256};
use terrace_types::Address;
use terrace_vm::precompiles::verifier::{self, ShapeCheckPairing};
use terrace_vm::precompiles::{IDENTITY_GAS, SHA256_GAS};
use terrace_vm::{execute, CallContext, Outcome, PrecompileRegistry, StorageBackend, VmError};

/// Storage backend over plain maps, enough to drive the interpreter.
#[derive(Default)]
struct MemBackend {
    storage: Mutex<HashMap<(String, U256), U256>>,
    code: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemBackend {
    fn deploy(&self, address: &Address, code: Vec<u8>) {
        self.code.lock().insert(address.canonical(), code);
    }

    fn slot(&self, contract: &Address, key: u64) -> U256 {
        self.storage
            .lock()
            .get(&(contract.canonical(), U256::from(key)))
            .copied()
            .unwrap_or_default()
    }
}

impl StorageBackend for MemBackend {
    fn get_storage(&self, contract: &Address, key: U256) -> Result<U256, VmError> {
        Ok(self
            .storage
            .lock()
            .get(&(contract.canonical(), key))
            .copied()
            .unwrap_or_default())
    }

    fn put_storage(&self, contract: &Address, key: U256, value: U256) -> Result<(), VmError> {
        self.storage.lock().insert((contract.canonical(), key), value);
        Ok(())
    }

    fn get_code(&self, contract: &Address) -> Result<Option<Vec<u8>>, VmError> {
        Ok(self.code.lock().get(&contract.canonical()).cloned())
    }
}

fn run_code(code: &[u8], gas_limit: u64) -> Outcome {
    let backend = MemBackend::default();
    run_code_with(&backend, code, gas_limit, vec![])
}

fn run_code_with(backend: &MemBackend, code: &[u8], gas_limit: u64, call_data: Vec<u8>) -> Outcome {
    let registry = PrecompileRegistry::with_defaults(Arc::new(ShapeCheckPairing));
    let ctx = CallContext {
        contract: Address::Simple("contract-under-test".into()),
        caller: Address::Simple("caller".into()),
        call_data,
        gas_limit,
        is_static: false,
        depth: 0,
    };
    execute(code, ctx, backend, &registry).expect("backend cannot fail")
}

#[test]
fn test_add_leaves_sum_and_meters_gas() {
    // PUSH1 0x10; PUSH1 0x20; ADD; PUSH1 0x00; MSTORE; PUSH1 0x20; PUSH1 0x00; RETURN
    let code = [
        0x60, 0x10, 0x60, 0x20, 0x01, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xF3,
    ];
    let outcome = run_code(&code, 100_000);
    assert!(outcome.success);
    assert_eq!(word::from_be_bytes(&outcome.output), U256::from(0x30u64));
    assert!(outcome.gas_used > 0 && outcome.gas_used < 100_000);
}

#[test]
fn test_stop_halts_cleanly() {
    // PUSH1 0x10; PUSH1 0x20; ADD; STOP
    let outcome = run_code(&[0x60, 0x10, 0x60, 0x20, 0x01, 0x00], 100_000);
    assert!(outcome.success);
    assert!(outcome.output.is_empty());
}

#[test]
fn test_out_of_gas_consumes_the_limit() {
    // An infinite loop: JUMPDEST; PUSH1 0x00; JUMP
    let code = [0x5B, 0x60, 0x00, 0x56];
    let outcome = run_code(&code, 5_000);
    assert!(!outcome.success);
    assert_eq!(outcome.fault, Some(VmError::OutOfGas));
    assert_eq!(outcome.gas_used, 5_000);
}

#[test]
fn test_gas_used_never_exceeds_limit() {
    // A scatter of programs, well-formed and broken alike.
    let programs: &[&[u8]] = &[
        &[0x60, 0x01, 0x60, 0x02, 0x01, 0x00],
        &[0x5B, 0x60, 0x00, 0x56],
        &[0x01],             // stack underflow
        &[0xFE],             // INVALID
        &[0x60, 0x05, 0x56], // invalid jump
        &[0x60, 0xFF, 0x60, 0x00, 0x55, 0x00], // SSTORE
    ];
    for (i, code) in programs.iter().enumerate() {
        for limit in [0u64, 21, 100, 30_000] {
            let outcome = run_code(code, limit);
            assert!(
                outcome.gas_used <= limit,
                "program {i} with limit {limit} used {}",
                outcome.gas_used
            );
        }
    }
}

#[test]
fn test_invalid_opcode_consumes_everything() {
    let outcome = run_code(&[0xFE], 9_000);
    assert!(!outcome.success);
    assert_eq!(outcome.fault, Some(VmError::BadOpcode(0xFE)));
    assert_eq!(outcome.gas_used, 9_000);
}

#[test]
fn test_unknown_byte_faults() {
    let outcome = run_code(&[0xF1], 9_000); // CALL is not in the instruction set
    assert_eq!(outcome.fault, Some(VmError::BadOpcode(0xF1)));
}

#[test]
fn test_revert_carries_reason_and_keeps_gas_spent() {
    // MSTORE "xx" at 0, REVERT offset 30 size 2
    let code = [
        0x60, 0xAB, 0x60, 0x1F, 0x53, // MSTORE8 0x1F <- 0xAB
        0x60, 0x01, 0x60, 0x1F, 0xFD, // REVERT(0x1F, 1)
    ];
    let outcome = run_code(&code, 50_000);
    assert!(!outcome.success);
    assert_eq!(outcome.revert_reason, Some(vec![0xAB]));
    assert!(outcome.gas_used > 0 && outcome.gas_used < 50_000);
    assert!(outcome.fault.is_none());
    assert!(outcome.logs.is_empty());
}

#[test]
fn test_jump_to_push_payload_rejected() {
    // PUSH1 0x5B lands a fake JUMPDEST byte in the payload at pc 1.
    // PUSH1 0x01; JUMP
    let code = [0x60, 0x5B, 0x60, 0x01, 0x56];
    let outcome = run_code(&code, 50_000);
    assert_eq!(outcome.fault, Some(VmError::InvalidJump(1)));
}

#[test]
fn test_jumpi_takes_branch_on_nonzero() {
    // PUSH1 1; PUSH1 6; JUMPI; INVALID; JUMPDEST at 6; STOP
    let code = [0x60, 0x01, 0x60, 0x06, 0x57, 0xFE, 0x5B, 0x00];
    let outcome = run_code(&code, 50_000);
    assert!(outcome.success);

    // Zero condition falls through into INVALID.
    let code = [0x60, 0x00, 0x60, 0x06, 0x57, 0xFE, 0x5B, 0x00];
    let outcome = run_code(&code, 50_000);
    assert_eq!(outcome.fault, Some(VmError::BadOpcode(0xFE)));
}

#[test]
fn test_sstore_sload_roundtrip_with_costs() {
    let backend = MemBackend::default();
    // PUSH1 0x2A; PUSH1 0x01; SSTORE; PUSH1 0x01; SLOAD; PUSH1 0x00; MSTORE;
    // PUSH1 0x20; PUSH1 0x00; RETURN
    let code = [
        0x60, 0x2A, 0x60, 0x01, 0x55, 0x60, 0x01, 0x54, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60,
        0x00, 0xF3,
    ];
    let outcome = run_code_with(&backend, &code, 100_000, vec![]);
    assert!(outcome.success);
    assert_eq!(word::from_be_bytes(&outcome.output), U256::from(0x2Au64));
    let contract = Address::Simple("contract-under-test".into());
    assert_eq!(backend.slot(&contract, 1), U256::from(0x2Au64));
    // SSTORE set (20k) plus SLOAD (800) dominate.
    assert!(outcome.gas_used > 20_800);
}

#[test]
fn test_sstore_without_budget_is_out_of_gas() {
    let code = [0x60, 0x2A, 0x60, 0x01, 0x55, 0x00];
    let outcome = run_code(&code, 1_000);
    assert_eq!(outcome.fault, Some(VmError::OutOfGas));
    assert_eq!(outcome.gas_used, 1_000);
}

#[test]
fn test_log_records_topics_and_data() {
    // MSTORE8 0xCD at 0; PUSH topic 0x07; LOG1(offset 0, size 1)
    let code = [
        0x60, 0xCD, 0x60, 0x00, 0x53, // MSTORE8
        0x60, 0x07, // topic
        0x60, 0x01, 0x60, 0x00, // size, offset
        0xA1, // LOG1
        0x00,
    ];
    let outcome = run_code(&code, 50_000);
    assert!(outcome.success, "fault: {:?}", outcome.fault);
    assert_eq!(outcome.logs.len(), 1);
    let log = &outcome.logs[0];
    assert_eq!(log.data, vec![0xCD]);
    assert_eq!(log.topics.len(), 1);
    assert_eq!(log.topics[0][31], 0x07);
}

#[test]
fn test_calldata_opcodes() {
    // CALLDATASIZE; PUSH1 0; CALLDATALOAD; ADD; PUSH1 0; MSTORE; RETURN 32 bytes
    let code = [
        0x36, 0x60, 0x00, 0x35, 0x01, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xF3,
    ];
    let backend = MemBackend::default();
    let mut call_data = vec![0u8; 32];
    call_data[31] = 5;
    let outcome = run_code_with(&backend, &code, 100_000, call_data);
    assert!(outcome.success);
    // 5 + calldatasize(32) = 37
    assert_eq!(word::from_be_bytes(&outcome.output), U256::from(37u64));
}

#[test]
fn test_staticcall_identity_precompile() {
    // Write 0xEE at mem[31], call identity(0x04) with args (31,1), ret (64,1),
    // then return mem[64..65] and the success flag check via MSTORE of it.
    let code = [
        0x60, 0xEE, 0x60, 0x1F, 0x53, // MSTORE8 31 <- 0xEE
        0x60, 0x01, // retSize
        0x60, 0x40, // retOffset
        0x60, 0x01, // argsSize
        0x60, 0x1F, // argsOffset
        0x60, 0x04, // address 4 (identity)
        0x61, 0xFF, 0xFF, // gas
        0xFA, // STATICCALL
        0x50, // POP success flag
        0x60, 0x01, 0x60, 0x40, 0xF3, // RETURN mem[64..65]
    ];
    let outcome = run_code(&code, 100_000);
    assert!(outcome.success, "fault: {:?}", outcome.fault);
    assert_eq!(outcome.output, vec![0xEE]);
    assert!(outcome.gas_used >= IDENTITY_GAS);
}

#[test]
fn test_staticcall_sha256_precompile() {
    // Call sha256 over one byte 0x61 ('a'), return the 32-byte digest.
    let code = [
        0x60, 0x61, 0x60, 0x00, 0x53, // MSTORE8 0 <- 'a'
        0x60, 0x20, // retSize 32
        0x60, 0x20, // retOffset 32
        0x60, 0x01, // argsSize
        0x60, 0x00, // argsOffset
        0x60, 0x02, // address 2 (sha256)
        0x61, 0xFF, 0xFF, // gas
        0xFA, 0x50, // STATICCALL; POP
        0x60, 0x20, 0x60, 0x20, 0xF3, // RETURN mem[32..64]
    ];
    let outcome = run_code(&code, 100_000);
    assert!(outcome.success);
    assert_eq!(outcome.output, terrace_crypto::sha256(b"a").to_vec());
    assert!(outcome.gas_used >= SHA256_GAS);
}

#[test]
fn test_staticcall_unregistered_precompile_pushes_zero() {
    // Address 7 is reserved but nothing is registered there.
    let code = [
        0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, // ret/args empty
        0x60, 0x07, // address 7
        0x60, 0xFF, // gas
        0xFA, // STATICCALL -> 0
        0x60, 0x00, 0x52, // MSTORE flag at 0
        0x60, 0x20, 0x60, 0x00, 0xF3,
    ];
    let outcome = run_code(&code, 100_000);
    assert!(outcome.success);
    assert_eq!(word::from_be_bytes(&outcome.output), U256::zero());
}

#[test]
fn test_staticcall_into_contract_code() {
    let backend = MemBackend::default();
    // Callee: returns 32-byte word 0x2A.
    let callee_code = vec![
        0x60, 0x2A, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xF3,
    ];
    // The callee lives at word address 0x1234 -> simple hex name.
    let callee_addr = terrace_vm::address_from_word(U256::from(0x1234u64));
    backend.deploy(&callee_addr, callee_code);

    let caller_code = [
        0x60, 0x20, // retSize 32
        0x60, 0x00, // retOffset 0
        0x60, 0x00, 0x60, 0x00, // args empty
        0x61, 0x12, 0x34, // address
        0x61, 0xFF, 0xFF, // gas
        0xFA, 0x50, // STATICCALL; POP
        0x60, 0x20, 0x60, 0x00, 0xF3,
    ];
    let outcome = run_code_with(&backend, &caller_code, 200_000, vec![]);
    assert!(outcome.success, "fault: {:?}", outcome.fault);
    assert_eq!(word::from_be_bytes(&outcome.output), U256::from(0x2Au64));
}

#[test]
fn test_staticcall_callee_cannot_write_state() {
    let backend = MemBackend::default();
    // Callee tries SSTORE: must fail the subcall, caller sees 0.
    let callee_code = vec![0x60, 0x01, 0x60, 0x01, 0x55, 0x00];
    let callee_addr = terrace_vm::address_from_word(U256::from(0x99u64));
    backend.deploy(&callee_addr, callee_code);

    let caller_code = [
        0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, // ret/args empty
        0x60, 0x99, // address
        0x62, 0x01, 0x00, 0x00, // gas
        0xFA, // STATICCALL
        0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xF3,
    ];
    let outcome = run_code_with(&backend, &caller_code, 200_000, vec![]);
    assert!(outcome.success);
    assert_eq!(word::from_be_bytes(&outcome.output), U256::zero());
    assert_eq!(backend.slot(&callee_addr, 1), U256::zero());
}

#[test]
fn test_staticcall_proof_verifier() {
    // Build a well-formed proof blob in memory via calldata, then call
    // address 9 and return the result word.
    let mut blob = Vec::new();
    blob.extend_from_slice(&[1u8; 64]);
    blob.extend_from_slice(&[2u8; 128]);
    blob.extend_from_slice(&[3u8; 64]);
    blob.extend_from_slice(&word::to_be_bytes(U256::zero()));
    assert_eq!(blob.len(), 288);

    // Copy calldata into memory word by word, then STATICCALL(9).
    let mut code = Vec::new();
    for i in 0..9u16 {
        let off = (i * 32).to_be_bytes();
        // PUSH2 off; CALLDATALOAD; PUSH2 off; MSTORE
        code.extend_from_slice(&[0x61, off[0], off[1], 0x35, 0x61, off[0], off[1], 0x52]);
    }
    code.extend_from_slice(&[
        0x60, 0x20, // retSize 32
        0x61, 0x01, 0x20, // retOffset 288
        0x61, 0x01, 0x20, // argsSize 288
        0x60, 0x00, // argsOffset
        0x60, 0x09, // address 9
        0x62, 0x01, 0x00, 0x00, // gas
        0xFA, 0x50, // STATICCALL; POP
        0x60, 0x20, 0x61, 0x01, 0x20, 0xF3, // RETURN mem[288..320]
    ]);

    let backend = MemBackend::default();
    let outcome = run_code_with(&backend, &code, 200_000, blob);
    assert!(outcome.success, "fault: {:?}", outcome.fault);
    assert_eq!(outcome.output.len(), 32);
    assert_eq!(outcome.output[31], 1);
    assert!(outcome.gas_used > verifier::PROOF_VERIFY_GAS);
}

#[test]
fn test_stack_limit_fault() {
    // PUSH1 1; JUMPDEST-free loop is hard without JUMP; instead push until
    // the code runs out: 1025 pushes cannot fit the stack.
    let mut code = Vec::new();
    for _ in 0..1025 {
        code.extend_from_slice(&[0x60, 0x01]);
    }
    let outcome = run_code(&code, 1_000_000);
    assert_eq!(outcome.fault, Some(VmError::StackOverflow));
}

#[test]
fn test_memory_expansion_is_charged() {
    // MSTORE at a large offset must cost more than at offset zero.
    let near = run_code(&[0x60, 0x01, 0x60, 0x00, 0x52, 0x00], 1_000_000);
    let far = run_code(&[0x60, 0x01, 0x61, 0x10, 0x00, 0x52, 0x00], 1_000_000);
    assert!(near.success && far.success);
    assert!(far.gas_used > near.gas_used);
}
