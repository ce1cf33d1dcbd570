//! # Execution Engine
//!
//! Deterministic transaction application: validation against the current
//! state, up-front fee charging, VM dispatch for contract payloads, gas
//! refund and coinbase credit, and receipt generation.
//!
//! All balance effects of one transaction flow through a single
//! [`BalanceSheet`] accumulator and land exactly once, so aliasing between
//! sender, receiver and coinbase can never double-credit.

mod sheet;

pub use sheet::BalanceSheet;

use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use terrace_crypto::contract_address;
use terrace_state::{StateError, StateStore};
use terrace_types::word::U256;
use terrace_types::{Address, Hash, Receipt, ReceiptStatus, Transaction};
use terrace_vm::gas::costs::TX_INTRINSIC;
use terrace_vm::{execute, CallContext, PrecompileRegistry, StorageBackend, VmError};
use thiserror::Error;

/// Why a transaction was rejected before execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Key-based sender whose signature does not verify, or an unsigned
    /// sender where signatures are mandatory.
    #[error("bad signature from {0}")]
    BadSignature(String),

    /// Transaction nonce is not the account's next nonce.
    #[error("nonce mismatch: expected {expected}, got {actual}")]
    NonceMismatch { expected: u64, actual: u64 },

    /// Balance cannot cover `amount + gas_limit * gas_price`.
    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: u64, available: u64 },

    /// Gas limit below the intrinsic transaction cost.
    #[error("gas limit {limit} below intrinsic cost {required}")]
    InsufficientGas { required: u64, limit: u64 },
}

/// Execution layer failure.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The transaction failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The state layer failed; the transaction was rolled back.
    #[error(transparent)]
    State(#[from] StateError),

    /// The VM's storage backend failed mid-execution.
    #[error("vm backend failure: {0}")]
    Backend(VmError),

    /// A balance credit overflowed the 64-bit balance space.
    #[error("balance overflow for {0}")]
    BalanceOverflow(String),
}

/// Engine policy knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Admit simple-name and keyset senders without a verifiable
    /// signature. Development profiles enable this; committee deployments
    /// must not.
    pub allow_unsigned_simple: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            allow_unsigned_simple: true,
        }
    }
}

/// The engine. Shared across the proposer and validator paths.
pub struct ExecutionEngine {
    state: Arc<StateStore>,
    precompiles: PrecompileRegistry,
    receipts: RwLock<HashMap<Hash, Receipt>>,
    config: ExecutionConfig,
}

impl ExecutionEngine {
    /// Build an engine over the shared state store.
    #[must_use]
    pub fn new(state: Arc<StateStore>, precompiles: PrecompileRegistry, config: ExecutionConfig) -> Self {
        Self {
            state,
            precompiles,
            receipts: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// The underlying state store.
    #[must_use]
    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    /// Check a transaction against the current state without mutating
    /// anything.
    ///
    /// # Errors
    ///
    /// One [`ValidationError`] naming the first failed check.
    pub fn validate(&self, tx: &Transaction) -> Result<(), ValidationError> {
        self.check_signature(tx)?;

        let sender = self.state.get_account(&tx.sender);
        if tx.nonce != sender.nonce {
            return Err(ValidationError::NonceMismatch {
                expected: sender.nonce,
                actual: tx.nonce,
            });
        }

        let required = tx.max_cost();
        if sender.balance < required {
            return Err(ValidationError::InsufficientBalance {
                required,
                available: sender.balance,
            });
        }

        if tx.gas_limit < TX_INTRINSIC {
            return Err(ValidationError::InsufficientGas {
                required: TX_INTRINSIC,
                limit: tx.gas_limit,
            });
        }

        Ok(())
    }

    /// Apply a transaction in full: charge fees, run the VM when there is
    /// a payload, refund unused gas, move value, emit a receipt.
    ///
    /// On a VM revert the value transfer and all storage effects are
    /// undone but consumed gas stays charged. Storage layer failures roll
    /// everything back and propagate.
    pub fn apply(
        &self,
        tx: &Transaction,
        coinbase: &Address,
        block_number: u64,
    ) -> Result<Receipt, EngineError> {
        self.validate(tx)?;

        // Replay protection first: the nonce advances even if the payload
        // later reverts.
        let mut sender_account = self.state.get_account(&tx.sender);
        sender_account.nonce += 1;
        self.state.put_account(&tx.sender, sender_account)?;

        let mut sheet = BalanceSheet::new();
        sheet.debit(&tx.sender, u128::from(tx.amount) + u128::from(tx.gas_limit) * u128::from(tx.gas_price));

        // Payload dispatch.
        let vm_budget = tx.gas_limit - TX_INTRINSIC;
        let mut vm_gas = 0u64;
        let mut logs = Vec::new();
        let mut status = ReceiptStatus::Success;
        let mut contract: Option<Address> = None;

        if !tx.data.is_empty() {
            let outcome = self.run_payload(tx, vm_budget, &mut contract)?;
            vm_gas = outcome.gas_used;
            if outcome.success {
                logs = outcome.logs;
            } else {
                status = ReceiptStatus::Reverted;
                contract = None;
                if let Some(reason) = &outcome.revert_reason {
                    tracing::debug!(tx = %hex_prefix(&tx.hash), len = reason.len(), "payload reverted");
                } else if let Some(fault) = &outcome.fault {
                    tracing::debug!(tx = %hex_prefix(&tx.hash), %fault, "payload faulted");
                }
            }
        }

        // Fees: refund what was not used, pay the coinbase what was.
        let gas_used = (TX_INTRINSIC + vm_gas).min(tx.gas_limit);
        let refund = u128::from(tx.gas_limit - gas_used) * u128::from(tx.gas_price);
        sheet.credit(&tx.sender, refund);
        sheet.credit(coinbase, u128::from(gas_used) * u128::from(tx.gas_price));

        // Value: delivered on success, returned on revert.
        let value_recipient = match status {
            ReceiptStatus::Success => match (&tx.receiver, &contract) {
                (Some(receiver), _) => receiver.clone(),
                (None, Some(deployed)) => deployed.clone(),
                (None, None) => tx.sender.clone(),
            },
            ReceiptStatus::Reverted => tx.sender.clone(),
        };
        sheet.credit(&value_recipient, u128::from(tx.amount));

        sheet.apply(&self.state)?;

        let receipt = Receipt {
            tx_hash: tx.hash,
            block_number,
            from: tx.sender.clone(),
            to: tx.receiver.clone(),
            contract_address: contract,
            gas_used,
            logs,
            status,
        };
        self.receipts.write().insert(tx.hash, receipt.clone());
        Ok(receipt)
    }

    /// Look up the receipt for an executed transaction.
    #[must_use]
    pub fn receipt(&self, hash: &Hash) -> Option<Receipt> {
        self.receipts.read().get(hash).cloned()
    }

    fn check_signature(&self, tx: &Transaction) -> Result<(), ValidationError> {
        match &tx.sender {
            Address::KeyBased(public_key) => {
                terrace_crypto::verify(&tx.signing_bytes(), &tx.signature, public_key)
                    .map_err(|_| ValidationError::BadSignature(tx.sender.canonical()))
            }
            Address::Simple(_) | Address::KeysetBased(_) => {
                if self.config.allow_unsigned_simple {
                    tracing::warn!(sender = %tx.sender, "admitting unsigned sender");
                    Ok(())
                } else {
                    Err(ValidationError::BadSignature(tx.sender.canonical()))
                }
            }
        }
    }

    /// Run the contract payload inside its own snapshot; the snapshot is
    /// committed on success and rolled back on revert or fault.
    fn run_payload(
        &self,
        tx: &Transaction,
        vm_budget: u64,
        contract_out: &mut Option<Address>,
    ) -> Result<terrace_vm::Outcome, EngineError> {
        let backend = StateBackend { state: &self.state };
        let snapshot = self.state.snapshot();

        let deployed = tx.is_deployment().then(|| contract_address(&tx.sender, tx.nonce));
        let result = match &deployed {
            Some(address) => {
                let ctx =
                    CallContext::top_level(address.clone(), tx.sender.clone(), Vec::new(), vm_budget);
                execute(&tx.data, ctx, &backend, &self.precompiles)
            }
            None => {
                let receiver = tx.receiver.clone().unwrap_or_else(|| tx.sender.clone());
                let code = self.state.get_code(&receiver).unwrap_or_default();
                let ctx =
                    CallContext::top_level(receiver, tx.sender.clone(), tx.data.clone(), vm_budget);
                execute(&code, ctx, &backend, &self.precompiles)
            }
        };

        match result {
            Ok(outcome) if outcome.success => {
                if let Some(address) = deployed {
                    // The init code's output is the deployed runtime.
                    if let Err(err) = self.state.put_code(&address, &outcome.output) {
                        self.state.rollback(snapshot)?;
                        return Err(err.into());
                    }
                    *contract_out = Some(address);
                }
                self.state.commit(snapshot)?;
                Ok(outcome)
            }
            Ok(outcome) => {
                self.state.rollback(snapshot)?;
                Ok(outcome)
            }
            Err(backend_failure) => {
                self.state.rollback(snapshot)?;
                Err(EngineError::Backend(backend_failure))
            }
        }
    }
}

/// Adapter exposing the state store to the VM.
struct StateBackend<'a> {
    state: &'a StateStore,
}

impl StorageBackend for StateBackend<'_> {
    fn get_storage(&self, contract: &Address, key: U256) -> Result<U256, VmError> {
        Ok(self.state.get_storage(contract, key))
    }

    fn put_storage(&self, contract: &Address, key: U256, value: U256) -> Result<(), VmError> {
        self.state
            .put_storage(contract, key, value)
            .map_err(|err| VmError::Backend(err.to_string()))
    }

    fn get_code(&self, contract: &Address) -> Result<Option<Vec<u8>>, VmError> {
        Ok(self.state.get_code(contract))
    }
}

fn hex_prefix(hash: &Hash) -> String {
    hash.iter().take(4).map(|b| format!("{b:02x}")).collect()
}
