//! # Balance Sheet
//!
//! Per-transaction balance accumulator. Debits and credits merge by
//! address and the net delta lands on each account exactly once, which
//! keeps conservation trivially true even when sender, receiver and
//! coinbase alias the same account.

use crate::EngineError;
use std::collections::HashMap;
use terrace_state::StateStore;
use terrace_types::Address;

/// Accumulated balance deltas for one transaction.
#[derive(Debug, Default)]
pub struct BalanceSheet {
    deltas: HashMap<Address, i128>,
}

impl BalanceSheet {
    /// Empty sheet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subtract from an account.
    pub fn debit(&mut self, address: &Address, amount: u128) {
        *self.deltas.entry(address.clone()).or_insert(0) -= amount as i128;
    }

    /// Add to an account.
    pub fn credit(&mut self, address: &Address, amount: u128) {
        *self.deltas.entry(address.clone()).or_insert(0) += amount as i128;
    }

    /// Net delta currently carried for an address.
    #[must_use]
    pub fn net(&self, address: &Address) -> i128 {
        self.deltas.get(address).copied().unwrap_or(0)
    }

    /// Apply every net delta to the state store.
    ///
    /// # Errors
    ///
    /// `BalanceOverflow` when a result leaves `0..=u64::MAX`; callers
    /// guarantee solvency through validation, so a negative result is a
    /// programming error surfaced the same way.
    pub fn apply(self, state: &StateStore) -> Result<(), EngineError> {
        for (address, delta) in self.deltas {
            if delta == 0 {
                continue;
            }
            let mut account = state.get_account(&address);
            let updated = i128::from(account.balance) + delta;
            account.balance = u64::try_from(updated)
                .map_err(|_| EngineError::BalanceOverflow(address.canonical()))?;
            state.put_account(&address, account)?;
        }
        Ok(())
    }
}
