//! # Account, Code & Storage Store
//!
//! Accounts live in an in-memory map guarded by a reader-writer lock and
//! are persisted to the key-value store when the outermost snapshot
//! commits (or immediately when no snapshot is active). Contract code and
//! 256-bit storage write through to the KV store at mutation time and are
//! undone from the journal on rollback.
//!
//! The state root is the pair-hashing Merkle root over
//! `SHA-256(addr || nonce_be || balance_be)` leaves, sorted by address, with
//! the last leaf duplicated on odd levels. Both proposer and validator use
//! this computation, so their roots are comparable byte-for-byte.
//!
//! Key layout in the KV store:
//!
//! ```text
//! acct:<address>           -> nonce_le(8) || balance_le(8)
//! code:<address>           -> raw bytecode
//! stor:<address>:<key-hex> -> 32-byte big-endian word
//! ```

use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use terrace_kv::{KvStore, StorageError};
use terrace_types::merkle::merkle_root;
use terrace_types::word::{self, U256};
use terrace_types::{AccountState, Address, Hash};
use thiserror::Error;

/// State layer failure.
#[derive(Debug, Error)]
pub enum StateError {
    /// Underlying KV store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A persisted account record had the wrong shape.
    #[error("corrupt account record for {0}")]
    CorruptAccount(String),

    /// Snapshots must be released newest-first.
    #[error("snapshot released out of order: expected depth {expected}, got {actual}")]
    SnapshotOrder { expected: usize, actual: usize },
}

/// A rollback point. Handles must be committed or rolled back in LIFO
/// order; the store rejects out-of-order release.
#[derive(Debug)]
#[must_use = "snapshots must be committed or rolled back"]
pub struct SnapshotHandle {
    depth: usize,
}

enum Undo {
    Account(Address, Option<AccountState>),
    Code(Address, Option<Vec<u8>>),
    Storage(Vec<u8>, Option<Vec<u8>>),
}

#[derive(Default)]
struct Journal {
    frames: Vec<usize>,
    entries: Vec<Undo>,
}

impl Journal {
    fn active(&self) -> bool {
        !self.frames.is_empty()
    }

    fn record(&mut self, undo: Undo) {
        if self.active() {
            self.entries.push(undo);
        }
    }
}

/// The shared state store.
pub struct StateStore {
    accounts: RwLock<HashMap<Address, AccountState>>,
    journal: Mutex<Journal>,
    kv: Arc<KvStore>,
}

impl StateStore {
    /// Open the store over a KV backend, loading all persisted accounts
    /// into the cache.
    pub fn open(kv: Arc<KvStore>) -> Result<Self, StateError> {
        let mut accounts = HashMap::new();
        for (key, value) in kv.prefix_scan(b"acct:") {
            let rendered = std::str::from_utf8(&key[5..])
                .map_err(|_| StateError::CorruptAccount(format!("{key:?}")))?;
            let address = Address::parse(rendered)
                .map_err(|_| StateError::CorruptAccount(rendered.to_owned()))?;
            accounts.insert(address, decode_account(rendered, &value)?);
        }
        if !accounts.is_empty() {
            tracing::info!(accounts = accounts.len(), "loaded account state");
        }
        Ok(Self {
            accounts: RwLock::new(accounts),
            journal: Mutex::new(Journal::default()),
            kv,
        })
    }

    // =========================================================================
    // ACCOUNTS
    // =========================================================================

    /// Read an account. Unknown addresses are the default `(0, 0)` state,
    /// never an error.
    #[must_use]
    pub fn get_account(&self, address: &Address) -> AccountState {
        self.accounts
            .read()
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    /// Write an account. Persists immediately when no snapshot is active,
    /// otherwise on the outermost commit.
    pub fn put_account(&self, address: &Address, state: AccountState) -> Result<(), StateError> {
        let mut journal = self.journal.lock();
        let mut accounts = self.accounts.write();
        let previous = accounts.insert(address.clone(), state);
        if journal.active() {
            journal.record(Undo::Account(address.clone(), previous));
            Ok(())
        } else {
            drop(accounts);
            drop(journal);
            self.persist_account(address, state)
        }
    }

    // =========================================================================
    // CONTRACT CODE & STORAGE
    // =========================================================================

    /// Read deployed contract code, if any.
    #[must_use]
    pub fn get_code(&self, address: &Address) -> Option<Vec<u8>> {
        self.kv.get(&code_key(address))
    }

    /// Store deployed contract code.
    pub fn put_code(&self, address: &Address, code: &[u8]) -> Result<(), StateError> {
        let key = code_key(address);
        let mut journal = self.journal.lock();
        journal.record(Undo::Code(address.clone(), self.kv.get(&key)));
        self.kv.put(&key, code)?;
        Ok(())
    }

    /// Read one 256-bit storage slot. Absent slots are zero.
    #[must_use]
    pub fn get_storage(&self, contract: &Address, key: U256) -> U256 {
        match self.kv.get(&storage_key(contract, key)) {
            Some(raw) => word::from_be_bytes(&raw),
            None => U256::zero(),
        }
    }

    /// Write one 256-bit storage slot. Writing zero clears the slot.
    pub fn put_storage(&self, contract: &Address, key: U256, value: U256) -> Result<(), StateError> {
        let db_key = storage_key(contract, key);
        let mut journal = self.journal.lock();
        journal.record(Undo::Storage(db_key.clone(), self.kv.get(&db_key)));
        if value.is_zero() {
            self.kv.delete(&db_key)?;
        } else {
            self.kv.put(&db_key, &word::to_be_bytes(value))?;
        }
        Ok(())
    }

    // =========================================================================
    // COMMITMENT
    // =========================================================================

    /// Merkle root over the sorted account set. Independent of insertion
    /// order by construction.
    #[must_use]
    pub fn state_root(&self) -> Hash {
        let accounts = self.accounts.read();
        let mut sorted: Vec<(&Address, &AccountState)> = accounts.iter().collect();
        sorted.sort_by(|(a, _), (b, _)| a.cmp(b));

        let leaves: Vec<Hash> = sorted
            .into_iter()
            .map(|(address, state)| account_leaf(address, state))
            .collect();
        merkle_root(&leaves)
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Open a rollback scope. Scopes nest; release newest-first.
    pub fn snapshot(&self) -> SnapshotHandle {
        let mut journal = self.journal.lock();
        let depth = journal.frames.len();
        let mark = journal.entries.len();
        journal.frames.push(mark);
        SnapshotHandle { depth }
    }

    /// Undo every mutation since the snapshot was taken.
    pub fn rollback(&self, handle: SnapshotHandle) -> Result<(), StateError> {
        let mut journal = self.journal.lock();
        let mark = self.release_frame(&mut journal, &handle)?;
        let undos: Vec<Undo> = journal.entries.drain(mark..).collect();
        let mut accounts = self.accounts.write();
        for undo in undos.into_iter().rev() {
            match undo {
                Undo::Account(address, Some(previous)) => {
                    accounts.insert(address, previous);
                }
                Undo::Account(address, None) => {
                    accounts.remove(&address);
                }
                Undo::Code(address, previous) => {
                    restore_raw(&self.kv, &code_key(&address), previous)?;
                }
                Undo::Storage(db_key, previous) => {
                    restore_raw(&self.kv, &db_key, previous)?;
                }
            }
        }
        Ok(())
    }

    /// Keep every mutation since the snapshot was taken. Committing the
    /// outermost snapshot persists touched accounts.
    pub fn commit(&self, handle: SnapshotHandle) -> Result<(), StateError> {
        let mut journal = self.journal.lock();
        let mark = self.release_frame(&mut journal, &handle)?;
        if journal.active() {
            // Absorbed into the parent frame; entries stay for its rollback.
            return Ok(());
        }
        let undos: Vec<Undo> = journal.entries.drain(mark..).collect();
        drop(journal);
        let accounts = self.accounts.read();
        for undo in &undos {
            if let Undo::Account(address, _) = undo {
                if let Some(state) = accounts.get(address).copied() {
                    persist_account_record(&self.kv, address, state)?;
                }
            }
        }
        Ok(())
    }

    fn release_frame(&self, journal: &mut Journal, handle: &SnapshotHandle) -> Result<usize, StateError> {
        let top = journal.frames.len().saturating_sub(1);
        if journal.frames.is_empty() || handle.depth != top {
            return Err(StateError::SnapshotOrder {
                expected: top,
                actual: handle.depth,
            });
        }
        Ok(journal.frames.pop().unwrap_or(0))
    }

    fn persist_account(&self, address: &Address, state: AccountState) -> Result<(), StateError> {
        persist_account_record(&self.kv, address, state)
    }
}

fn persist_account_record(kv: &KvStore, address: &Address, state: AccountState) -> Result<(), StateError> {
    kv.put(&account_key(address), &encode_account(state))?;
    Ok(())
}

fn account_key(address: &Address) -> Vec<u8> {
    let mut key = b"acct:".to_vec();
    key.extend_from_slice(&address.canonical_bytes());
    key
}

fn code_key(address: &Address) -> Vec<u8> {
    let mut key = b"code:".to_vec();
    key.extend_from_slice(&address.canonical_bytes());
    key
}

fn storage_key(contract: &Address, slot: U256) -> Vec<u8> {
    let mut key = b"stor:".to_vec();
    key.extend_from_slice(&contract.canonical_bytes());
    key.push(b':');
    key.extend_from_slice(&word::to_be_bytes(slot));
    key
}

fn encode_account(state: AccountState) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&state.nonce.to_le_bytes());
    out[8..].copy_from_slice(&state.balance.to_le_bytes());
    out
}

fn decode_account(address: &str, raw: &[u8]) -> Result<AccountState, StateError> {
    if raw.len() != 16 {
        return Err(StateError::CorruptAccount(address.to_owned()));
    }
    let nonce = u64::from_le_bytes(raw[..8].try_into().expect("checked length"));
    let balance = u64::from_le_bytes(raw[8..].try_into().expect("checked length"));
    Ok(AccountState { nonce, balance })
}

fn account_leaf(address: &Address, state: &AccountState) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(address.canonical_bytes());
    hasher.update(state.nonce.to_be_bytes());
    hasher.update(state.balance.to_be_bytes());
    hasher.finalize().into()
}

fn restore_raw(kv: &KvStore, key: &[u8], previous: Option<Vec<u8>>) -> Result<(), StateError> {
    match previous {
        Some(raw) => kv.put(key, &raw)?,
        None => kv.delete(key)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fresh() -> (TempDir, StateStore) {
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(KvStore::open(dir.path()).unwrap());
        let store = StateStore::open(kv).unwrap();
        (dir, store)
    }

    fn addr(name: &str) -> Address {
        Address::parse(name).unwrap()
    }

    #[test]
    fn test_unknown_account_reads_default() {
        let (_dir, store) = fresh();
        assert_eq!(store.get_account(&addr("ghost")), AccountState::default());
    }

    #[test]
    fn test_put_then_get() {
        let (_dir, store) = fresh();
        store
            .put_account(&addr("alice"), AccountState::new(3, 500))
            .unwrap();
        assert_eq!(store.get_account(&addr("alice")), AccountState::new(3, 500));
    }

    #[test]
    fn test_accounts_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(KvStore::open(dir.path()).unwrap());
        {
            let store = StateStore::open(Arc::clone(&kv)).unwrap();
            store
                .put_account(&addr("alice"), AccountState::new(1, 999))
                .unwrap();
        }
        drop(kv);
        let kv = Arc::new(KvStore::open(dir.path()).unwrap());
        let store = StateStore::open(kv).unwrap();
        assert_eq!(store.get_account(&addr("alice")), AccountState::new(1, 999));
    }

    #[test]
    fn test_root_is_insertion_order_independent() {
        let (_dir, a) = fresh();
        let (_dir2, b) = fresh();
        let accounts = [
            ("alice", AccountState::new(0, 100)),
            ("bob", AccountState::new(2, 50)),
            ("carol", AccountState::new(9, 1)),
        ];
        for (name, state) in accounts {
            a.put_account(&addr(name), state).unwrap();
        }
        for (name, state) in accounts.iter().rev() {
            b.put_account(&addr(name), *state).unwrap();
        }
        assert_eq!(a.state_root(), b.state_root());
    }

    #[test]
    fn test_root_tracks_balance_changes() {
        let (_dir, store) = fresh();
        store
            .put_account(&addr("alice"), AccountState::new(0, 100))
            .unwrap();
        let before = store.state_root();
        store
            .put_account(&addr("alice"), AccountState::new(0, 101))
            .unwrap();
        assert_ne!(store.state_root(), before);
    }

    #[test]
    fn test_rollback_undoes_accounts_code_and_storage() {
        let (_dir, store) = fresh();
        let contract = addr("counter-1");
        store
            .put_account(&addr("alice"), AccountState::new(0, 100))
            .unwrap();
        store.put_storage(&contract, U256::one(), U256::from(7u64)).unwrap();

        let snap = store.snapshot();
        store
            .put_account(&addr("alice"), AccountState::new(1, 42))
            .unwrap();
        store
            .put_account(&addr("newbie"), AccountState::new(0, 5))
            .unwrap();
        store.put_code(&contract, &[0x60, 0x00]).unwrap();
        store
            .put_storage(&contract, U256::one(), U256::from(99u64))
            .unwrap();
        store
            .put_storage(&contract, U256::from(2u64), U256::from(1u64))
            .unwrap();
        store.rollback(snap).unwrap();

        assert_eq!(store.get_account(&addr("alice")), AccountState::new(0, 100));
        assert_eq!(store.get_account(&addr("newbie")), AccountState::default());
        assert_eq!(store.get_code(&contract), None);
        assert_eq!(store.get_storage(&contract, U256::one()), U256::from(7u64));
        assert_eq!(store.get_storage(&contract, U256::from(2u64)), U256::zero());
    }

    #[test]
    fn test_commit_keeps_changes_and_persists() {
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(KvStore::open(dir.path()).unwrap());
        {
            let store = StateStore::open(Arc::clone(&kv)).unwrap();
            let snap = store.snapshot();
            store
                .put_account(&addr("alice"), AccountState::new(1, 77))
                .unwrap();
            store.commit(snap).unwrap();
        }
        drop(kv);
        let kv = Arc::new(KvStore::open(dir.path()).unwrap());
        let store = StateStore::open(kv).unwrap();
        assert_eq!(store.get_account(&addr("alice")), AccountState::new(1, 77));
    }

    #[test]
    fn test_nested_snapshots_rollback_inner_only() {
        let (_dir, store) = fresh();
        store
            .put_account(&addr("alice"), AccountState::new(0, 10))
            .unwrap();

        let outer = store.snapshot();
        store
            .put_account(&addr("alice"), AccountState::new(1, 20))
            .unwrap();

        let inner = store.snapshot();
        store
            .put_account(&addr("alice"), AccountState::new(2, 30))
            .unwrap();
        store.rollback(inner).unwrap();
        assert_eq!(store.get_account(&addr("alice")), AccountState::new(1, 20));

        store.rollback(outer).unwrap();
        assert_eq!(store.get_account(&addr("alice")), AccountState::new(0, 10));
    }

    #[test]
    fn test_nested_commit_then_outer_rollback() {
        let (_dir, store) = fresh();
        let outer = store.snapshot();
        let inner = store.snapshot();
        store
            .put_account(&addr("alice"), AccountState::new(1, 1))
            .unwrap();
        store.commit(inner).unwrap();
        store.rollback(outer).unwrap();
        assert_eq!(store.get_account(&addr("alice")), AccountState::default());
    }

    #[test]
    fn test_out_of_order_release_rejected() {
        let (_dir, store) = fresh();
        let outer = store.snapshot();
        let _inner = store.snapshot();
        assert!(matches!(
            store.rollback(outer),
            Err(StateError::SnapshotOrder { .. })
        ));
    }

    #[test]
    fn test_storage_zero_clears_slot() {
        let (_dir, store) = fresh();
        let contract = addr("counter-1");
        store
            .put_storage(&contract, U256::one(), U256::from(5u64))
            .unwrap();
        store
            .put_storage(&contract, U256::one(), U256::zero())
            .unwrap();
        assert_eq!(store.get_storage(&contract, U256::one()), U256::zero());
    }
}
