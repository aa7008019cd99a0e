//! Transaction repository
//!
//! The repository owns every [`WalletTransaction`] the wallet knows about.
//! All reads and writes go through [`TransactionRepository::lock`], whose
//! guard bounds the critical section. Callers that also need the chain lock
//! must take it first (see [`crate::wallet::Wallet::lock_both`]).

use bitcoin::{OutPoint, Txid};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;

use crate::error::{WalletError, WalletResult};
use crate::wallet_tx::WalletTransaction;

pub type TxMap = BTreeMap<Txid, WalletTransaction>;

/// Outcome of inserting or merging a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Default)]
pub struct TransactionRepository {
    inner: Mutex<TxMap>,
}

impl TransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the wallet lock
    pub fn lock(&self) -> RepositoryGuard<'_> {
        RepositoryGuard {
            txs: self.inner.lock(),
        }
    }

    /// Run `f` while holding the wallet lock
    pub fn with_lock<T>(&self, f: impl FnOnce(&mut RepositoryGuard<'_>) -> T) -> T {
        let mut guard = self.lock();
        f(&mut guard)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lock-guarded view of the repository
pub struct RepositoryGuard<'a> {
    txs: MutexGuard<'a, TxMap>,
}

impl RepositoryGuard<'_> {
    pub fn get(&self, txid: &Txid) -> Option<&WalletTransaction> {
        self.txs.get(txid)
    }

    pub fn contains(&self, txid: &Txid) -> bool {
        self.txs.contains_key(txid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WalletTransaction> {
        self.txs.values()
    }

    pub fn txids(&self) -> Vec<Txid> {
        self.txs.keys().copied().collect()
    }

    pub fn map(&self) -> &TxMap {
        &self.txs
    }

    /// Insert a new record, or merge block reference, from-me flag and spent
    /// bits into the existing one.
    pub fn add_transaction(&mut self, incoming: WalletTransaction) -> Upsert {
        let (merged, outcome) = self.merged_copy(&incoming);
        if outcome != Upsert::Unchanged {
            self.txs.insert(merged.txid(), merged);
        }
        outcome
    }

    /// Preview what [`RepositoryGuard::add_transaction`] would store, without mutating
    pub fn merged_copy(&self, incoming: &WalletTransaction) -> (WalletTransaction, Upsert) {
        match self.txs.get(&incoming.txid()) {
            None => (incoming.clone(), Upsert::Inserted),
            Some(existing) => {
                let mut copy = existing.clone();
                let mut updated = false;
                if incoming.block.is_some() && incoming.block != copy.block {
                    copy.block = incoming.block;
                    updated = true;
                }
                if incoming.from_me && !copy.from_me {
                    copy.from_me = true;
                    updated = true;
                }
                updated |= copy.merge_spent(incoming.spent_flags());
                let outcome = if updated { Upsert::Updated } else { Upsert::Unchanged };
                (copy, outcome)
            }
        }
    }

    /// Replace a record with an updated copy of itself
    pub fn replace(&mut self, wtx: WalletTransaction) {
        self.txs.insert(wtx.txid(), wtx);
    }

    /// Set the spent flag of an outpoint. Returns whether it changed.
    pub fn mark_spent(&mut self, outpoint: &OutPoint, spent: bool) -> WalletResult<bool> {
        let wtx = self
            .txs
            .get_mut(&outpoint.txid)
            .ok_or(WalletError::UnknownOutput(*outpoint))?;
        if spent {
            wtx.mark_spent(outpoint.vout)
        } else {
            wtx.mark_unspent(outpoint.vout)
        }
    }

    pub fn erase(&mut self, txid: &Txid) -> Option<WalletTransaction> {
        self.txs.remove(txid)
    }
}
