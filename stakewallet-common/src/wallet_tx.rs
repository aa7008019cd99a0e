//! Wallet transaction record
//!
//! A [`WalletTransaction`] pairs a transaction with wallet-local metadata.
//! Its spent bitmap always has exactly one entry per output: the field is
//! private and every mutation goes through an index-checked method.

use bitcoin::{Transaction, Txid};

use crate::error::{WalletError, WalletResult};
use crate::interfaces::ChainIndex;
use crate::types::{BlockRef, MaturityClass, LOCKTIME_THRESHOLD};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletTransaction {
    tx: Transaction,
    txid: Txid,
    spent: Vec<bool>,
    /// Transaction timestamp (proof-of-stake transactions carry their own time)
    pub time: i64,
    /// When this wallet first saw the transaction
    pub time_received: i64,
    /// Whether the wallet created this transaction
    pub from_me: bool,
    /// Confirming block, if any
    pub block: Option<BlockRef>,
}

impl WalletTransaction {
    pub fn new(tx: Transaction, time: i64) -> Self {
        let txid = tx.txid();
        let spent = vec![false; tx.output.len()];
        Self {
            tx,
            txid,
            spent,
            time,
            time_received: time,
            from_me: false,
            block: None,
        }
    }

    pub fn with_from_me(mut self, from_me: bool) -> Self {
        self.from_me = from_me;
        self
    }

    pub fn with_block(mut self, block: BlockRef) -> Self {
        self.block = Some(block);
        self
    }

    pub fn with_time_received(mut self, time_received: i64) -> Self {
        self.time_received = time_received;
        self
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn txid(&self) -> Txid {
        self.txid
    }

    pub fn output_count(&self) -> usize {
        self.tx.output.len()
    }

    pub fn maturity_class(&self) -> MaturityClass {
        MaturityClass::of(&self.tx)
    }

    /// Spent bitmap, one entry per output
    pub fn spent_flags(&self) -> &[bool] {
        &self.spent
    }

    pub fn is_spent(&self, n: u32) -> bool {
        self.spent.get(n as usize).copied().unwrap_or(false)
    }

    fn check_index(&self, n: u32) -> WalletResult<usize> {
        let idx = n as usize;
        if idx >= self.spent.len() {
            return Err(WalletError::OutputIndexOutOfRange {
                index: n,
                outputs: self.spent.len(),
            });
        }
        Ok(idx)
    }

    /// Mark output `n` spent. Returns whether the flag changed.
    pub fn mark_spent(&mut self, n: u32) -> WalletResult<bool> {
        let idx = self.check_index(n)?;
        let changed = !self.spent[idx];
        self.spent[idx] = true;
        Ok(changed)
    }

    /// Mark output `n` unspent. Returns whether the flag changed.
    pub fn mark_unspent(&mut self, n: u32) -> WalletResult<bool> {
        let idx = self.check_index(n)?;
        let changed = self.spent[idx];
        self.spent[idx] = false;
        Ok(changed)
    }

    /// OR another bitmap into ours. Entries beyond our output count are ignored.
    pub fn merge_spent(&mut self, other: &[bool]) -> bool {
        let mut changed = false;
        for (mine, theirs) in self.spent.iter_mut().zip(other) {
            if *theirs && !*mine {
                *mine = true;
                changed = true;
            }
        }
        changed
    }

    /// Confirmations of the confirming block; 0 when unconfirmed or off the main chain
    pub fn depth(&self, chain: &dyn ChainIndex) -> u32 {
        match self.block {
            Some(block) => match chain.main_chain_height(&block.hash) {
                Some(height) => chain.best_height().saturating_sub(height) + 1,
                None => 0,
            },
            None => 0,
        }
    }

    /// Blocks remaining before a coinbase/coinstake at `depth` matures
    pub fn blocks_to_maturity(&self, depth: u32, maturity_window: u32) -> u32 {
        if self.maturity_class().needs_maturity() {
            maturity_window.saturating_sub(depth)
        } else {
            0
        }
    }

    /// Lock-time finality against the next block height and the adjusted time
    pub fn is_final(&self, chain: &dyn ChainIndex) -> bool {
        let lock_time = self.tx.lock_time.to_consensus_u32();
        if lock_time == 0 {
            return true;
        }
        let limit = if lock_time < LOCKTIME_THRESHOLD {
            i64::from(chain.best_height()) + 1
        } else {
            chain.adjusted_time()
        };
        if i64::from(lock_time) < limit {
            return true;
        }
        self.tx.input.iter().all(|txin| txin.sequence.is_final())
    }
}
