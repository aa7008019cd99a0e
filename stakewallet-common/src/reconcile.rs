//! Spend-state reconciliation
//!
//! Keeps every owned output's spent marker in line with what the chain
//! says, driven three ways:
//!
//! - observation: a transaction reaching the pool or a block marks the
//!   owned outputs it consumes spent ([`Wallet::update_spent`])
//! - audit: [`Wallet::fix_spent_coins`] compares every marker against the
//!   authoritative spent index, reporting and optionally repairing drift
//! - startup/reorg: [`Wallet::reaccept_wallet_transactions`] replays the
//!   index onto the repository and rescans blocks for spends it missed,
//!   until a pass finds nothing new
//!
//! Each pass holds the wallet lock for its whole duration. Records are
//! persisted before the in-memory copy is replaced.

use bitcoin::{OutPoint, Transaction, Txid};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::WalletResult;
use crate::events::{ChangeType, MismatchKind, WalletEvent};
use crate::logging::{log_reconcile, LogLevel};
use crate::repository::{RepositoryGuard, Upsert};
use crate::types::{is_coinstake, short_txid, BlockRef, MaturityClass, OutPointInfo};
use crate::wallet::Wallet;
use crate::wallet_tx::WalletTransaction;

/// Whether a reconciliation pass may change markers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileMode {
    DryRun,
    Repair,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Disagreements found, of either kind
    pub mismatches: usize,
    /// Spent locally, unspent in the index
    pub lost_coins: usize,
    /// Unspent locally, spent in the index
    pub missed_spends: usize,
    /// Total value of the disagreeing outputs
    pub balance_in_question: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReacceptReport {
    pub passes: u32,
    /// Records whose markers were corrected from the index
    pub corrected: usize,
    /// Unconfirmed transactions handed back to the memory pool
    pub reaccepted: usize,
    /// Transactions discovered by rescanning
    pub discovered: usize,
}

impl Wallet {
    /// Mark owned outputs consumed by `tx` spent; when `tx` is in a block,
    /// also mark its own owned outputs unspent
    pub fn update_spent(&self, tx: &Transaction, in_block: bool) -> WalletResult<()> {
        let (_chain, mut repo) = self.lock_both();
        self.update_spent_locked(&mut repo, tx, in_block)
    }

    pub(crate) fn update_spent_locked(
        &self,
        repo: &mut RepositoryGuard<'_>,
        tx: &Transaction,
        in_block: bool,
    ) -> WalletResult<()> {
        for txin in &tx.input {
            let prevout = txin.previous_output;
            let Some(prev) = repo.get(&prevout.txid) else {
                continue;
            };
            let Some(txout) = prev.tx().output.get(prevout.vout as usize) else {
                log::warn!("Spend of {} refers past its outputs", short_txid(&prevout.txid));
                continue;
            };
            if prev.is_spent(prevout.vout) || !self.ownership(&txout.script_pubkey).is_mine() {
                continue;
            }

            let mut copy = prev.clone();
            copy.mark_spent(prevout.vout)?;
            self.persist(&copy)?;
            log::debug!("Found spent coin {}:{}", short_txid(&prevout.txid), prevout.vout);
            repo.replace(copy);
            self.notify_changed(&prevout.txid, ChangeType::Updated);
        }

        if in_block {
            let txid = tx.txid();
            if let Some(wtx) = repo.get(&txid) {
                let mut copy = wtx.clone();
                let mut changed = false;
                for (n, txout) in tx.output.iter().enumerate() {
                    if self.ownership(&txout.script_pubkey).is_mine() {
                        changed |= copy.mark_unspent(n as u32)?;
                    }
                }
                if changed {
                    self.persist(&copy)?;
                    repo.replace(copy);
                    self.notify_changed(&txid, ChangeType::Updated);
                }
            }
        }
        Ok(())
    }

    /// Insert `wtx`, or merge its block reference, from-me flag and spent
    /// bits into the existing record, then apply the spends it makes
    pub fn add_to_wallet(&self, wtx: WalletTransaction) -> WalletResult<Upsert> {
        let (_chain, mut repo) = self.lock_both();
        self.add_to_wallet_locked(&mut repo, wtx)
    }

    pub(crate) fn add_to_wallet_locked(
        &self,
        repo: &mut RepositoryGuard<'_>,
        wtx: WalletTransaction,
    ) -> WalletResult<Upsert> {
        let (merged, outcome) = repo.merged_copy(&wtx);
        let txid = merged.txid();
        let in_block = merged.block.is_some();
        let tx = merged.tx().clone();

        if outcome != Upsert::Unchanged {
            self.persist(&merged)?;
            repo.replace(merged);
        }

        self.update_spent_locked(repo, &tx, in_block)?;

        match outcome {
            Upsert::Inserted => self.notify_changed(&txid, ChangeType::New),
            Upsert::Updated => self.notify_changed(&txid, ChangeType::Updated),
            Upsert::Unchanged => {}
        }
        Ok(outcome)
    }

    /// Spends at least one owned output known to the wallet
    pub(crate) fn is_from_me(&self, repo: &RepositoryGuard<'_>, tx: &Transaction) -> bool {
        tx.input.iter().any(|txin| {
            repo.get(&txin.previous_output.txid)
                .and_then(|prev| prev.tx().output.get(txin.previous_output.vout as usize))
                .map(|prev_out| self.ownership(&prev_out.script_pubkey).is_mine())
                .unwrap_or(false)
        })
    }

    /// Record `tx` if it is already known, pays us or spends from us.
    ///
    /// Known transactions are only refreshed when `update` is set. A
    /// transaction that does not involve the wallet still has its spends
    /// applied. Returns whether `tx` was recorded.
    pub fn add_if_involving_me(
        &self,
        tx: &Transaction,
        block: Option<BlockRef>,
        time: i64,
        update: bool,
    ) -> WalletResult<bool> {
        let (_chain, mut repo) = self.lock_both();
        self.add_if_involving_me_locked(&mut repo, tx, block, time, update)
    }

    pub(crate) fn add_if_involving_me_locked(
        &self,
        repo: &mut RepositoryGuard<'_>,
        tx: &Transaction,
        block: Option<BlockRef>,
        time: i64,
        update: bool,
    ) -> WalletResult<bool> {
        let existed = repo.contains(&tx.txid());
        if existed && !update {
            return Ok(false);
        }

        if existed || self.is_mine(tx) || self.is_from_me(repo, tx) {
            let mut wtx = WalletTransaction::new(tx.clone(), time)
                .with_time_received(self.deps.chain.adjusted_time());
            wtx.block = block;
            self.add_to_wallet_locked(repo, wtx)?;
            return Ok(true);
        }

        self.update_spent_locked(repo, tx, false)?;
        Ok(false)
    }

    /// Drop a transaction from the store and the repository, notifying `Deleted`
    pub fn erase_from_wallet(&self, txid: &Txid) -> WalletResult<bool> {
        let (_chain, mut repo) = self.lock_both();
        self.erase_locked(&mut repo, txid)
    }

    pub(crate) fn erase_locked(
        &self,
        repo: &mut RepositoryGuard<'_>,
        txid: &Txid,
    ) -> WalletResult<bool> {
        if !repo.contains(txid) {
            return Ok(false);
        }
        self.deps.store.erase_transaction(txid)?;
        repo.erase(txid);
        self.notify_changed(txid, ChangeType::Deleted);
        Ok(true)
    }

    /// Undo the input spends of a disconnected coinstake this wallet made
    pub fn disable_transaction(&self, tx: &Transaction) -> WalletResult<()> {
        let (_chain, mut repo) = self.lock_both();
        if !is_coinstake(tx) || !self.is_from_me(&repo, tx) {
            return Ok(());
        }

        for txin in &tx.input {
            let prevout = txin.previous_output;
            let Some(prev) = repo.get(&prevout.txid) else {
                continue;
            };
            let owned = prev
                .tx()
                .output
                .get(prevout.vout as usize)
                .map(|o| self.ownership(&o.script_pubkey).is_mine())
                .unwrap_or(false);
            if !owned {
                continue;
            }
            let mut copy = prev.clone();
            if copy.mark_unspent(prevout.vout)? {
                self.persist(&copy)?;
                repo.replace(copy);
                self.notify_changed(&prevout.txid, ChangeType::Updated);
            }
        }
        Ok(())
    }

    /// Compare every owned output's spent marker against the authoritative index.
    ///
    /// Transactions the index does not know are skipped. In repair mode
    /// each disagreeing marker is flipped and the record persisted.
    pub fn fix_spent_coins(&self, mode: ReconcileMode) -> WalletResult<ReconcileReport> {
        let (_chain, mut repo) = self.lock_both();
        let mut report = ReconcileReport::default();

        for txid in repo.txids() {
            let Some(index) = self.deps.chain.read_tx_index(&txid) else {
                continue;
            };
            let Some(wtx) = repo.get(&txid) else {
                continue;
            };
            let mut copy = wtx.clone();
            let mut changed = false;

            for (n, txout) in wtx.tx().output.iter().enumerate() {
                if !self.ownership(&txout.script_pubkey).is_mine() {
                    continue;
                }
                let local = wtx.is_spent(n as u32);
                let authoritative = index.is_spent(n);
                let kind = match (local, authoritative) {
                    (true, false) => MismatchKind::LostCoin,
                    (false, true) => MismatchKind::MissedSpend,
                    _ => continue,
                };

                report.mismatches += 1;
                report.balance_in_question += txout.value;
                match kind {
                    MismatchKind::LostCoin => report.lost_coins += 1,
                    MismatchKind::MissedSpend => report.missed_spends += 1,
                }
                log_reconcile(
                    LogLevel::Warn,
                    "Spent marker disagrees with index",
                    Some(json!({
                        "txid": txid.to_string(),
                        "vout": n,
                        "value": txout.value,
                        "kind": kind,
                        "repairing": mode == ReconcileMode::Repair,
                    })),
                );
                self.deps.notifier.notify(WalletEvent::SpentMismatch {
                    outpoint: OutPointInfo::from(&OutPoint::new(txid, n as u32)),
                    kind,
                    value: txout.value,
                    repaired: mode == ReconcileMode::Repair,
                });

                if mode == ReconcileMode::Repair {
                    changed |= if authoritative {
                        copy.mark_spent(n as u32)?
                    } else {
                        copy.mark_unspent(n as u32)?
                    };
                }
            }

            if changed {
                self.persist(&copy)?;
                repo.replace(copy);
                self.notify_changed(&txid, ChangeType::Updated);
            }
        }

        log_reconcile(
            LogLevel::Info,
            "Spent coin audit finished",
            Some(json!({
                "mode": mode,
                "mismatches": report.mismatches,
                "balance_in_question": report.balance_in_question,
            })),
        );
        Ok(report)
    }

    /// Replay the authoritative index onto the repository and re-submit
    /// unconfirmed transactions, rescanning from the earliest block that
    /// spent a coin we thought unspent. Repeats until a rescan discovers
    /// nothing new, at most once per block in the chain.
    pub fn reaccept_wallet_transactions(&self) -> WalletResult<ReacceptReport> {
        let mut report = ReacceptReport::default();
        let max_passes = self.deps.chain.best_height().saturating_add(1);

        loop {
            let (_chain, mut repo) = self.lock_both();
            report.passes += 1;
            let mut missing_heights = Vec::new();

            for txid in repo.txids() {
                let Some(wtx) = repo.get(&txid) else {
                    continue;
                };
                let class = wtx.maturity_class();
                let settled = match class {
                    MaturityClass::Coinbase => wtx.is_spent(0),
                    MaturityClass::Coinstake => wtx.is_spent(1),
                    MaturityClass::Regular => false,
                };
                if settled {
                    continue;
                }

                match self.deps.chain.read_tx_index(&txid) {
                    Some(index) => {
                        if index.spent.len() != wtx.output_count() {
                            log::error!(
                                "Index for {} has {} spent markers, transaction has {} outputs",
                                short_txid(&txid),
                                index.spent.len(),
                                wtx.output_count()
                            );
                            continue;
                        }
                        let mut copy = wtx.clone();
                        let mut updated = false;
                        for (n, marker) in index.spent.iter().enumerate() {
                            let Some(position) = marker else {
                                continue;
                            };
                            if copy.is_spent(n as u32) {
                                continue;
                            }
                            if self.ownership(&copy.tx().output[n].script_pubkey).is_mine() {
                                copy.mark_spent(n as u32)?;
                                updated = true;
                                missing_heights.push(position.height);
                            }
                        }
                        if updated {
                            log::info!("Reaccept found spent coin in {}", short_txid(&txid));
                            self.persist(&copy)?;
                            repo.replace(copy);
                            self.notify_changed(&txid, ChangeType::Updated);
                            report.corrected += 1;
                        }
                    }
                    None => {
                        if class == MaturityClass::Regular {
                            if self.deps.relay.accept_to_pool(wtx.tx()) {
                                report.reaccepted += 1;
                            } else {
                                log::debug!("Memory pool refused {}", short_txid(&txid));
                            }
                        }
                    }
                }
            }

            let Some(from_height) = missing_heights.into_iter().min() else {
                break;
            };
            if report.passes >= max_passes {
                log::warn!("Reaccept stopped after {} passes", report.passes);
                break;
            }

            let mut discovered = 0;
            for scanned in self.deps.chain.transactions_from_height(from_height) {
                if self.add_if_involving_me_locked(
                    &mut repo,
                    &scanned.tx,
                    Some(scanned.block),
                    scanned.time,
                    false,
                )? {
                    discovered += 1;
                }
            }
            log_reconcile(
                LogLevel::Info,
                "Rescanned for missing spends",
                Some(json!({ "from_height": from_height, "discovered": discovered })),
            );
            report.discovered += discovered;
            if discovered == 0 {
                break;
            }
        }

        Ok(report)
    }
}
