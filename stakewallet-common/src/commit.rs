//! Commit and broadcast
//!
//! Committing records the new transaction and the spent markers of the
//! outputs it consumes. Every durable write happens before any in-memory
//! change: if one fails the commit fails and the repository is exactly as
//! it was, so the wallet never believes inputs are spent without a record
//! of the spending transaction.

use bitcoin::{Address, ScriptBuf, Txid};
use serde_json::json;
use std::collections::BTreeMap;

use crate::error::{WalletError, WalletResult};
use crate::events::ChangeType;
use crate::keypool::ReserveKey;
use crate::logging::{log_storage, log_transaction, LogLevel};
use crate::repository::Upsert;
use crate::tx_builder::{BuildRequest, PendingTransaction, Recipient};
use crate::types::short_txid;
use crate::wallet::Wallet;
use crate::wallet_tx::WalletTransaction;

/// A committed and relayed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentTransaction {
    pub txid: Txid,
    pub fee: u64,
}

impl Wallet {
    /// Record `pending`, mark its inputs spent, and hand it to the relay.
    ///
    /// The reserved change key is kept before anything is written.
    ///
    /// # Errors
    /// * `WalletError::UnknownOutput` - an input does not belong to a wallet transaction
    /// * `WalletError::Persistence` - a durable write failed; nothing changed in memory
    /// * `WalletError::TransactionRejected` - recorded, but the memory pool refused it
    pub fn commit_transaction(
        &self,
        pending: &PendingTransaction,
        reserve: &mut ReserveKey,
    ) -> WalletResult<Txid> {
        let (_chain, mut repo) = self.lock_both();
        let txid = pending.tx.txid();

        let incoming = WalletTransaction::new(pending.tx.clone(), pending.time)
            .with_from_me(true)
            .with_time_received(self.deps.chain.adjusted_time());
        let (record, outcome) = repo.merged_copy(&incoming);

        // Updated copies of every consumed transaction, built before any write
        let mut consumed: BTreeMap<Txid, WalletTransaction> = BTreeMap::new();
        for txin in &pending.tx.input {
            let prevout = txin.previous_output;
            if !consumed.contains_key(&prevout.txid) {
                let prev = repo
                    .get(&prevout.txid)
                    .ok_or(WalletError::UnknownOutput(prevout))?;
                consumed.insert(prevout.txid, prev.clone());
            }
            if let Some(prev) = consumed.get_mut(&prevout.txid) {
                prev.mark_spent(prevout.vout)?;
            }
        }

        if let Err(e) = self.persist(&record) {
            log_transaction(
                LogLevel::Error,
                "Failed to persist committed transaction",
                Some(json!({ "txid": txid.to_string(), "error": e.to_string() })),
            );
            return Err(e);
        }
        for prev in consumed.values() {
            if let Err(e) = self.persist(prev) {
                log_transaction(
                    LogLevel::Error,
                    "Failed to persist spent inputs",
                    Some(json!({ "txid": prev.txid().to_string(), "error": e.to_string() })),
                );
                return Err(e);
            }
        }

        // The change key is spent once the records are durable
        if let Err(e) = reserve.keep_key() {
            log_storage(
                LogLevel::Warn,
                "Failed to remove kept key from the pool",
                Some(json!({ "txid": txid.to_string(), "error": e.to_string() })),
            );
        }

        repo.replace(record);
        for prev in consumed.into_values() {
            let prev_txid = prev.txid();
            repo.replace(prev);
            self.notify_changed(&prev_txid, ChangeType::Updated);
        }
        let change = if outcome == Upsert::Inserted {
            ChangeType::New
        } else {
            ChangeType::Updated
        };
        self.notify_changed(&txid, change);

        if !self.deps.relay.accept_to_pool(&pending.tx) {
            log::error!(
                "Committed transaction {} was rejected by the memory pool",
                short_txid(&txid)
            );
            return Err(WalletError::TransactionRejected(txid));
        }
        self.deps.relay.relay(&pending.tx);

        log_transaction(
            LogLevel::Info,
            "Transaction committed",
            Some(json!({
                "txid": txid.to_string(),
                "fee": pending.fee,
                "inputs": pending.inputs.len(),
            })),
        );
        Ok(txid)
    }

    /// Pay `value` to `script_pubkey`: build, then commit
    pub fn send_money(
        &self,
        script_pubkey: ScriptBuf,
        value: i64,
    ) -> WalletResult<SentTransaction> {
        let mut reserve = self.reserve_key();
        let request = BuildRequest::pay(vec![Recipient::new(script_pubkey, value)]);

        let pending = match self.create_transaction(&request, &mut reserve) {
            Ok(pending) => pending,
            Err(e) => {
                log::warn!("Transaction creation failed: {}", e);
                return Err(e);
            }
        };
        let txid = self.commit_transaction(&pending, &mut reserve)?;
        Ok(SentTransaction {
            txid,
            fee: pending.fee,
        })
    }

    /// Pay `value` to `destination` after checking the amount and the trusted balance
    pub fn send_to_destination(
        &self,
        destination: &Address,
        value: i64,
    ) -> WalletResult<SentTransaction> {
        if value <= 0 {
            return Err(WalletError::Validation("Invalid amount".to_string()));
        }
        let needed = (value as u64).saturating_add(self.fee_policy().transaction_fee());
        let available = self.balance();
        if needed > available {
            return Err(WalletError::InsufficientFunds { needed, available });
        }
        let script = self.deps.scripts.destination_script(destination);
        self.send_money(script, value)
    }
}
