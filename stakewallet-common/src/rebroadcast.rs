//! Periodic rebroadcast of unconfirmed wallet transactions
//!
//! Resending is gated by a randomised timer and only happens after a new
//! best block has arrived since the last run. Every candidate is
//! revalidated first; a transaction that no longer validates is dropped
//! from the wallet and the memory pool.

use bitcoin::Txid;
use rand::Rng;
use serde_json::json;

use crate::error::WalletResult;
use crate::logging::{log_transaction, LogLevel};
use crate::types::short_txid;
use crate::wallet::Wallet;

/// Upper bound of the random delay between resend attempts, in seconds
pub const RESEND_MAX_DELAY: i64 = 30 * 60;

/// A transaction is resent once the best block is this much newer than it, in seconds
pub const RESEND_MIN_AGE: i64 = 5 * 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebroadcastTimer {
    /// Earliest time of the next attempt; zero before the first call
    pub next_time: i64,
    /// When transactions were last resent
    pub last_time: i64,
}

impl RebroadcastTimer {
    /// Advance the timer to `now`; true when a resend should run.
    ///
    /// The first call only schedules the next attempt.
    pub fn due(&mut self, now: i64, delay: i64, time_best_received: i64) -> bool {
        if now < self.next_time {
            return false;
        }
        let first = self.next_time == 0;
        self.next_time = now + delay;
        if first {
            return false;
        }
        if time_best_received < self.last_time {
            return false;
        }
        self.last_time = now;
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResendReport {
    pub relayed: Vec<Txid>,
    pub erased: Vec<Txid>,
}

impl Wallet {
    /// Relay aged unconfirmed transactions, erasing those that no longer validate.
    ///
    /// Without `force` the call is rate limited and returns `None` when it
    /// did not run. With `force` every wallet transaction is a candidate
    /// regardless of age.
    pub fn resend_wallet_transactions(&self, force: bool) -> WalletResult<Option<ResendReport>> {
        let chain = &self.deps.chain;
        if !force {
            let delay = self.rng.lock().random_range(0..RESEND_MAX_DELAY);
            let due = self
                .rebroadcast
                .lock()
                .due(chain.adjusted_time(), delay, chain.time_best_received());
            if !due {
                return Ok(None);
            }
        }

        let (_chain, mut repo) = self.lock_both();
        let best_received = chain.time_best_received();
        let mut candidates: Vec<(i64, Txid)> = repo
            .iter()
            .filter(|wtx| force || best_received - wtx.time_received > RESEND_MIN_AGE)
            .map(|wtx| (wtx.time_received, wtx.txid()))
            .collect();
        candidates.sort();

        let mut report = ResendReport::default();
        for (_, txid) in candidates {
            let Some(wtx) = repo.get(&txid) else {
                continue;
            };
            let tx = wtx.tx().clone();
            let class = wtx.maturity_class();

            if chain.revalidate(&tx) {
                if !class.needs_maturity() && !chain.contains_tx(&txid) {
                    log::debug!("Relaying wallet transaction {}", short_txid(&txid));
                    self.deps.relay.relay(&tx);
                    report.relayed.push(txid);
                }
            } else {
                log_transaction(
                    LogLevel::Warn,
                    "Erasing wallet transaction that no longer validates",
                    Some(json!({ "txid": txid.to_string() })),
                );
                self.erase_locked(&mut repo, &txid)?;
                self.deps.relay.remove(&txid);
                report.erased.push(txid);
            }
        }

        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_call_only_schedules() {
        let mut timer = RebroadcastTimer::default();
        assert!(!timer.due(1_000, 60, 2_000));
        assert_eq!(timer.next_time, 1_060);
        assert_eq!(timer.last_time, 0);
    }

    #[test]
    fn test_waits_for_next_time() {
        let mut timer = RebroadcastTimer {
            next_time: 1_060,
            last_time: 0,
        };
        assert!(!timer.due(1_059, 60, 2_000));
        assert!(timer.due(1_060, 60, 2_000));
        assert_eq!(timer.last_time, 1_060);
        assert_eq!(timer.next_time, 1_120);
    }

    #[test]
    fn test_requires_new_best_block() {
        let mut timer = RebroadcastTimer {
            next_time: 100,
            last_time: 500,
        };
        assert!(!timer.due(600, 0, 499));
        assert!(timer.due(600, 0, 500));
    }
}
