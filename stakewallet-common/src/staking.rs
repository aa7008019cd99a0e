//! Staking coin selection
//!
//! The staking view yields mature, aged outputs and the stakeable balance in
//! one pass over the repository. The configured reserve balance is withheld:
//! an output can only stake when the balance left after the reserve covers
//! its value.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utxo_view::{Coin, UtxoView};
use crate::wallet::Wallet;

/// Why the miner cannot stake right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum NotStakingReason {
    #[error("No coins")]
    NoCoins,

    #[error("Entire balance reserved")]
    EntireBalanceReserved,

    #[error("No mature coins")]
    NoMatureCoins,

    #[error("No UTXOs available due to reserve balance")]
    NoUtxosAvailableDueToReserve,
}

/// A failed staking selection, with the balance the view computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{reason} (balance {balance})")]
pub struct NotStaking {
    pub reason: NotStakingReason,
    pub balance: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakingSelection {
    pub coins: Vec<Coin>,
    /// Stakeable balance before the reserve is withheld
    pub balance: u64,
}

impl Wallet {
    /// Outputs that may stake at `spend_time`.
    ///
    /// For the miner the result is shuffled, so that no output is
    /// systematically tried first.
    pub fn select_coins_for_staking(
        &self,
        spend_time: i64,
        miner: bool,
    ) -> Result<StakingSelection, NotStaking> {
        let candidates = {
            let (_chain, repo) = self.lock_both();
            UtxoView::new(repo.map(), self.view_context()).available_coins_for_staking(spend_time)
        };
        let balance = candidates.eligible_balance;
        let fail = |reason| NotStaking { reason, balance };

        if balance == 0 {
            return Err(fail(NotStakingReason::NoCoins));
        }
        let reserve = self.config.wallet.reserve_balance;
        if balance <= reserve {
            return Err(fail(NotStakingReason::EntireBalanceReserved));
        }
        let considered = balance - reserve;
        if miner {
            log::debug!("Balance considered for staking {}", considered);
        }

        if candidates.is_empty() {
            return Err(fail(NotStakingReason::NoMatureCoins));
        }

        let mut coins: Vec<Coin> = candidates
            .coins
            .into_iter()
            .filter(|coin| coin.value <= considered)
            .collect();
        if coins.is_empty() {
            return Err(fail(NotStakingReason::NoUtxosAvailableDueToReserve));
        }

        if miner {
            coins.shuffle(&mut *self.rng.lock());
        }
        Ok(StakingSelection { coins, balance })
    }
}
