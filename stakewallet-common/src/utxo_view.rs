//! Spendable and stakeable output views over the transaction repository
//!
//! The view never mutates the repository. It is built over a borrowed
//! [`TxMap`], so callers hold the wallet lock for as long as the view lives.

use std::collections::BTreeSet;

use bitcoin::{OutPoint, ScriptBuf};
use serde_json::json;

use crate::interfaces::{ChainIndex, ScriptEngine};
use crate::logging::{log_selection, LogLevel};
use crate::repository::TxMap;
use crate::types::{IsMine, MaturityClass};
use crate::wallet_tx::WalletTransaction;

/// A wallet output offered to coin selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub outpoint: OutPoint,
    pub value: u64,
    pub script_pubkey: ScriptBuf,
    /// Confirmation depth of the owning transaction
    pub depth: u32,
    /// Whether the owning transaction was created by this wallet
    pub from_me: bool,
    /// Timestamp of the owning transaction
    pub tx_time: i64,
    pub ownership: IsMine,
}

impl Coin {
    fn from_output(wtx: &WalletTransaction, n: usize, depth: u32, ownership: IsMine) -> Self {
        let txout = &wtx.tx().output[n];
        Self {
            outpoint: OutPoint::new(wtx.txid(), n as u32),
            value: txout.value,
            script_pubkey: txout.script_pubkey.clone(),
            depth,
            from_me: wtx.from_me,
            tx_time: wtx.time,
            ownership,
        }
    }
}

/// Outputs meeting an eligibility policy
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    pub coins: Vec<Coin>,
    /// Aggregate eligible balance, filled in by the staking pass only
    pub eligible_balance: u64,
}

impl CandidateSet {
    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }
}

/// Collaborators and policy values the view reads
#[derive(Clone, Copy)]
pub struct ViewContext<'a> {
    pub chain: &'a dyn ChainIndex,
    pub scripts: &'a dyn ScriptEngine,
    pub min_input_value: u64,
    pub maturity_window: u32,
    pub stake_min_age: i64,
}

/// Spend-mode eligibility options
#[derive(Debug, Clone, Copy, Default)]
pub struct CoinFilter<'a> {
    /// Require the owning transaction to be trusted
    pub confirmed_only: bool,
    /// Accept watch-only outputs (balance queries)
    pub include_watch_only: bool,
    /// Explicit coin control: return exactly these outputs
    pub selected: Option<&'a [OutPoint]>,
}

impl<'a> CoinFilter<'a> {
    pub fn confirmed() -> Self {
        Self {
            confirmed_only: true,
            ..Self::default()
        }
    }

    pub fn explicit(selected: &'a [OutPoint]) -> Self {
        Self {
            selected: Some(selected),
            ..Self::default()
        }
    }
}

pub struct UtxoView<'a> {
    txs: &'a TxMap,
    ctx: ViewContext<'a>,
}

impl<'a> UtxoView<'a> {
    pub fn new(txs: &'a TxMap, ctx: ViewContext<'a>) -> Self {
        Self { txs, ctx }
    }

    /// Spend-mode candidate outputs
    pub fn available_coins(&self, filter: &CoinFilter<'_>) -> Vec<Coin> {
        if let Some(selected) = filter.selected {
            return self.explicit_coins(selected);
        }

        let mut coins = Vec::new();
        for wtx in self.txs.values() {
            if !wtx.is_final(self.ctx.chain) {
                continue;
            }
            if filter.confirmed_only && !self.is_trusted(wtx) {
                continue;
            }
            let depth = wtx.depth(self.ctx.chain);
            if wtx.blocks_to_maturity(depth, self.ctx.maturity_window) > 0 {
                continue;
            }

            for (n, txout) in wtx.tx().output.iter().enumerate() {
                if wtx.is_spent(n as u32) || txout.value == 0 {
                    continue;
                }
                if txout.value < self.ctx.min_input_value {
                    continue;
                }
                let ownership = self.ctx.scripts.classify_ownership(&txout.script_pubkey);
                let usable = match ownership {
                    IsMine::Spendable => true,
                    IsMine::WatchOnly => filter.include_watch_only,
                    IsMine::No => false,
                };
                if usable {
                    coins.push(Coin::from_output(wtx, n, depth, ownership));
                }
            }
        }

        log_selection(
            LogLevel::Debug,
            "Collected spendable outputs",
            Some(json!({
                "transactions": self.txs.len(),
                "coins": coins.len(),
                "confirmed_only": filter.confirmed_only,
            })),
        );
        coins
    }

    /// Each named outpoint at most once, in first-seen order
    fn explicit_coins(&self, selected: &[OutPoint]) -> Vec<Coin> {
        let mut seen = BTreeSet::new();
        let mut coins = Vec::with_capacity(selected.len());
        for outpoint in selected {
            if !seen.insert(*outpoint) {
                log::debug!("Ignoring repeated coin control output {}", outpoint);
                continue;
            }
            let found = self
                .txs
                .get(&outpoint.txid)
                .filter(|wtx| (outpoint.vout as usize) < wtx.output_count());
            match found {
                Some(wtx) => {
                    let n = outpoint.vout as usize;
                    let ownership = self
                        .ctx
                        .scripts
                        .classify_ownership(&wtx.tx().output[n].script_pubkey);
                    coins.push(Coin::from_output(wtx, n, wtx.depth(self.ctx.chain), ownership));
                }
                None => log::warn!("Coin control names unknown output {}", outpoint),
            }
        }
        coins
    }

    /// Staking candidates and the eligible balance, in a single pass.
    ///
    /// The balance counts every unspent owned output of a confirmed
    /// transaction, or of an own transaction whose inputs are confirmed (or
    /// which is itself a coinstake), so recently staked amounts are
    /// included. Candidates additionally satisfy the stake age, maturity and
    /// minimum input value rules.
    pub fn available_coins_for_staking(&self, spend_time: i64) -> CandidateSet {
        let mut set = CandidateSet::default();
        let mut with_outputs = 0usize;

        for wtx in self.txs.values() {
            let depth = wtx.depth(self.ctx.chain);
            let class = wtx.maturity_class();

            let counts_toward_balance = depth > 0
                || (wtx.from_me
                    && (class == MaturityClass::Coinstake || self.dependencies_confirmed(wtx)));
            if !counts_toward_balance {
                continue;
            }

            let mut possible = Vec::new();
            for (n, txout) in wtx.tx().output.iter().enumerate() {
                if wtx.is_spent(n as u32) || txout.value == 0 {
                    continue;
                }
                let ownership = self.ctx.scripts.classify_ownership(&txout.script_pubkey);
                if ownership.is_mine() {
                    set.eligible_balance = set.eligible_balance.saturating_add(txout.value);
                    possible.push((n, ownership));
                }
            }

            if possible.is_empty() {
                continue;
            }
            // Transaction time may be earlier than block time: false positives only
            if wtx.time + self.ctx.stake_min_age > spend_time {
                continue;
            }
            if class.needs_maturity() {
                if wtx.blocks_to_maturity(depth, self.ctx.maturity_window) > 0 {
                    continue;
                }
            } else if depth < 1 {
                continue;
            }

            let before = set.coins.len();
            for (n, ownership) in possible {
                if wtx.tx().output[n].value >= self.ctx.min_input_value {
                    set.coins.push(Coin::from_output(wtx, n, depth, ownership));
                }
            }
            if set.coins.len() > before {
                with_outputs += 1;
            }
        }

        log_selection(
            LogLevel::Debug,
            "Collected staking outputs",
            Some(json!({
                "transactions": self.txs.len(),
                "with_outputs": with_outputs,
                "balance": set.eligible_balance,
            })),
        );
        set
    }

    /// Every parent of `wtx` is a wallet transaction with at least one confirmation
    fn dependencies_confirmed(&self, wtx: &WalletTransaction) -> bool {
        wtx.tx().input.iter().all(|txin| {
            self.txs
                .get(&txin.previous_output.txid)
                .map(|parent| parent.depth(self.ctx.chain) >= 1)
                .unwrap_or(false)
        })
    }

    /// Final, and either confirmed or an own transaction spending confirmed parents
    pub fn is_trusted(&self, wtx: &WalletTransaction) -> bool {
        if !wtx.is_final(self.ctx.chain) {
            return false;
        }
        if wtx.depth(self.ctx.chain) >= 1 {
            return true;
        }
        wtx.from_me && self.dependencies_confirmed(wtx)
    }

    /// Value of every owned output of `wtx`
    pub fn credit(&self, wtx: &WalletTransaction) -> u64 {
        wtx.tx()
            .output
            .iter()
            .filter(|o| self.ctx.scripts.classify_ownership(&o.script_pubkey).is_mine())
            .map(|o| o.value)
            .sum()
    }

    /// Value of the owned, unspent outputs of `wtx`; zero while it matures
    pub fn available_credit(&self, wtx: &WalletTransaction) -> u64 {
        let depth = wtx.depth(self.ctx.chain);
        if wtx.blocks_to_maturity(depth, self.ctx.maturity_window) > 0 {
            return 0;
        }
        wtx.tx()
            .output
            .iter()
            .enumerate()
            .filter(|(n, o)| {
                !wtx.is_spent(*n as u32)
                    && self.ctx.scripts.classify_ownership(&o.script_pubkey).is_mine()
            })
            .map(|(_, o)| o.value)
            .sum()
    }

    /// Value of the owned outputs `wtx` consumes
    pub fn debit(&self, wtx: &WalletTransaction) -> u64 {
        wtx.tx()
            .input
            .iter()
            .filter_map(|txin| {
                let parent = self.txs.get(&txin.previous_output.txid)?;
                let prev = parent.tx().output.get(txin.previous_output.vout as usize)?;
                self.ctx
                    .scripts
                    .classify_ownership(&prev.script_pubkey)
                    .is_mine()
                    .then_some(prev.value)
            })
            .sum()
    }

    /// Trusted spendable balance
    pub fn balance(&self) -> u64 {
        self.txs
            .values()
            .filter(|wtx| {
                self.is_trusted(wtx) && (wtx.depth(self.ctx.chain) >= 1 || wtx.from_me)
            })
            .map(|wtx| self.available_credit(wtx))
            .sum()
    }

    /// Value of transactions that are not final, or untrusted and unconfirmed
    pub fn unconfirmed_balance(&self) -> u64 {
        self.txs
            .values()
            .filter(|wtx| {
                !wtx.is_final(self.ctx.chain)
                    || (!self.is_trusted(wtx) && wtx.depth(self.ctx.chain) == 0)
            })
            .map(|wtx| self.available_credit(wtx))
            .sum()
    }

    /// Coinbase rewards that have not matured
    pub fn immature_balance(&self) -> u64 {
        self.txs
            .values()
            .filter(|wtx| wtx.maturity_class() == MaturityClass::Coinbase)
            .filter(|wtx| {
                let depth = wtx.depth(self.ctx.chain);
                depth > 0 && wtx.blocks_to_maturity(depth, self.ctx.maturity_window) > 0
            })
            .map(|wtx| self.credit(wtx))
            .sum()
    }

    /// Net value of maturing coinstakes on the main chain
    pub fn stake(&self) -> u64 {
        self.txs
            .values()
            .filter(|wtx| wtx.maturity_class() == MaturityClass::Coinstake)
            .filter(|wtx| {
                let depth = wtx.depth(self.ctx.chain);
                depth > 0 && wtx.blocks_to_maturity(depth, self.ctx.maturity_window) > 0
            })
            .map(|wtx| self.credit(wtx).saturating_sub(self.debit(wtx)))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{
        funding_tx, test_block_hash, test_script, test_tx, MemoryChainIndex, MockScriptEngine,
    };
    use crate::types::BlockRef;

    struct Fixture {
        chain: MemoryChainIndex,
        scripts: MockScriptEngine,
        txs: TxMap,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                chain: MemoryChainIndex::new().with_best_height(200),
                scripts: MockScriptEngine::new()
                    .with_spendable(test_script(1))
                    .with_watch_only(test_script(2)),
                txs: TxMap::new(),
            }
        }

        fn add(&mut self, wtx: WalletTransaction) -> bitcoin::Txid {
            let txid = wtx.txid();
            self.txs.insert(txid, wtx);
            txid
        }

        fn confirmed(&self, tx: bitcoin::Transaction, height: u32) -> WalletTransaction {
            let block = BlockRef::new(test_block_hash(height), height);
            self.chain.add_block(block.hash, height);
            WalletTransaction::new(tx, 1_000).with_block(block)
        }

        fn view(&self) -> UtxoView<'_> {
            UtxoView::new(
                &self.txs,
                ViewContext {
                    chain: &self.chain,
                    scripts: &self.scripts,
                    min_input_value: 3,
                    maturity_window: 110,
                    stake_min_age: 100,
                },
            )
        }
    }

    #[test]
    fn test_spend_mode_filters() {
        let mut fx = Fixture::new();
        let tx = funding_tx(
            1,
            &[
                (10, test_script(1)),
                (20, test_script(2)),
                (2, test_script(1)),
                (0, test_script(1)),
                (30, test_script(9)),
                (40, test_script(1)),
            ],
        );
        let mut wtx = fx.confirmed(tx, 150);
        wtx.mark_spent(5).unwrap();
        fx.add(wtx);

        let coins = fx.view().available_coins(&CoinFilter::default());
        assert_eq!(coins.iter().map(|c| c.value).collect::<Vec<_>>(), vec![10]);
        assert_eq!(coins[0].depth, 51);

        let with_watch = fx.view().available_coins(&CoinFilter {
            include_watch_only: true,
            ..CoinFilter::default()
        });
        assert_eq!(with_watch.len(), 2);
    }

    #[test]
    fn test_immature_coinstake_excluded() {
        let mut fx = Fixture::new();
        let foreign = OutPoint::new(funding_tx(50, &[]).txid(), 0);
        let stake_tx = test_tx(&[foreign], &[(0, ScriptBuf::new()), (500, test_script(1))]);

        let young = fx.confirmed(stake_tx.clone(), 150);
        fx.add(young);
        assert!(fx.view().available_coins(&CoinFilter::default()).is_empty());
        assert_eq!(fx.view().stake(), 500);

        fx.chain.set_best_height(259);
        let coins = fx.view().available_coins(&CoinFilter::default());
        assert_eq!(coins.len(), 1);
        assert_eq!(coins[0].outpoint.vout, 1);
        assert_eq!(fx.view().stake(), 0);
    }

    #[test]
    fn test_confirmed_only_requires_trust() {
        let mut fx = Fixture::new();
        let parent = fx.confirmed(funding_tx(2, &[(50, test_script(1))]), 190);
        let parent_txid = fx.add(parent);

        let foreign = WalletTransaction::new(funding_tx(3, &[(7, test_script(1))]), 1_000);
        fx.add(foreign);

        let own_spend = test_tx(&[OutPoint::new(parent_txid, 0)], &[(45, test_script(1))]);
        fx.add(WalletTransaction::new(own_spend, 1_000).with_from_me(true));

        let values: Vec<u64> = fx
            .view()
            .available_coins(&CoinFilter::confirmed())
            .iter()
            .map(|c| c.value)
            .collect();
        assert!(values.contains(&50));
        assert!(values.contains(&45));
        assert!(!values.contains(&7));
        assert_eq!(fx.view().available_coins(&CoinFilter::default()).len(), 3);
    }

    #[test]
    fn test_explicit_selection_bypasses_eligibility() {
        let mut fx = Fixture::new();
        let tx = funding_tx(4, &[(12, test_script(9)), (1, test_script(1))]);
        let mut wtx = WalletTransaction::new(tx, 0);
        wtx.mark_spent(1).unwrap();
        let txid = fx.add(wtx);

        let selected = [
            OutPoint::new(txid, 0),
            OutPoint::new(txid, 1),
            OutPoint::new(txid, 0),
            OutPoint::new(txid, 7),
        ];
        let coins = fx.view().available_coins(&CoinFilter::explicit(&selected));
        assert_eq!(coins.iter().map(|c| c.value).collect::<Vec<_>>(), vec![12, 1]);
        assert_eq!(coins[0].ownership, IsMine::No);
    }

    #[test]
    fn test_staking_pass_counts_young_coins_in_balance() {
        let mut fx = Fixture::new();
        fx.chain.set_time(10_000);

        let old_tx = funding_tx(5, &[(40, test_script(1)), (2, test_script(1))]);
        let mut old = fx.confirmed(old_tx, 100);
        old.time = 1_000;
        fx.add(old);

        let mut young = fx.confirmed(funding_tx(6, &[(60, test_script(1))]), 199);
        young.time = 9_950;
        fx.add(young);

        fx.add(WalletTransaction::new(funding_tx(7, &[(70, test_script(1))]), 0));

        let set = fx.view().available_coins_for_staking(10_000);
        assert_eq!(set.eligible_balance, 102);
        assert_eq!(set.coins.iter().map(|c| c.value).collect::<Vec<_>>(), vec![40]);
    }

    #[test]
    fn test_balances() {
        let mut fx = Fixture::new();
        let confirmed = fx.confirmed(funding_tx(8, &[(25, test_script(1))]), 120);
        fx.add(confirmed);
        fx.add(WalletTransaction::new(funding_tx(9, &[(5, test_script(1))]), 0));

        let coinbase = test_tx(&[OutPoint::null()], &[(300, test_script(1))]);
        let coinbase = fx.confirmed(coinbase, 180);
        fx.add(coinbase);

        let view = fx.view();
        assert_eq!(view.balance(), 25);
        assert_eq!(view.immature_balance(), 300);
        assert_eq!(view.unconfirmed_balance(), 5);
    }
}
