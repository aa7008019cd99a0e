//! Wallet engine
//!
//! [`Wallet`] owns the transaction repository, the key pool and the
//! selection machinery, and holds the injected collaborators. The commit,
//! reconciliation, rebroadcast and staking pipelines extend it from their
//! own modules.
//!
//! # Locking
//!
//! Two locks guard state: the chain lock and the wallet (repository) lock.
//! Whenever both are needed the chain lock is taken first; use
//! [`Wallet::lock_both`] rather than acquiring them separately.

use bitcoin::{Transaction, Txid};
use parking_lot::{Mutex, MutexGuard};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde_json::json;
use std::sync::Arc;

use crate::config::Config;
use crate::error::WalletResult;
use crate::events::{ChangeType, WalletEvent};
use crate::fee_estimation::{FeePolicy, StandardFeePolicy};
use crate::interfaces::{
    ChainIndex, KeyStore, NotificationSink, PersistentStore, Relay, ScriptEngine,
};
use crate::keypool::{KeyPool, ReserveKey};
use crate::logging::{log_core, log_storage, LogLevel};
use crate::rebroadcast::RebroadcastTimer;
use crate::repository::{RepositoryGuard, TransactionRepository};
use crate::tx_builder::{BuildRequest, BuildSettings, PendingTransaction, TxBuilder};
use crate::types::IsMine;
use crate::utxo_selection::CoinSelector;
use crate::utxo_view::{Coin, CoinFilter, UtxoView, ViewContext};
use crate::wallet_tx::WalletTransaction;

/// External systems the wallet is built against
#[derive(Clone)]
pub struct Collaborators {
    pub chain: Arc<dyn ChainIndex>,
    pub scripts: Arc<dyn ScriptEngine>,
    pub keys: Arc<dyn KeyStore>,
    pub store: Arc<dyn PersistentStore>,
    pub relay: Arc<dyn Relay>,
    pub notifier: Arc<dyn NotificationSink>,
}

pub struct Wallet {
    pub(crate) config: Config,
    chain_lock: Mutex<()>,
    pub(crate) repository: TransactionRepository,
    pub(crate) deps: Collaborators,
    fee_policy: Box<dyn FeePolicy>,
    key_pool: Arc<KeyPool>,
    selector: CoinSelector,
    build_settings: BuildSettings,
    pub(crate) rng: Mutex<SmallRng>,
    pub(crate) rebroadcast: Mutex<RebroadcastTimer>,
}

impl Wallet {
    /// Create a wallet with an OS-seeded random source
    pub fn new(config: Config, deps: Collaborators) -> Self {
        Self::with_rng(config, deps, SmallRng::from_os_rng())
    }

    /// Create a wallet whose selections, shuffles and change positions are reproducible
    pub fn with_seed(config: Config, deps: Collaborators, seed: u64) -> Self {
        Self::with_rng(config, deps, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(config: Config, deps: Collaborators, rng: SmallRng) -> Self {
        let key_pool = Arc::new(KeyPool::new(
            deps.keys.clone(),
            deps.store.clone(),
            config.wallet.key_pool_size,
        ));
        let selector =
            CoinSelector::from_config(&config.selection).with_events(deps.notifier.clone());
        log_core(
            LogLevel::Debug,
            "Wallet created",
            Some(json!({
                "key_pool_size": config.wallet.key_pool_size,
                "reserve_balance": config.wallet.reserve_balance,
                "change_to_input_address": config.wallet.change_to_input_address,
            })),
        );
        Self {
            fee_policy: Box::new(StandardFeePolicy::from_config(&config.wallet, &config.policy)),
            build_settings: BuildSettings::from_config(&config),
            chain_lock: Mutex::new(()),
            repository: TransactionRepository::new(),
            key_pool,
            selector,
            rng: Mutex::new(rng),
            rebroadcast: Mutex::new(RebroadcastTimer::default()),
            config,
            deps,
        }
    }

    /// Replace the configured fee policy
    pub fn with_fee_policy(mut self, fee_policy: Box<dyn FeePolicy>) -> Self {
        self.fee_policy = fee_policy;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repository(&self) -> &TransactionRepository {
        &self.repository
    }

    pub fn key_pool(&self) -> &Arc<KeyPool> {
        &self.key_pool
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.deps
    }

    pub fn fee_policy(&self) -> &dyn FeePolicy {
        self.fee_policy.as_ref()
    }

    /// Take the chain lock, then the wallet lock
    pub fn lock_both(&self) -> (MutexGuard<'_, ()>, RepositoryGuard<'_>) {
        let chain = self.chain_lock.lock();
        let repo = self.repository.lock();
        (chain, repo)
    }

    pub(crate) fn view_context(&self) -> ViewContext<'_> {
        ViewContext {
            chain: self.deps.chain.as_ref(),
            scripts: self.deps.scripts.as_ref(),
            min_input_value: self.config.wallet.min_input_value,
            maturity_window: self.config.staking.maturity_window(),
            stake_min_age: self.config.staking.stake_min_age,
        }
    }

    pub(crate) fn notify_changed(&self, txid: &Txid, change: ChangeType) {
        self.deps.notifier.notify(WalletEvent::TransactionChanged {
            txid: txid.to_string(),
            change,
        });
    }

    pub(crate) fn persist(&self, wtx: &WalletTransaction) -> WalletResult<()> {
        self.deps.store.write_transaction(wtx)?;
        log_storage(
            LogLevel::Trace,
            "Transaction written",
            Some(json!({ "txid": wtx.txid().to_string() })),
        );
        Ok(())
    }

    pub(crate) fn ownership(&self, script: &bitcoin::Script) -> IsMine {
        self.deps.scripts.classify_ownership(script)
    }

    /// Whether any output of `tx` is ours
    pub fn is_mine(&self, tx: &Transaction) -> bool {
        tx.output
            .iter()
            .any(|o| self.ownership(&o.script_pubkey).is_mine())
    }

    pub fn get_transaction(&self, txid: &Txid) -> Option<WalletTransaction> {
        self.repository.lock().get(txid).cloned()
    }

    pub fn available_coins(&self, filter: &CoinFilter<'_>) -> Vec<Coin> {
        let (_chain, repo) = self.lock_both();
        UtxoView::new(repo.map(), self.view_context()).available_coins(filter)
    }

    pub fn balance(&self) -> u64 {
        let (_chain, repo) = self.lock_both();
        UtxoView::new(repo.map(), self.view_context()).balance()
    }

    pub fn unconfirmed_balance(&self) -> u64 {
        let (_chain, repo) = self.lock_both();
        UtxoView::new(repo.map(), self.view_context()).unconfirmed_balance()
    }

    pub fn immature_balance(&self) -> u64 {
        let (_chain, repo) = self.lock_both();
        UtxoView::new(repo.map(), self.view_context()).immature_balance()
    }

    pub fn stake(&self) -> u64 {
        let (_chain, repo) = self.lock_both();
        UtxoView::new(repo.map(), self.view_context()).stake()
    }

    /// Start a change-key reservation
    pub fn reserve_key(&self) -> ReserveKey {
        self.key_pool.reserve_key()
    }

    /// Build and sign a transaction without committing it
    pub fn create_transaction(
        &self,
        request: &BuildRequest,
        reserve: &mut ReserveKey,
    ) -> WalletResult<PendingTransaction> {
        let (_chain, repo) = self.lock_both();
        let builder = TxBuilder {
            view: UtxoView::new(repo.map(), self.view_context()),
            scripts: self.deps.scripts.as_ref(),
            keys: self.deps.keys.as_ref(),
            fee_policy: self.fee_policy.as_ref(),
            selector: &self.selector,
            settings: self.build_settings.clone(),
            spend_time: self.deps.chain.adjusted_time(),
        };
        let mut rng = self.rng.lock();
        builder.create_transaction(request, reserve, &mut *rng)
    }
}
