//! Stakewallet Common Library
//!
//! The wallet engine of a proof-of-stake node: it decides which outputs to
//! spend, builds and signs the spending transaction, records it, and keeps
//! the per-output spent markers consistent with the chain.
//!
//! # Modules
//!
//! - `types`: Shared domain types and constants
//! - `error`: Error taxonomy
//! - `logging`: Context-tagged logging infrastructure
//! - `config`: Configuration management
//! - `events`: Wallet event bus
//! - `interfaces`: Collaborator traits (chain, scripts, keys, storage, relay)
//! - `wallet_tx` / `repository`: Wallet transaction records and their store
//! - `utxo_view`: Spendable and stakeable output views
//! - `utxo_selection`: Coin selection algorithms
//! - `fee_estimation`: Fee policy
//! - `keypool`: Pre-generated change keys
//! - `tx_builder`: Transaction construction and the fee loop
//! - `wallet`: The engine itself, extended by `commit`, `reconcile`,
//!   `rebroadcast` and `staking`
//! - `mock`: In-memory collaborators for tests
//!
//! # Money handling
//!
//! - Every amount is an integer count of minor units
//! - Inputs are never marked spent without a durable record of the spender
//! - Selection never returns less than the requested target

/// Shared domain types and constants
pub mod types;

/// Error taxonomy
pub mod error;

/// Context-tagged logging
pub mod logging;

/// Configuration management
pub mod config;

/// Wallet event bus
pub mod events;

/// Collaborator traits
pub mod interfaces;

/// Wallet transaction record
pub mod wallet_tx;

/// Wallet transaction repository
pub mod repository;

/// Spendable and stakeable output views
pub mod utxo_view;

/// Coin selection algorithms
pub mod utxo_selection;

/// Fee policy
pub mod fee_estimation;

/// Change key pool
pub mod keypool;

/// Transaction construction
pub mod tx_builder;

/// Wallet engine
pub mod wallet;

/// Commit and broadcast
pub mod commit;

/// Spend-state reconciliation
pub mod reconcile;

/// Rebroadcast of unconfirmed transactions
pub mod rebroadcast;

/// Staking coin selection
pub mod staking;

/// In-memory collaborators for tests
pub mod mock;

pub use bitcoin::{Address, Network, OutPoint, ScriptBuf, Transaction, Txid};

pub use commit::SentTransaction;
pub use config::Config;
pub use error::{StorageError, WalletError, WalletResult};
pub use events::{ChangeType, MismatchKind, WalletEvent, WalletEventBus};
pub use fee_estimation::{FeePolicy, FeePurpose, StandardFeePolicy};
pub use interfaces::{ChainIndex, KeyStore, NotificationSink, PersistentStore, Relay, ScriptEngine};
pub use keypool::{KeyPool, ReserveKey};
pub use rebroadcast::ResendReport;
pub use reconcile::{ReacceptReport, ReconcileMode, ReconcileReport};
pub use repository::{TransactionRepository, Upsert};
pub use staking::{NotStaking, NotStakingReason, StakingSelection};
pub use tx_builder::{
    BuildRequest, CoinControl, PayloadKind, PendingTransaction, Recipient, TxPayload,
};
pub use types::{BlockRef, IsMine, MaturityClass};
pub use utxo_selection::{CoinSelector, SelectionResult, SelectionStrategy};
pub use utxo_view::{Coin, CoinFilter};
pub use wallet::{Collaborators, Wallet};
pub use wallet_tx::WalletTransaction;

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

use std::sync::Once;

static INIT: Once = Once::new();

/// Library initialization
///
/// Sets up logging with the default configuration. Safe to call more than
/// once; only the first call has any effect.
pub fn init() -> Result<(), String> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = logging::init(&logging::LogConfig::default())
            .map_err(|e| format!("Failed to initialize logging: {}", e));
    });
    result
}
