//! Collaborator traits the engine is built against
//!
//! Script interpretation, key material, the chain index, durable storage,
//! the memory pool and notification delivery all live outside this crate.
//! The wallet receives them as trait objects at construction, so tests can
//! substitute the in-memory fakes from [`crate::mock`].

use bitcoin::{Address, BlockHash, PubkeyHash, PublicKey, Script, Transaction, Txid};

use crate::error::StorageError;
use crate::events::WalletEvent;
use crate::types::{BlockRef, IsMine};
use crate::wallet_tx::WalletTransaction;

/// Pure script oracle
pub trait ScriptEngine: Send + Sync {
    /// Ownership of a locking script
    fn classify_ownership(&self, script: &Script) -> IsMine;

    /// Destination paid by a locking script, when it has one
    fn extract_destination(&self, script: &Script) -> Option<Address>;

    /// Locking script paying `destination`
    fn destination_script(&self, destination: &Address) -> bitcoin::ScriptBuf {
        destination.script_pubkey()
    }
}

/// Key material and signing
pub trait KeyStore: Send + Sync {
    /// Derive a fresh key; `None` when the store is locked
    fn generate_key(&self) -> Option<PublicKey>;

    /// Sign input `input_index` of `tx`, which spends an output locked by `prev_script`
    fn sign(&self, tx: &mut Transaction, input_index: usize, prev_script: &Script) -> bool;

    /// Whether the store holds the private key for `key_id`
    fn have_key(&self, key_id: &PubkeyHash) -> bool;
}

/// Position of the transaction that spent an output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpentPosition {
    pub txid: Txid,
    pub height: u32,
}

/// Authoritative per-output spent markers for one transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxIndex {
    pub spent: Vec<Option<SpentPosition>>,
}

impl TxIndex {
    /// Whether output `n` is spent according to the index. Missing entries are unspent.
    pub fn is_spent(&self, n: usize) -> bool {
        matches!(self.spent.get(n), Some(Some(_)))
    }
}

/// A transaction found while rescanning blocks
#[derive(Debug, Clone)]
pub struct ScannedTransaction {
    pub tx: Transaction,
    pub time: i64,
    pub block: BlockRef,
}

/// Chain index and authoritative spent index
pub trait ChainIndex: Send + Sync {
    /// Height of the best block
    fn best_height(&self) -> u32;

    /// Height of `block` when it is on the main chain
    fn main_chain_height(&self, block: &BlockHash) -> Option<u32>;

    /// Network-adjusted current time
    fn adjusted_time(&self) -> i64;

    /// When the best block was received
    fn time_best_received(&self) -> i64;

    /// Authoritative spent markers for a transaction in the chain
    fn read_tx_index(&self, txid: &Txid) -> Option<TxIndex>;

    /// Full transaction by id, when the chain knows it
    fn read_transaction(&self, txid: &Txid) -> Option<Transaction>;

    /// Whether the transaction is already recorded in a block
    fn contains_tx(&self, txid: &Txid) -> bool;

    /// Re-run structural, input and contract checks against current chain state
    fn revalidate(&self, tx: &Transaction) -> bool;

    /// Every transaction in main-chain blocks at or above `height`, in block order
    fn transactions_from_height(&self, height: u32) -> Vec<ScannedTransaction>;
}

/// Key pool record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPoolEntry {
    pub pubkey: PublicKey,
    pub created: i64,
}

/// Deterministic key chain progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HdChainState {
    pub external_counter: u64,
}

/// Opaque durable key-value store
pub trait PersistentStore: Send + Sync {
    fn write_transaction(&self, wtx: &WalletTransaction) -> Result<(), StorageError>;

    fn erase_transaction(&self, txid: &Txid) -> Result<(), StorageError>;

    fn write_key_pool_entry(&self, index: u64, entry: &KeyPoolEntry) -> Result<(), StorageError>;

    fn erase_pool_entry(&self, index: u64) -> Result<(), StorageError>;

    fn write_hd_chain_state(&self, state: &HdChainState) -> Result<(), StorageError>;
}

/// Memory pool and peer relay
pub trait Relay: Send + Sync {
    /// Submit to the memory pool; false when rejected
    fn accept_to_pool(&self, tx: &Transaction) -> bool;

    /// Announce to peers
    fn relay(&self, tx: &Transaction);

    /// Drop from the memory pool
    fn remove(&self, txid: &Txid);
}

/// Fire-and-forget observer
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: WalletEvent);
}
