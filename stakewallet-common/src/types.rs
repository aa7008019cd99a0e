//! Core domain types and monetary constants
//!
//! Amounts are integer minor units (1 coin = 100 000 000 units). Every
//! constant that shapes selection or fee behaviour has a configurable
//! counterpart in [`crate::config`]; the values here are the defaults.

use bitcoin::{BlockHash, OutPoint, Transaction, Txid};
use serde::{Deserialize, Serialize};

/// Minor units per coin
pub const COIN: u64 = 100_000_000;

/// One "cent", the tie-break epsilon used by coin selection and dust handling
pub const CENT: u64 = 1_000_000;

/// Total money supply ceiling used for range checks
pub const MAX_MONEY: u64 = 2_000_000_000 * COIN;

/// Base policy fee for a standard transaction
pub const MIN_TX_FEE: u64 = CENT / 10;

/// Hard ceiling on the serialized size of a transaction the wallet will build
pub const MAX_STANDARD_TX_SIZE: usize = 100_000;

/// Blocks a coinbase/coinstake must be buried under before it matures
pub const COINBASE_MATURITY: u32 = 100;

/// Extra safety margin added on top of [`COINBASE_MATURITY`]
pub const MATURITY_MARGIN: u32 = 10;

/// Minimum age (seconds) of a transaction before its outputs may stake
pub const STAKE_MIN_AGE: i64 = 16 * 60 * 60;

/// Lock-time values below this are block heights, above are unix times
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Returns true when `value` lies within the valid money range
pub fn money_range(value: u64) -> bool {
    value <= MAX_MONEY
}

/// Ownership classification of a locking script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IsMine {
    /// Not ours
    No,
    /// We track the script but cannot sign for it
    WatchOnly,
    /// We hold the key
    Spendable,
}

impl IsMine {
    /// True for any ownership other than [`IsMine::No`]
    pub fn is_mine(self) -> bool {
        self != IsMine::No
    }
}

/// Which maturity rule governs the outputs of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaturityClass {
    Regular,
    Coinbase,
    Coinstake,
}

impl MaturityClass {
    /// Classify a transaction.
    ///
    /// A coinbase has a single input with a null prevout. A coinstake spends
    /// real inputs and marks itself with an empty, zero-valued first output.
    pub fn of(tx: &Transaction) -> Self {
        if is_coinbase(tx) {
            MaturityClass::Coinbase
        } else if is_coinstake(tx) {
            MaturityClass::Coinstake
        } else {
            MaturityClass::Regular
        }
    }

    /// Whether outputs of this class are subject to the maturity window
    pub fn needs_maturity(self) -> bool {
        !matches!(self, MaturityClass::Regular)
    }
}

/// True for a coinbase transaction
pub fn is_coinbase(tx: &Transaction) -> bool {
    tx.input.len() == 1 && tx.input[0].previous_output.is_null()
}

/// True for a coinstake transaction
pub fn is_coinstake(tx: &Transaction) -> bool {
    !tx.input.is_empty()
        && !tx.input[0].previous_output.is_null()
        && tx.output.len() >= 2
        && tx.output[0].value == 0
        && tx.output[0].script_pubkey.is_empty()
}

/// Reference to the block that confirmed a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef {
    pub hash: BlockHash,
    pub height: u32,
}

impl BlockRef {
    pub fn new(hash: BlockHash, height: u32) -> Self {
        Self { hash, height }
    }
}

/// Serializable outpoint representation used in events and log payloads
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPointInfo {
    /// Transaction ID as a string
    pub txid: String,
    /// Output index
    pub vout: u32,
}

impl From<&OutPoint> for OutPointInfo {
    fn from(outpoint: &OutPoint) -> Self {
        Self {
            txid: outpoint.txid.to_string(),
            vout: outpoint.vout,
        }
    }
}

/// Shorten a txid for display and logs
pub fn short_txid(txid: &Txid) -> String {
    let s = txid.to_string();
    s[..10].to_string()
}
