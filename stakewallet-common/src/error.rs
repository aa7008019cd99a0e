//! Error taxonomy for the wallet engine
//!
//! Every fallible wallet operation returns [`WalletResult`]. Failures raised
//! before the commit pipeline starts persisting leave no state behind; the
//! variants document which stage produced them.
//!
//! # Usage
//!
//! ```
//! use stakewallet_common::error::{WalletError, WalletResult};
//!
//! fn check(value: i64) -> WalletResult<()> {
//!     if value < 0 {
//!         return Err(WalletError::Validation(format!("negative amount {}", value)));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check(-1).is_err());
//! ```

use bitcoin::{OutPoint, Txid};
use thiserror::Error;

/// Result alias used across the crate
pub type WalletResult<T> = Result<T, WalletError>;

/// Failures reported by the wallet engine
#[derive(Debug, Error)]
pub enum WalletError {
    /// Malformed request (empty recipients, negative values, out of range totals)
    #[error("Validation error: {0}")]
    Validation(String),

    /// No selection strategy reached the target at any confirmation tier
    #[error("Insufficient funds: needed {needed}, available {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    /// Caller-provided inputs cannot cover outputs plus fee
    #[error("Provided inputs total {available} cannot cover {required}")]
    ExplicitInputsInsufficient { available: u64, required: u64 },

    /// Serialized candidate reached the standard size ceiling
    #[error("Transaction size {size} exceeds limit {limit}")]
    SizeLimitExceeded { size: usize, limit: usize },

    /// Signer refused an input
    #[error("Failed to sign input {input}")]
    SigningFailure { input: usize },

    /// Fee estimate kept rising past the iteration cap
    #[error("Fee did not converge after {iterations} iterations")]
    FeeDidNotConverge { iterations: u32 },

    /// Key pool is empty and no new key could be generated
    #[error("Key pool exhausted")]
    KeyPoolExhausted,

    /// A pool entry refers to a key the key store does not hold
    #[error("Key pool entry {0} refers to an unknown key")]
    UnknownPoolKey(u64),

    /// The memory pool refused a committed transaction
    #[error("Transaction {0} was rejected by the memory pool")]
    TransactionRejected(Txid),

    /// An outpoint is not known to the wallet
    #[error("Unknown output {0}")]
    UnknownOutput(OutPoint),

    /// Spent bitmap index outside the output range
    #[error("Output index {index} out of range for {outputs} outputs")]
    OutputIndexOutOfRange { index: u32, outputs: usize },

    /// Durable write failed
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StorageError),
}

/// Errors surfaced by a [`crate::interfaces::PersistentStore`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("write failed for {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("record not found: {0}")]
    NotFound(String),
}

impl StorageError {
    pub fn write_failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        StorageError::WriteFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
