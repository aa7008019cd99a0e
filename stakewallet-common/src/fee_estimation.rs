//! Fee policy for wallet-built transactions
//!
//! Fees are charged per started kilobyte: a transaction of `n` serialized
//! bytes pays for `1 + n / 1000` kilobytes. Two schedules apply and the
//! larger wins:
//!
//! - the wallet's own per-kilobyte `transaction_fee`
//! - the policy minimum, `base_fee(purpose)` per kilobyte, where the purpose
//!   distinguishes plain payments from transactions carrying a contract
//!
//! Results are capped at [`MAX_MONEY`].

use serde::{Deserialize, Serialize};

use crate::config::{PolicyConfig, WalletConfig};
use crate::types::MAX_MONEY;

/// Purpose class a transaction is charged under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeePurpose {
    Standard,
    Contract,
}

/// Number of kilobytes a transaction of `bytes` is charged for
pub fn fee_units(bytes: usize) -> u64 {
    1 + (bytes as u64) / 1000
}

pub trait FeePolicy: Send + Sync {
    /// Base policy fee for one kilobyte
    fn base_fee(&self, purpose: FeePurpose) -> u64;

    /// Per-kilobyte fee the wallet chooses to pay
    fn transaction_fee(&self) -> u64;

    /// Policy minimum for a transaction of `bytes`
    fn min_fee(&self, purpose: FeePurpose, bytes: usize) -> u64 {
        fee_units(bytes)
            .saturating_mul(self.base_fee(purpose))
            .min(MAX_MONEY)
    }

    /// What the wallet's own rate asks for a transaction of `bytes`
    fn pay_fee(&self, bytes: usize) -> u64 {
        fee_units(bytes)
            .saturating_mul(self.transaction_fee())
            .min(MAX_MONEY)
    }

    /// Fee a finalized transaction must carry
    fn required_fee(&self, purpose: FeePurpose, bytes: usize) -> u64 {
        self.pay_fee(bytes).max(self.min_fee(purpose, bytes))
    }
}

/// Fee policy driven by configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardFeePolicy {
    pub transaction_fee: u64,
    pub min_tx_fee: u64,
    pub contract_min_fee: u64,
}

impl StandardFeePolicy {
    pub fn from_config(wallet: &WalletConfig, policy: &PolicyConfig) -> Self {
        Self {
            transaction_fee: wallet.transaction_fee,
            min_tx_fee: policy.min_tx_fee,
            contract_min_fee: policy.contract_min_fee,
        }
    }
}

impl FeePolicy for StandardFeePolicy {
    fn base_fee(&self, purpose: FeePurpose) -> u64 {
        match purpose {
            FeePurpose::Standard => self.min_tx_fee,
            FeePurpose::Contract => self.min_tx_fee.max(self.contract_min_fee),
        }
    }

    fn transaction_fee(&self) -> u64 {
        self.transaction_fee
    }
}
