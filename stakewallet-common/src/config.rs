//! Wallet engine configuration.
//!
//! Settings live in a TOML file with one table per concern. Every field has a
//! default so a partial (or empty) file is valid; [`Config::validate`] rejects
//! combinations the engine cannot work with.
//!
//! ```toml
//! [wallet]
//! transaction_fee = 100000
//! change_to_input_address = false
//!
//! [selection]
//! cent = 1000000
//!
//! [staking]
//! stake_min_age = 57600
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::logging::LogConfig;
use crate::types::{
    money_range, CENT, COINBASE_MATURITY, MATURITY_MARGIN, MAX_STANDARD_TX_SIZE, MIN_TX_FEE,
    STAKE_MIN_AGE,
};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub wallet: WalletConfig,

    #[serde(default)]
    pub selection: SelectionConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub staking: StakingConfig,

    #[serde(default)]
    pub logging: LogConfig,
}

/// Wallet behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Outputs below this value are never offered as inputs
    #[serde(default)]
    pub min_input_value: u64,

    /// Per-kilobyte fee the wallet pays on its own transactions
    #[serde(default = "default_transaction_fee")]
    pub transaction_fee: u64,

    /// Balance withheld from staking
    #[serde(default)]
    pub reserve_balance: u64,

    /// Send change back to the first input address instead of a fresh key
    #[serde(default)]
    pub change_to_input_address: bool,

    /// Number of pre-generated keys kept in the pool
    #[serde(default = "default_key_pool_size")]
    pub key_pool_size: usize,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            min_input_value: 0,
            transaction_fee: default_transaction_fee(),
            reserve_balance: 0,
            change_to_input_address: false,
            key_pool_size: default_key_pool_size(),
        }
    }
}

/// Coin selection tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Tie-break epsilon between the approximate subset and a single larger coin
    #[serde(default = "default_cent")]
    pub cent: u64,

    /// Trials per approximate subset-sum run
    #[serde(default = "default_iterations")]
    pub approximation_iterations: u32,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            cent: default_cent(),
            approximation_iterations: default_iterations(),
        }
    }
}

/// Fee and size policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Base fee for a standard transaction
    #[serde(default = "default_min_tx_fee")]
    pub min_tx_fee: u64,

    /// Base fee for a transaction carrying a governance contract
    #[serde(default = "default_min_tx_fee")]
    pub contract_min_fee: u64,

    /// Serialized size ceiling (exclusive)
    #[serde(default = "default_max_tx_size")]
    pub max_standard_tx_size: usize,

    /// Cap on fee-convergence iterations
    #[serde(default = "default_fee_iterations")]
    pub max_fee_iterations: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_tx_fee: default_min_tx_fee(),
            contract_min_fee: default_min_tx_fee(),
            max_standard_tx_size: default_max_tx_size(),
            max_fee_iterations: default_fee_iterations(),
        }
    }
}

/// Staking and maturity rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingConfig {
    /// Seconds a transaction must age before its outputs can stake
    #[serde(default = "default_stake_min_age")]
    pub stake_min_age: i64,

    /// Depth at which coinbase/coinstake outputs mature
    #[serde(default = "default_coinbase_maturity")]
    pub coinbase_maturity: u32,

    /// Extra blocks required on top of `coinbase_maturity`
    #[serde(default = "default_maturity_margin")]
    pub maturity_margin: u32,
}

impl StakingConfig {
    /// Depth a coinbase/coinstake needs before it can be spent
    pub fn maturity_window(&self) -> u32 {
        self.coinbase_maturity.saturating_add(self.maturity_margin)
    }
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            stake_min_age: default_stake_min_age(),
            coinbase_maturity: default_coinbase_maturity(),
            maturity_margin: default_maturity_margin(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|e| anyhow!("Failed to read config file: {}", e))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| anyhow!("Failed to parse config file: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        fs::write(path, content).map_err(|e| anyhow!("Failed to write config file: {}", e))?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.selection.cent == 0 {
            return Err(anyhow!("Invalid cent: must be greater than 0"));
        }

        if self.selection.approximation_iterations == 0 {
            return Err(anyhow!("Invalid approximation iterations: must be greater than 0"));
        }

        if self.policy.max_fee_iterations == 0 {
            return Err(anyhow!("Invalid fee iteration cap: must be greater than 0"));
        }

        if self.policy.max_standard_tx_size == 0 {
            return Err(anyhow!("Invalid max transaction size: must be greater than 0"));
        }

        for (name, value) in [
            ("transaction_fee", self.wallet.transaction_fee),
            ("reserve_balance", self.wallet.reserve_balance),
            ("min_input_value", self.wallet.min_input_value),
            ("min_tx_fee", self.policy.min_tx_fee),
            ("contract_min_fee", self.policy.contract_min_fee),
        ] {
            if !money_range(value) {
                anyhow::bail!("Invalid {}: {} is outside the money range", name, value);
            }
        }

        if self.staking.stake_min_age < 0 {
            anyhow::bail!("Invalid stake minimum age: {}", self.staking.stake_min_age);
        }

        Ok(())
    }
}

/// Ensure a configuration file exists at the specified path
/// If it doesn't exist, create it with default values
pub fn ensure_config_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        let content = toml::to_string_pretty(&Config::default())
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| anyhow!("Failed to create config directory: {}", e))?;
            }
        }

        fs::write(path, content)
            .map_err(|e| anyhow!("Failed to write default config file: {}", e))?;
    }

    Ok(())
}

// Default value functions

fn default_transaction_fee() -> u64 {
    MIN_TX_FEE
}

fn default_key_pool_size() -> usize {
    100
}

fn default_cent() -> u64 {
    CENT
}

fn default_iterations() -> u32 {
    1000
}

fn default_min_tx_fee() -> u64 {
    MIN_TX_FEE
}

fn default_max_tx_size() -> usize {
    MAX_STANDARD_TX_SIZE
}

fn default_fee_iterations() -> u32 {
    32
}

fn default_stake_min_age() -> i64 {
    STAKE_MIN_AGE
}

fn default_coinbase_maturity() -> u32 {
    COINBASE_MATURITY
}

fn default_maturity_margin() -> u32 {
    MATURITY_MARGIN
}
