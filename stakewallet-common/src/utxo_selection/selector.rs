//! Main coin selector
//!
//! [`CoinSelector`] is the context of the strategy pattern: it picks the
//! [`Strategy`] for the requested [`SelectionStrategy`], retries it across
//! the confirmation [`TIERS`] and publishes the outcome when an event sink
//! is attached.
//!
//! # Events
//!
//! - `WalletEvent::SelectionCompleted` on success
//! - `WalletEvent::SelectionFailed` when every tier fails

use rand::RngCore;
use serde_json::json;
use std::sync::Arc;

use crate::config::SelectionConfig;
use crate::error::{WalletError, WalletResult};
use crate::events::WalletEvent;
use crate::interfaces::NotificationSink;
use crate::logging::{log_selection, LogLevel};
use crate::utxo_selection::strategies::{MinConfStrategy, SmallestFirstStrategy, Strategy};
use crate::utxo_selection::types::{SelectionResult, SelectionStrategy, TIERS};
use crate::utxo_view::Coin;

pub struct CoinSelector {
    cent: u64,
    iterations: u32,
    events: Option<Arc<dyn NotificationSink>>,
}

impl Default for CoinSelector {
    fn default() -> Self {
        Self::from_config(&SelectionConfig::default())
    }
}

impl CoinSelector {
    pub fn from_config(config: &SelectionConfig) -> Self {
        Self {
            cent: config.cent,
            iterations: config.approximation_iterations,
            events: None,
        }
    }

    /// Attach a sink for selection events
    pub fn with_events(mut self, events: Arc<dyn NotificationSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn cent(&self) -> u64 {
        self.cent
    }

    /// Select coins reaching `target`.
    ///
    /// `Explicit` returns every candidate without checking the total; the
    /// caller validates it against its own requirement.
    ///
    /// # Errors
    /// * `WalletError::InsufficientFunds` when no tier reaches the target
    pub fn select_coins(
        &self,
        coins: &[Coin],
        target: u64,
        strategy: SelectionStrategy,
        spend_time: i64,
        rng: &mut dyn RngCore,
    ) -> WalletResult<SelectionResult> {
        let result = match strategy {
            SelectionStrategy::Explicit => Some(SelectionResult::new(coins.to_vec())),
            SelectionStrategy::ConfidenceTiered => {
                let min_conf = MinConfStrategy::new(self.cent, self.iterations);
                self.select_tiered(&min_conf, coins, target, spend_time, rng)
            }
            SelectionStrategy::SmallestFirst => {
                self.select_tiered(&SmallestFirstStrategy::new(), coins, target, spend_time, rng)
            }
        };

        match result {
            Some(result) => {
                log_selection(
                    LogLevel::Debug,
                    "Coin selection succeeded",
                    Some(json!({
                        "strategy": strategy.name(),
                        "target": target,
                        "total": result.total,
                        "inputs": result.len(),
                    })),
                );
                self.publish(WalletEvent::SelectionCompleted {
                    strategy: strategy.name().to_string(),
                    selected: result.outpoint_infos(),
                    target,
                    total: result.total,
                });
                Ok(result)
            }
            None => {
                let available: u64 = coins.iter().map(|c| c.value).sum();
                log_selection(
                    LogLevel::Info,
                    "Coin selection failed",
                    Some(json!({
                        "strategy": strategy.name(),
                        "target": target,
                        "available": available,
                    })),
                );
                self.publish(WalletEvent::SelectionFailed {
                    strategy: strategy.name().to_string(),
                    target,
                    available,
                });
                Err(WalletError::InsufficientFunds {
                    needed: target,
                    available,
                })
            }
        }
    }

    fn select_tiered(
        &self,
        strategy: &dyn Strategy,
        coins: &[Coin],
        target: u64,
        spend_time: i64,
        rng: &mut dyn RngCore,
    ) -> Option<SelectionResult> {
        TIERS.iter().find_map(|tier| {
            let result = strategy.select(coins, target, *tier, spend_time, rng);
            if result.is_none() {
                log::trace!(
                    "{} found nothing at tier ({}, {})",
                    strategy.name(),
                    tier.conf_mine,
                    tier.conf_theirs
                );
            }
            result
        })
    }

    fn publish(&self, event: WalletEvent) {
        if let Some(events) = &self.events {
            events.notify(event);
        }
    }
}
