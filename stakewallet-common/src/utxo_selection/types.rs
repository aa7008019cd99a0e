//! Types shared by the selector and its strategies

use bitcoin::OutPoint;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::OutPointInfo;
use crate::utxo_view::Coin;

/// Outputs chosen for a transaction, with their total value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionResult {
    pub selected: Vec<Coin>,
    pub total: u64,
}

impl SelectionResult {
    pub fn new(selected: Vec<Coin>) -> Self {
        let total = selected.iter().map(|c| c.value).sum();
        Self { selected, total }
    }

    pub fn outpoints(&self) -> Vec<OutPoint> {
        self.selected.iter().map(|c| c.outpoint).collect()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Event-safe outpoint list
    pub fn outpoint_infos(&self) -> Vec<OutPointInfo> {
        self.selected
            .iter()
            .map(|c| OutPointInfo::from(&c.outpoint))
            .collect()
    }
}

/// Selection algorithm chosen by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectionStrategy {
    /// Exact match, lower-bucket sum, randomized subset-sum or the smallest larger coin
    ConfidenceTiered,
    /// Ascending greedy accumulation, for governance payloads
    SmallestFirst,
    /// Caller-named outputs, returned as-is
    Explicit,
}

impl SelectionStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            SelectionStrategy::ConfidenceTiered => "confidence_tiered",
            SelectionStrategy::SmallestFirst => "smallest_first",
            SelectionStrategy::Explicit => "explicit",
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Minimum depth for outputs of own and foreign transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationTier {
    pub conf_mine: u32,
    pub conf_theirs: u32,
}

impl ConfirmationTier {
    pub const fn new(conf_mine: u32, conf_theirs: u32) -> Self {
        Self {
            conf_mine,
            conf_theirs,
        }
    }

    /// Whether `coin` is deep enough for this tier and not newer than `spend_time`
    pub fn admits(&self, coin: &Coin, spend_time: i64) -> bool {
        let required = if coin.from_me {
            self.conf_mine
        } else {
            self.conf_theirs
        };
        coin.depth >= required && coin.tx_time <= spend_time
    }
}

/// Tiers tried in order, most conservative first
pub const TIERS: [ConfirmationTier; 3] = [
    ConfirmationTier::new(1, 10),
    ConfirmationTier::new(1, 1),
    ConfirmationTier::new(0, 1),
];
