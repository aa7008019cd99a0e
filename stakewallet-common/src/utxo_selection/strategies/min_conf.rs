//! Confidence-tiered exact/near-exact selection
//!
//! The default strategy for plain sends. Coins below `target + cent` form
//! the "lower" bucket; the smallest coin above that is kept aside as a
//! single-coin fallback.
//!
//! 1. A coin equal to the target is returned alone, first match wins.
//! 2. A lower bucket summing exactly to the target is returned whole.
//! 3. A lower bucket short of the target defers to the larger coin.
//! 4. Otherwise the bucket is searched with
//!    [`approximate_best_subset`](super::base::approximate_best_subset),
//!    first against `target` and, failing an exact hit, against
//!    `target + cent`. The larger coin wins when the subset is not exact
//!    but still within a cent of the target, or when the larger coin
//!    overshoots no more than the subset does.

use rand::seq::SliceRandom;
use rand::RngCore;

use super::base::{admitted, approximate_best_subset};
use super::Strategy;
use crate::utxo_selection::types::{ConfirmationTier, SelectionResult};
use crate::utxo_view::Coin;

pub struct MinConfStrategy {
    cent: u64,
    iterations: u32,
}

impl MinConfStrategy {
    pub fn new(cent: u64, iterations: u32) -> Self {
        Self { cent, iterations }
    }
}

impl Strategy for MinConfStrategy {
    fn name(&self) -> &'static str {
        "confidence_tiered"
    }

    fn select(
        &self,
        coins: &[Coin],
        target: u64,
        tier: ConfirmationTier,
        spend_time: i64,
        rng: &mut dyn RngCore,
    ) -> Option<SelectionResult> {
        let mut candidates = admitted(coins, tier, spend_time);
        candidates.shuffle(rng);

        let near = target.saturating_add(self.cent);
        let mut lower: Vec<&Coin> = Vec::new();
        let mut total_lower = 0u64;
        let mut lowest_larger: Option<&Coin> = None;

        for coin in candidates {
            if coin.value == target {
                return Some(SelectionResult::new(vec![coin.clone()]));
            } else if coin.value < near {
                total_lower += coin.value;
                lower.push(coin);
            } else if lowest_larger.map_or(true, |larger| coin.value < larger.value) {
                lowest_larger = Some(coin);
            }
        }

        if total_lower == target {
            return Some(SelectionResult::new(lower.into_iter().cloned().collect()));
        }

        if total_lower < target {
            return lowest_larger.map(|coin| SelectionResult::new(vec![coin.clone()]));
        }

        // Stable sort keeps the shuffled order among equal values
        lower.sort_by(|a, b| b.value.cmp(&a.value));
        let values: Vec<u64> = lower.iter().map(|c| c.value).collect();

        let mut best = approximate_best_subset(&values, total_lower, target, self.iterations, rng);
        if best.total != target && total_lower >= near {
            best = approximate_best_subset(&values, total_lower, near, self.iterations, rng);
        }

        if let Some(larger) = lowest_larger {
            if (best.total != target && best.total < near) || larger.value <= best.total {
                return Some(SelectionResult::new(vec![larger.clone()]));
            }
        }

        let selected = lower
            .into_iter()
            .zip(best.included)
            .filter_map(|(coin, included)| included.then(|| coin.clone()))
            .collect();
        Some(SelectionResult::new(selected))
    }
}
