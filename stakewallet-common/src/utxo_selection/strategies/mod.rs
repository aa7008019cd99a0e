//! Coin selection strategies
//!
//! Each strategy runs a single confirmation tier. The selector owns the
//! tier retry loop and the explicit (coin control) case.

use rand::RngCore;

use crate::utxo_selection::types::{ConfirmationTier, SelectionResult};
use crate::utxo_view::Coin;

pub mod base;
pub mod min_conf;
pub mod smallest_first;

pub use min_conf::MinConfStrategy;
pub use smallest_first::SmallestFirstStrategy;

/// Trait defining a coin selection strategy
pub trait Strategy {
    /// Name of this strategy
    fn name(&self) -> &'static str;

    /// Select coins reaching `target` among those `tier` admits at `spend_time`
    ///
    /// # Returns
    /// * `None` when the admitted coins cannot reach the target
    fn select(
        &self,
        coins: &[Coin],
        target: u64,
        tier: ConfirmationTier,
        spend_time: i64,
        rng: &mut dyn RngCore,
    ) -> Option<SelectionResult>;
}
