//! Coin selection
//!
//! Given candidate [`Coin`](crate::utxo_view::Coin)s from the UTXO view and
//! a target value, choose a subset whose total reaches the target.
//!
//! # Module Structure
//!
//! - `types.rs` - Selection results, strategy names and confirmation tiers
//! - `selector.rs` - [`selector::CoinSelector`], the strategy context with tier retry and events
//! - `strategies/` - One file per algorithm behind the `Strategy` trait
//!   - `min_conf.rs` - Exact/near-exact selection with randomized subset-sum
//!   - `smallest_first.rs` - Ascending greedy accumulation
//!
//! Randomness comes from the caller as `&mut dyn RngCore`; seeding it makes
//! every selection reproducible.
//!
//! # Typical Usage
//!
//! ```no_run
//! use stakewallet_common::utxo_selection::selector::CoinSelector;
//! use stakewallet_common::utxo_selection::types::SelectionStrategy;
//! use rand::rngs::SmallRng;
//! use rand::SeedableRng;
//!
//! let coins = Vec::new();
//! let mut rng = SmallRng::seed_from_u64(42);
//! match CoinSelector::default().select_coins(
//!     &coins,
//!     50_000,
//!     SelectionStrategy::ConfidenceTiered,
//!     0,
//!     &mut rng,
//! ) {
//!     Ok(result) => println!("selected {} coins worth {}", result.len(), result.total),
//!     Err(e) => println!("selection failed: {}", e),
//! }
//! ```

pub mod selector;
pub mod strategies;
pub mod types;

pub use selector::CoinSelector;
pub use types::{ConfirmationTier, SelectionResult, SelectionStrategy, TIERS};
