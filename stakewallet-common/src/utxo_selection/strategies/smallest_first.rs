//! Smallest-first greedy selection
//!
//! Used for transactions carrying a governance contract: accumulating the
//! smallest coins keeps large outputs out of the contract transaction.

use rand::RngCore;

use super::base::admitted;
use super::Strategy;
use crate::utxo_selection::types::{ConfirmationTier, SelectionResult};
use crate::utxo_view::Coin;

#[derive(Debug, Default)]
pub struct SmallestFirstStrategy;

impl SmallestFirstStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for SmallestFirstStrategy {
    fn name(&self) -> &'static str {
        "smallest_first"
    }

    fn select(
        &self,
        coins: &[Coin],
        target: u64,
        tier: ConfirmationTier,
        spend_time: i64,
        _rng: &mut dyn RngCore,
    ) -> Option<SelectionResult> {
        let mut candidates = admitted(coins, tier, spend_time);
        candidates.sort_by_key(|coin| coin.value);

        let mut selected = Vec::new();
        let mut total = 0u64;
        for coin in candidates {
            total += coin.value;
            selected.push(coin.clone());
            if total >= target {
                return Some(SelectionResult { selected, total });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IsMine;
    use bitcoin::hashes::Hash;
    use bitcoin::{OutPoint, ScriptBuf, Txid};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn coin(value: u64, depth: u32) -> Coin {
        Coin {
            outpoint: OutPoint::new(Txid::from_byte_array([value as u8; 32]), 0),
            value,
            script_pubkey: ScriptBuf::new(),
            depth,
            from_me: false,
            tx_time: 0,
            ownership: IsMine::Spendable,
        }
    }

    #[test]
    fn test_stops_at_first_sufficient_prefix() {
        let mut rng = SmallRng::seed_from_u64(0);
        let coins = vec![coin(100, 20), coin(3, 20), coin(1, 20), coin(2, 20)];
        let result = SmallestFirstStrategy::new()
            .select(&coins, 5, ConfirmationTier::new(1, 10), 0, &mut rng)
            .unwrap();
        assert_eq!(
            result.selected.iter().map(|c| c.value).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(result.total, 6);
    }

    #[test]
    fn test_shallow_coins_skipped_by_tier() {
        let mut rng = SmallRng::seed_from_u64(0);
        let coins = vec![coin(1, 2), coin(2, 20), coin(9, 20)];
        let result = SmallestFirstStrategy::new()
            .select(&coins, 3, ConfirmationTier::new(1, 10), 0, &mut rng)
            .unwrap();
        assert_eq!(result.total, 11);
        assert!(SmallestFirstStrategy::new()
            .select(&coins, 30, ConfirmationTier::new(0, 1), 0, &mut rng)
            .is_none());
    }
}
