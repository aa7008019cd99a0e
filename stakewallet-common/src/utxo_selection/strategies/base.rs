//! Helpers shared by the selection strategies

use rand::{Rng, RngCore};

use crate::utxo_selection::types::ConfirmationTier;
use crate::utxo_view::Coin;

/// Coins admitted by `tier` at `spend_time`, in input order
pub fn admitted<'a>(coins: &'a [Coin], tier: ConfirmationTier, spend_time: i64) -> Vec<&'a Coin> {
    coins
        .iter()
        .filter(|coin| coin.value > 0 && tier.admits(coin, spend_time))
        .collect()
}

/// Best subset found by randomized approximation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approximation {
    /// Inclusion flags, parallel to the values searched
    pub included: Vec<bool>,
    /// Sum of the included values
    pub total: u64,
}

/// Stochastic subset-sum approximation.
///
/// Starts from "everything included" and runs up to `iterations` trials,
/// stopping early on an exact hit. Each trial makes a random-inclusion pass
/// then a greedy pass over the remaining values; whenever the running sum
/// reaches `target` the subset is recorded if it beats the best so far, and
/// the value just added is taken back out so the trial keeps searching for a
/// tighter fit.
///
/// # Arguments
/// * `values` - Candidate values, expected in descending order
/// * `total_lower` - Sum of `values`
/// * `target` - Value to reach
/// * `iterations` - Trial budget
pub fn approximate_best_subset(
    values: &[u64],
    total_lower: u64,
    target: u64,
    iterations: u32,
    rng: &mut dyn RngCore,
) -> Approximation {
    let mut best = Approximation {
        included: vec![true; values.len()],
        total: total_lower,
    };

    let mut rep = 0;
    while rep < iterations && best.total != target {
        let mut included = vec![false; values.len()];
        let mut total = 0u64;
        let mut reached = false;

        for pass in 0..2 {
            if reached {
                break;
            }
            for (i, value) in values.iter().enumerate() {
                let take = if pass == 0 {
                    rng.random_bool(0.5)
                } else {
                    !included[i]
                };
                if !take {
                    continue;
                }
                total += value;
                included[i] = true;
                if total >= target {
                    reached = true;
                    if total < best.total {
                        best.total = total;
                        best.included = included.clone();
                    }
                    total -= value;
                    included[i] = false;
                }
            }
        }
        rep += 1;
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_exact_subset_is_found() {
        let mut rng = SmallRng::seed_from_u64(7);
        let values = [50, 30, 20, 5];
        let best = approximate_best_subset(&values, 105, 85, 1000, &mut rng);
        assert_eq!(best.total, 85);
        assert_eq!(best.included, vec![true, true, false, true]);
    }

    #[test]
    fn test_unreachable_target_keeps_full_set() {
        let mut rng = SmallRng::seed_from_u64(1);
        let best = approximate_best_subset(&[3, 2], 5, 9, 50, &mut rng);
        assert_eq!(best.total, 5);
        assert_eq!(best.included, vec![true, true]);
    }

    #[test]
    fn test_zero_iterations_returns_everything() {
        let mut rng = SmallRng::seed_from_u64(3);
        let best = approximate_best_subset(&[4, 4, 4], 12, 4, 0, &mut rng);
        assert_eq!(best.total, 12);
    }
}
