//! Seeded shuffling used to decorrelate submission order from job ids.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Fixed seed for the submission order shuffle.
///
/// The same job set is always submitted in the same order, which keeps
/// dry runs and real submissions comparable.
pub const SUBMISSION_SEED: u64 = 937_628;

/// Shuffles `items` in place with a `StdRng` seeded from `seed`.
pub fn seeded_shuffle<T>(items: &mut [T], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    items.shuffle(&mut rng);
}
