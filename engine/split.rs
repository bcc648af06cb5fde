//! Seeded train/test partitioning of row indices.

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

/// Row indices of the two subsets, each in shuffled order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffles `0..n_rows` with a `ChaCha8Rng` seeded from `seed` and cuts off
/// `ceil(n_rows * test_fraction)` rows for testing.
///
/// Returns `None` when the fraction is outside `(0, 1)` or either side would
/// end up empty.
pub fn train_test_split(n_rows: usize, test_fraction: f64, seed: u64) -> Option<Split> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return None;
    }
    let n_test = (n_rows as f64 * test_fraction).ceil() as usize;
    if n_test == 0 || n_test >= n_rows {
        return None;
    }

    let mut indices: Vec<usize> = (0..n_rows).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let train = indices.split_off(n_test);
    Some(Split {
        train,
        test: indices,
    })
}
