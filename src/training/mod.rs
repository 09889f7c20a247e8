//! Model training and orchestration

pub mod anomaly;
pub mod ensemble;
pub mod metrics;
pub mod score;
pub mod trainer;
pub mod tuner;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Seeded train/test split over row indices; both halves come back sorted.
pub fn split_indices(n: usize, test_size: f32, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let test_count = (((n as f32) * test_size).round() as usize).min(n.saturating_sub(1));
    let mut test: Vec<usize> = indices[..test_count].to_vec();
    let mut train: Vec<usize> = indices[test_count..].to_vec();
    test.sort_unstable();
    train.sort_unstable();
    (train, test)
}

/// New matrix containing only the given rows, in the given order
pub(crate) fn select_rows(x: &Array2<f32>, rows: &[usize]) -> Array2<f32> {
    let mut out = Array2::zeros((rows.len(), x.ncols()));
    for (out_row, &src_row) in rows.iter().enumerate() {
        for col in 0..x.ncols() {
            out[[out_row, col]] = x[[src_row, col]];
        }
    }
    out
}

pub(crate) fn select_values<T: Copy>(values: &[T], rows: &[usize]) -> Vec<T> {
    rows.iter().map(|&r| values[r]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_is_seeded_and_disjoint() {
        let (train_a, test_a) = split_indices(100, 0.2, 42);
        let (train_b, test_b) = split_indices(100, 0.2, 42);
        assert_eq!(train_a, train_b);
        assert_eq!(test_a, test_b);
        assert_eq!(test_a.len(), 20);
        assert_eq!(train_a.len(), 80);

        let mut all: Vec<usize> = train_a.iter().chain(&test_a).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());

        let (_, test_c) = split_indices(100, 0.2, 7);
        assert_ne!(test_a, test_c);
    }

    #[test]
    fn test_split_always_leaves_training_rows() {
        let (train, test) = split_indices(3, 0.9, 42);
        assert!(!train.is_empty());
        assert_eq!(train.len() + test.len(), 3);
    }
}
