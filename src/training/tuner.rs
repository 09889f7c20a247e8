//! Exhaustive grid search over a fixed hyperparameter grid

use ndarray::Array2;

use crate::boosting::{BoostParams, Booster};
use crate::features::encoding::Fnv1a;
use crate::training::{select_rows, select_values};
use crate::{Result, TuningConfig};

/// The search grid: one value list per tuned dimension
#[derive(Debug, Clone)]
pub struct ParamGrid {
    pub max_depth: Vec<usize>,
    pub learning_rate: Vec<f32>,
    pub n_rounds: Vec<usize>,
    pub subsample: Vec<f32>,
    pub colsample: Vec<f32>,
    pub min_child_weight: Vec<f32>,
    pub gamma: Vec<f32>,
}

impl Default for ParamGrid {
    fn default() -> Self {
        ParamGrid {
            max_depth: vec![3, 5, 7],
            learning_rate: vec![0.01, 0.1, 0.2],
            n_rounds: vec![50, 100, 200],
            subsample: vec![0.6, 0.8, 1.0],
            colsample: vec![0.6, 0.8, 1.0],
            min_child_weight: vec![1.0, 3.0, 5.0],
            gamma: vec![0.0, 0.1, 0.2],
        }
    }
}

impl ParamGrid {
    /// Every dimension reduced to its first and last value
    fn trimmed(&self) -> ParamGrid {
        fn endpoints<T: Copy>(values: &[T]) -> Vec<T> {
            match values {
                [] => Vec::new(),
                [only] => vec![*only],
                [first, .., last] => vec![*first, *last],
            }
        }
        ParamGrid {
            max_depth: endpoints(&self.max_depth),
            learning_rate: endpoints(&self.learning_rate),
            n_rounds: endpoints(&self.n_rounds),
            subsample: endpoints(&self.subsample),
            colsample: endpoints(&self.colsample),
            min_child_weight: endpoints(&self.min_child_weight),
            gamma: endpoints(&self.gamma),
        }
    }

    fn combinations(&self) -> usize {
        self.max_depth.len()
            * self.learning_rate.len()
            * self.n_rounds.len()
            * self.subsample.len()
            * self.colsample.len()
            * self.min_child_weight.len()
            * self.gamma.len()
    }
}

/// Grid-search hyperparameter tuner with a content-addressed result cache.
///
/// The cache key hashes the actual training data plus the objective, so two
/// datasets that merely share a shape can never alias each other's tuned
/// parameters.
pub struct HyperTuner {
    grid: ParamGrid,
    folds: usize,
    large_dataset_rows: usize,
    cache: Vec<(u64, BoostParams)>,
    capacity: usize,
}

impl HyperTuner {
    pub fn new(config: &TuningConfig) -> Self {
        HyperTuner {
            grid: ParamGrid::default(),
            folds: config.folds.max(2),
            large_dataset_rows: config.large_dataset_rows,
            cache: Vec::new(),
            capacity: config.cache_capacity.max(1),
        }
    }

    /// Tuner with a caller-supplied grid (smaller searches, tests)
    pub fn with_grid(grid: ParamGrid, folds: usize) -> Self {
        HyperTuner {
            grid,
            folds: folds.max(2),
            large_dataset_rows: 10_000,
            cache: Vec::new(),
            capacity: 64,
        }
    }

    /// Exhaustive cross-validated search; returns `base` with the grid
    /// dimensions replaced by the best-scoring values.
    pub fn optimize(
        &mut self,
        x: &Array2<f32>,
        y: &[f32],
        base: &BoostParams,
    ) -> Result<BoostParams> {
        let key = dataset_key(x, y, base);
        if let Some((_, cached)) = self.cache.iter().find(|(k, _)| *k == key) {
            log::info!("Using cached tuned parameters");
            return Ok(cached.clone());
        }

        let grid = if x.nrows() > self.large_dataset_rows {
            log::info!("Large dataset, trimming the parameter grid to endpoints");
            self.grid.trimmed()
        } else {
            self.grid.clone()
        };
        log::info!(
            "Grid search over {} combinations, {}-fold",
            grid.combinations(),
            self.folds
        );

        let mut best: Option<(f64, BoostParams)> = None;
        for &max_depth in &grid.max_depth {
            for &learning_rate in &grid.learning_rate {
                for &n_rounds in &grid.n_rounds {
                    for &subsample in &grid.subsample {
                        for &colsample in &grid.colsample {
                            for &min_child_weight in &grid.min_child_weight {
                                for &gamma in &grid.gamma {
                                    let candidate = BoostParams {
                                        max_depth,
                                        learning_rate,
                                        n_rounds,
                                        subsample,
                                        colsample,
                                        min_child_weight,
                                        gamma,
                                        ..base.clone()
                                    };
                                    let score =
                                        self.cross_val_score(x, y, &candidate)?;
                                    // Strict comparison: ties keep the first
                                    // candidate, so the search is deterministic
                                    if best.as_ref().map_or(true, |(s, _)| score > *s) {
                                        best = Some((score, candidate));
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        let tuned = match best {
            Some((score, params)) => {
                log::info!(
                    "Best parameters: depth={} lr={} rounds={} (cv score {:.4})",
                    params.max_depth,
                    params.learning_rate,
                    params.n_rounds,
                    score
                );
                params
            }
            None => base.clone(),
        };

        self.cache.push((key, tuned.clone()));
        if self.cache.len() > self.capacity {
            self.cache.remove(0);
        }
        Ok(tuned)
    }

    /// Mean k-fold score: accuracy for classifiers, negative MSE otherwise
    fn cross_val_score(
        &self,
        x: &Array2<f32>,
        y: &[f32],
        params: &BoostParams,
    ) -> Result<f64> {
        let n = x.nrows();
        let mut total = 0.0;
        let mut folds_run = 0;

        for fold in 0..self.folds {
            let val_rows: Vec<usize> = (0..n).filter(|i| i % self.folds == fold).collect();
            let train_rows: Vec<usize> = (0..n).filter(|i| i % self.folds != fold).collect();
            if val_rows.is_empty() || train_rows.is_empty() {
                continue;
            }

            let x_train = select_rows(x, &train_rows);
            let y_train = select_values(y, &train_rows);
            let x_val = select_rows(x, &val_rows);
            let y_val = select_values(y, &val_rows);

            let names: Vec<String> = (0..x.ncols()).map(|i| format!("f{}", i)).collect();
            let model = Booster::train(&x_train, &y_train, &names, params)?;
            let preds = model.predict(&x_val)?;

            let score = if params.objective.is_classification() {
                let correct = preds
                    .iter()
                    .zip(&y_val)
                    .filter(|(p, t)| p.round() == t.round())
                    .count();
                correct as f64 / y_val.len() as f64
            } else {
                let mse: f64 = preds
                    .iter()
                    .zip(&y_val)
                    .map(|(p, t)| ((p - t) as f64).powi(2))
                    .sum::<f64>()
                    / y_val.len() as f64;
                -mse
            };
            total += score;
            folds_run += 1;
        }

        if folds_run == 0 {
            return Ok(f64::NEG_INFINITY);
        }
        Ok(total / folds_run as f64)
    }
}

/// Content hash of the training data and objective
fn dataset_key(x: &Array2<f32>, y: &[f32], params: &BoostParams) -> u64 {
    let mut hash = Fnv1a::new();
    for value in x.iter() {
        hash.update(&value.to_bits().to_le_bytes());
    }
    for value in y {
        hash.update(&value.to_bits().to_le_bytes());
    }
    hash.update(params.objective.tag().as_bytes());
    hash.finish()
}
