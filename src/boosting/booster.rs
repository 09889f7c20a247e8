//! The boosted-tree model: training loop, prediction, importance

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::boosting::params::{BoostParams, Objective};
use crate::boosting::tree::{RegressionTree, TreeParams};
use crate::{ForgeError, Result};

/// A trained gradient-boosted tree model.
///
/// Training is deterministic: identical data, params and seed produce an
/// identical model and identical predictions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booster {
    pub params: BoostParams,
    feature_names: Vec<String>,
    n_features: usize,
    /// Initial margin per output
    base_score: Vec<f32>,
    /// `rounds[r][k]` is the round-r tree for output k
    rounds: Vec<Vec<RegressionTree>>,
}

impl Booster {
    /// Train a model on a dense feature matrix.
    pub fn train(
        x: &Array2<f32>,
        y: &[f32],
        feature_names: &[String],
        params: &BoostParams,
    ) -> Result<Self> {
        params.validate()?;
        let n = x.nrows();
        if n == 0 {
            return Err(ForgeError::EmptyDataset);
        }
        if y.len() != n {
            return Err(ForgeError::InvalidParameter(format!(
                "target length {} does not match {} rows",
                y.len(),
                n
            )));
        }
        if feature_names.len() != x.ncols() {
            return Err(ForgeError::InvalidParameter(format!(
                "{} feature names for {} columns",
                feature_names.len(),
                x.ncols()
            )));
        }
        let outputs = params.objective.outputs();
        let labels = match params.objective {
            Objective::Softprob { classes } => {
                let labels: Vec<usize> = y.iter().map(|&v| v.round() as usize).collect();
                if let Some(&bad) = labels.iter().find(|&&l| l >= classes) {
                    return Err(ForgeError::InvalidParameter(format!(
                        "target class {} out of range for {} classes",
                        bad, classes
                    )));
                }
                labels
            }
            Objective::Poisson => {
                if y.iter().any(|&v| v < 0.0) {
                    return Err(ForgeError::InvalidParameter(
                        "poisson targets must be non-negative".to_string(),
                    ));
                }
                Vec::new()
            }
            Objective::SquaredError => Vec::new(),
        };

        let base_score = initial_margins(&params.objective, y);
        let mut margins = Array2::<f32>::zeros((n, outputs));
        for row in 0..n {
            for k in 0..outputs {
                margins[[row, k]] = base_score[k];
            }
        }

        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_child_weight: params.min_child_weight,
            gamma: params.gamma,
            lambda: params.lambda,
            learning_rate: params.learning_rate,
        };

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut rounds = Vec::with_capacity(params.n_rounds);

        for _round in 0..params.n_rounds {
            let rows = sample_indices(n, params.subsample, &mut rng);

            // For softprob, all class trees in a round share the same
            // round-start probabilities
            let probs = match params.objective {
                Objective::Softprob { .. } => Some(softmax_rows(&margins)),
                _ => None,
            };

            let mut round_trees = Vec::with_capacity(outputs);
            for k in 0..outputs {
                let mut grad = vec![0.0f32; n];
                let mut hess = vec![0.0f32; n];

                match params.objective {
                    Objective::SquaredError => {
                        for row in 0..n {
                            grad[row] = margins[[row, 0]] - y[row];
                            hess[row] = 1.0;
                        }
                    }
                    Objective::Poisson => {
                        for row in 0..n {
                            let mu = margins[[row, 0]].exp();
                            grad[row] = mu - y[row];
                            hess[row] = mu.max(1e-6);
                        }
                    }
                    Objective::Softprob { .. } => {
                        if let Some(probs) = probs.as_ref() {
                            for row in 0..n {
                                let p = probs[[row, k]];
                                let target = if labels[row] == k { 1.0 } else { 0.0 };
                                grad[row] = p - target;
                                hess[row] = (p * (1.0 - p)).max(1e-6);
                            }
                        }
                    }
                }

                let cols = sample_indices(x.ncols(), params.colsample, &mut rng);
                round_trees.push(RegressionTree::fit(
                    x,
                    &rows,
                    &cols,
                    &grad,
                    &hess,
                    &tree_params,
                ));
            }

            for (k, tree) in round_trees.iter().enumerate() {
                for row in 0..n {
                    margins[[row, k]] += tree.predict_row(x.row(row));
                }
            }
            rounds.push(round_trees);
        }

        Ok(Booster {
            params: params.clone(),
            feature_names: feature_names.to_vec(),
            n_features: x.ncols(),
            base_score,
            rounds,
        })
    }

    /// Raw margins per output, before the link function
    pub fn margins(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.n_features {
            return Err(ForgeError::InvalidParameter(format!(
                "model expects {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }
        let outputs = self.params.objective.outputs();
        let mut margins = Array2::<f32>::zeros((x.nrows(), outputs));
        for row in 0..x.nrows() {
            for k in 0..outputs {
                margins[[row, k]] = self.base_score[k];
            }
        }
        for round in &self.rounds {
            for (k, tree) in round.iter().enumerate() {
                for row in 0..x.nrows() {
                    margins[[row, k]] += tree.predict_row(x.row(row));
                }
            }
        }
        Ok(margins)
    }

    /// Predicted values: regression means, or the class index for softprob
    pub fn predict(&self, x: &Array2<f32>) -> Result<Array1<f32>> {
        let margins = self.margins(x)?;
        let out = match self.params.objective {
            Objective::SquaredError => margins.column(0).to_owned(),
            Objective::Poisson => margins.column(0).mapv(f32::exp),
            Objective::Softprob { .. } => {
                let probs = softmax_rows(&margins);
                Array1::from_iter((0..probs.nrows()).map(|row| argmax_row(&probs, row) as f32))
            }
        };
        Ok(out)
    }

    /// Class probabilities; classification models only
    pub fn predict_proba(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        if !self.params.objective.is_classification() {
            return Err(ForgeError::InvalidParameter(
                "predict_proba requires a classification objective".to_string(),
            ));
        }
        Ok(softmax_rows(&self.margins(x)?))
    }

    /// Accumulated split gain per feature name (non-zero entries only)
    pub fn gain_importance(&self) -> BTreeMap<String, f32> {
        let mut gains = vec![0.0f32; self.n_features];
        for round in &self.rounds {
            for tree in round {
                tree.accumulate_gain(&mut gains);
            }
        }
        self.feature_names
            .iter()
            .zip(gains)
            .filter(|(_, g)| *g > 0.0)
            .map(|(name, g)| (name.clone(), g))
            .collect()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

fn initial_margins(objective: &Objective, y: &[f32]) -> Vec<f32> {
    match objective {
        Objective::SquaredError => {
            let mean = y.iter().sum::<f32>() / y.len() as f32;
            vec![mean]
        }
        Objective::Poisson => {
            let mean = (y.iter().sum::<f32>() / y.len() as f32).max(1e-6);
            vec![mean.ln()]
        }
        Objective::Softprob { classes } => vec![0.0; *classes],
    }
}

/// Sampled indices, sorted; full range when fraction >= 1
fn sample_indices(n: usize, fraction: f32, rng: &mut StdRng) -> Vec<usize> {
    if fraction >= 1.0 {
        return (0..n).collect();
    }
    let count = (((n as f32) * fraction).round() as usize).clamp(1, n);
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    indices.truncate(count);
    indices.sort_unstable();
    indices
}

fn softmax_rows(margins: &Array2<f32>) -> Array2<f32> {
    let mut out = Array2::<f32>::zeros(margins.dim());
    for row in 0..margins.nrows() {
        let max = margins
            .row(row)
            .iter()
            .cloned()
            .fold(f32::NEG_INFINITY, f32::max);
        let mut total = 0.0f32;
        for col in 0..margins.ncols() {
            let e = (margins[[row, col]] - max).exp();
            out[[row, col]] = e;
            total += e;
        }
        for col in 0..margins.ncols() {
            out[[row, col]] /= total;
        }
    }
    out
}

fn argmax_row(probs: &Array2<f32>, row: usize) -> usize {
    let mut best = 0;
    for col in 1..probs.ncols() {
        if probs[[row, col]] > probs[[row, best]] {
            best = col;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{}", i)).collect()
    }

    fn regression_data() -> (Array2<f32>, Vec<f32>) {
        let rows = 40;
        let mut x = Array2::zeros((rows, 2));
        let mut y = Vec::with_capacity(rows);
        for i in 0..rows {
            let v = i as f32 / 2.0;
            x[[i, 0]] = v;
            x[[i, 1]] = (i % 3) as f32; // noise
            y.push(3.0 + 2.0 * v);
        }
        (x, y)
    }

    #[test]
    fn test_squared_error_fits_linear_trend() {
        let (x, y) = regression_data();
        let params = BoostParams {
            subsample: 1.0,
            colsample: 1.0,
            ..BoostParams::default()
        };
        let model = Booster::train(&x, &y, &names(2), &params).unwrap();
        let preds = model.predict(&x).unwrap();

        let mse: f32 = preds
            .iter()
            .zip(&y)
            .map(|(p, t)| (p - t) * (p - t))
            .sum::<f32>()
            / y.len() as f32;
        assert!(mse < 1.0, "mse too high: {}", mse);
    }

    #[test]
    fn test_training_is_deterministic_with_seed() {
        let (x, y) = regression_data();
        let params = BoostParams {
            subsample: 0.7,
            colsample: 0.5,
            seed: 7,
            ..BoostParams::default()
        };
        let a = Booster::train(&x, &y, &names(2), &params).unwrap();
        let b = Booster::train(&x, &y, &names(2), &params).unwrap();

        let pa = a.predict(&x).unwrap();
        let pb = b.predict(&x).unwrap();
        assert_eq!(pa, pb);

        // Repeated prediction from the same model has no drift either
        assert_eq!(a.predict(&x).unwrap(), pa);
    }

    #[test]
    fn test_poisson_recovers_group_means() {
        let rows = 60;
        let mut x = Array2::zeros((rows, 1));
        let mut y = Vec::with_capacity(rows);
        for i in 0..rows {
            let group = (i % 2) as f32;
            x[[i, 0]] = group;
            y.push(if group == 0.0 { 2.0 } else { 5.0 });
        }
        let params = BoostParams {
            objective: Objective::Poisson,
            subsample: 1.0,
            colsample: 1.0,
            ..BoostParams::default()
        };
        let model = Booster::train(&x, &y, &names(1), &params).unwrap();
        let preds = model.predict(&x).unwrap();

        assert!((preds[0] - 2.0).abs() < 0.3, "group 0: {}", preds[0]);
        assert!((preds[1] - 5.0).abs() < 0.3, "group 1: {}", preds[1]);
        assert!(preds.iter().all(|&p| p > 0.0));
    }

    #[test]
    fn test_softprob_separates_classes() {
        let rows = 45;
        let mut x = Array2::zeros((rows, 1));
        let mut y = Vec::with_capacity(rows);
        for i in 0..rows {
            let class = i % 3;
            x[[i, 0]] = class as f32 * 10.0;
            y.push(class as f32);
        }
        let params = BoostParams {
            objective: Objective::Softprob { classes: 3 },
            subsample: 1.0,
            colsample: 1.0,
            ..BoostParams::default()
        };
        let model = Booster::train(&x, &y, &names(1), &params).unwrap();

        let preds = model.predict(&x).unwrap();
        for (i, &p) in preds.iter().enumerate() {
            assert_eq!(p as usize, i % 3);
        }

        let probs = model.predict_proba(&x).unwrap();
        for row in 0..probs.nrows() {
            let total: f32 = probs.row(row).sum();
            assert!((total - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_predict_proba_rejected_for_regression() {
        let (x, y) = regression_data();
        let model = Booster::train(&x, &y, &names(2), &BoostParams::default()).unwrap();
        assert!(model.predict_proba(&x).is_err());
    }

    #[test]
    fn test_informative_feature_dominates_importance() {
        let (x, y) = regression_data();
        let params = BoostParams {
            subsample: 1.0,
            colsample: 1.0,
            ..BoostParams::default()
        };
        let model = Booster::train(&x, &y, &names(2), &params).unwrap();
        let importance = model.gain_importance();

        let signal = importance.get("f0").copied().unwrap_or(0.0);
        let noise = importance.get("f1").copied().unwrap_or(0.0);
        assert!(signal > noise);
    }

    #[test]
    fn test_feature_count_mismatch_rejected() {
        let (x, y) = regression_data();
        let model = Booster::train(&x, &y, &names(2), &BoostParams::default()).unwrap();
        let narrow = Array2::<f32>::zeros((3, 1));
        assert!(model.predict(&narrow).is_err());
    }
}
