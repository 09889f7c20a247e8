//! Diversified model ensembles with persisted feature subsets

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::boosting::{BoostParams, Booster, Objective};
use crate::features::{EncoderSet, FeatureMatrix};
use crate::store::{EnsembleMember, EnsembleModel, ModelKind, ModelStore, StoredModel};
use crate::training::metrics::{evaluate_classification, EvalReport};
use crate::{ForgeError, Result};

/// How ensemble members are diversified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Diversity {
    /// Vary hyperparameters per member
    Params,
    /// Train each member on a random ~70% feature subset
    Features,
    /// Both of the above
    Both,
}

impl FromStr for Diversity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "params" => Ok(Diversity::Params),
            "features" => Ok(Diversity::Features),
            "both" => Ok(Diversity::Both),
            _ => Err(format!(
                "Unknown diversity method: {}. Use params, features, or both.",
                s
            )),
        }
    }
}

impl std::fmt::Display for Diversity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diversity::Params => write!(f, "params"),
            Diversity::Features => write!(f, "features"),
            Diversity::Both => write!(f, "both"),
        }
    }
}

/// Ensemble output: per-row class, averaged probabilities, and confidence
#[derive(Debug, Clone)]
pub struct EnsemblePrediction {
    pub predictions: Vec<usize>,
    pub probabilities: Array2<f32>,
    pub confidence: Vec<f32>,
}

/// Builds, persists and serves model ensembles.
pub struct EnsembleManager {
    store: Arc<ModelStore>,
    base_seed: u64,
}

impl EnsembleManager {
    pub fn new(store: Arc<ModelStore>, base_seed: u64) -> Self {
        EnsembleManager { store, base_seed }
    }

    /// Train `count` diversified members and persist them under `name`.
    /// Returns the number of members trained.
    pub fn create(
        &self,
        matrix: &FeatureMatrix,
        targets: &[usize],
        encoders: EncoderSet,
        name: &str,
        count: usize,
        diversity: Diversity,
    ) -> Result<usize> {
        if count == 0 {
            return Err(ForgeError::InvalidParameter(
                "ensemble needs at least one model".to_string(),
            ));
        }
        log::info!(
            "Creating ensemble '{}': {} members, diversity={}",
            name,
            count,
            diversity
        );

        let classes = targets.iter().copied().max().unwrap_or(0) + 1;
        let objective = Objective::Softprob {
            classes: classes.max(2),
        };
        let y: Vec<f32> = targets.iter().map(|&t| t as f32).collect();

        let mut members = Vec::with_capacity(count);
        for i in 0..count {
            let params = if matches!(diversity, Diversity::Params | Diversity::Both) {
                BoostParams {
                    objective,
                    learning_rate: 0.1 + i as f32 * 0.02,
                    max_depth: 5 + (i % 3),
                    subsample: (0.7 + i as f32 * 0.05).min(1.0),
                    colsample: (0.7 + (count - i) as f32 * 0.05).min(1.0),
                    seed: self.base_seed + i as u64,
                    ..BoostParams::default()
                }
            } else {
                BoostParams {
                    objective,
                    seed: self.base_seed + i as u64,
                    ..BoostParams::default()
                }
            };

            let feature_subset = if matches!(diversity, Diversity::Features | Diversity::Both) {
                Some(feature_subset(
                    matrix.cols(),
                    self.base_seed + i as u64,
                ))
            } else {
                None
            };

            let model = match &feature_subset {
                Some(subset) => {
                    let sliced = matrix.select(subset);
                    Booster::train(&sliced.values, &y, &sliced.columns, &params)?
                }
                None => Booster::train(&matrix.values, &y, &matrix.columns, &params)?,
            };

            members.push(EnsembleMember {
                model,
                feature_subset,
            });
        }

        let trained = members.len();
        self.store
            .put(name, StoredModel::Ensemble(EnsembleModel { members, encoders }))?;
        Ok(trained)
    }

    /// Predict with a persisted ensemble. `weighted` applies the fixed
    /// linear scheme that favors later members (w_i = 1 + i/n, normalized).
    pub fn predict(
        &self,
        matrix: &FeatureMatrix,
        name: &str,
        weighted: bool,
    ) -> Result<EnsemblePrediction> {
        let stored = self.store.get(name, ModelKind::Ensemble)?;
        let StoredModel::Ensemble(ensemble) = stored.as_ref() else {
            return Err(ForgeError::ModelNotFound(name.to_string()));
        };
        if ensemble.members.is_empty() {
            return Err(ForgeError::InvalidParameter(format!(
                "ensemble '{}' has no members",
                name
            )));
        }

        let n = ensemble.members.len();
        let weights: Vec<f32> = if weighted {
            let raw: Vec<f32> = (0..n).map(|i| 1.0 + i as f32 / n as f32).collect();
            let total: f32 = raw.iter().sum();
            raw.into_iter().map(|w| w / total).collect()
        } else {
            vec![1.0 / n as f32; n]
        };

        let mut average: Option<Array2<f32>> = None;
        for (member, &weight) in ensemble.members.iter().zip(&weights) {
            let probs = match &member.feature_subset {
                Some(subset) => member.model.predict_proba(&matrix.select(subset).values)?,
                None => member.model.predict_proba(&matrix.values)?,
            };
            let weighted_probs = probs * weight;
            average = Some(match average {
                Some(sum) => sum + &weighted_probs,
                None => weighted_probs,
            });
        }
        let average = average.unwrap_or_default();

        let mut predictions = Vec::with_capacity(average.nrows());
        let mut confidence = Vec::with_capacity(average.nrows());
        for row in 0..average.nrows() {
            let mut best = 0;
            for col in 1..average.ncols() {
                if average[[row, col]] > average[[row, best]] {
                    best = col;
                }
            }
            predictions.push(best);
            confidence.push(average[[row, best]]);
        }

        Ok(EnsemblePrediction {
            predictions,
            probabilities: average,
            confidence,
        })
    }

    /// Evaluate a persisted ensemble against known targets
    pub fn evaluate(
        &self,
        matrix: &FeatureMatrix,
        targets: &[usize],
        name: &str,
    ) -> Result<EvalReport> {
        let prediction = self.predict(matrix, name, false)?;
        let classes = prediction.probabilities.ncols();
        Ok(evaluate_classification(
            targets,
            &prediction.predictions,
            Some(&prediction.probabilities),
            classes,
        ))
    }
}

/// Seeded random ~70% column subset, sorted
fn feature_subset(n_cols: usize, seed: u64) -> Vec<usize> {
    let count = ((n_cols as f32 * 0.7) as usize).max(1);
    let mut indices: Vec<usize> = (0..n_cols).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    indices.truncate(count);
    indices.sort_unstable();
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn demo_matrix() -> (FeatureMatrix, Vec<usize>) {
        let rows = 30;
        let mut values = Array2::zeros((rows, 4));
        let mut targets = Vec::with_capacity(rows);
        for i in 0..rows {
            let class = i % 3;
            values[[i, 0]] = class as f32 * 3.0;
            values[[i, 1]] = class as f32 * 2.0 + 1.0;
            values[[i, 2]] = (i % 5) as f32;
            values[[i, 3]] = (i % 7) as f32;
            targets.push(class);
        }
        let matrix = FeatureMatrix {
            columns: vec![
                "a".to_string(),
                "b".to_string(),
                "c".to_string(),
                "d".to_string(),
            ],
            values,
        };
        (matrix, targets)
    }

    fn manager() -> (EnsembleManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ModelStore::open(dir.path()).unwrap());
        (EnsembleManager::new(store, 42), dir)
    }

    #[test]
    fn test_create_and_predict() {
        let (manager, _dir) = manager();
        let (matrix, targets) = demo_matrix();

        let trained = manager
            .create(&matrix, &targets, EncoderSet::default(), "demo", 3, Diversity::Params)
            .unwrap();
        assert_eq!(trained, 3);

        let prediction = manager.predict(&matrix, "demo", false).unwrap();
        assert_eq!(prediction.predictions.len(), matrix.rows());
        for row in 0..prediction.probabilities.nrows() {
            let total: f32 = prediction.probabilities.row(row).sum();
            assert!((total - 1.0).abs() < 1e-4);
        }
        for (row, (&c, &p)) in prediction
            .confidence
            .iter()
            .zip(&prediction.predictions)
            .enumerate()
        {
            assert_eq!(c, prediction.probabilities[[row, p]]);
            assert!(c > 0.0 && c <= 1.0);
        }
    }

    #[test]
    fn test_feature_subsets_are_replayed() {
        let (manager, _dir) = manager();
        let (matrix, targets) = demo_matrix();

        manager
            .create(&matrix, &targets, EncoderSet::default(), "subset", 3, Diversity::Features)
            .unwrap();

        let stored = manager.store.get("subset", ModelKind::Ensemble).unwrap();
        let StoredModel::Ensemble(ensemble) = stored.as_ref() else {
            panic!("expected an ensemble")
        };
        for member in &ensemble.members {
            let subset = member.feature_subset.as_ref().unwrap();
            // 70% of 4 columns
            assert_eq!(subset.len(), 2);
            assert_eq!(member.model.n_features(), 2);
        }

        // Prediction slices the stored subsets; full-width input still works
        let prediction = manager.predict(&matrix, "subset", false).unwrap();
        assert_eq!(prediction.predictions.len(), matrix.rows());
    }

    #[test]
    fn test_weighted_prediction_differs_from_uniform() {
        let (manager, _dir) = manager();
        let (matrix, targets) = demo_matrix();
        manager
            .create(&matrix, &targets, EncoderSet::default(), "w", 4, Diversity::Params)
            .unwrap();

        let uniform = manager.predict(&matrix, "w", false).unwrap();
        let weighted = manager.predict(&matrix, "w", true).unwrap();

        // Same shape, probabilities still normalized
        assert_eq!(
            uniform.probabilities.dim(),
            weighted.probabilities.dim()
        );
        for row in 0..weighted.probabilities.nrows() {
            let total: f32 = weighted.probabilities.row(row).sum();
            assert!((total - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_evaluate_on_separable_data() {
        let (manager, _dir) = manager();
        let (matrix, targets) = demo_matrix();
        manager
            .create(&matrix, &targets, EncoderSet::default(), "eval", 3, Diversity::Both)
            .unwrap();

        let report = manager.evaluate(&matrix, &targets, "eval").unwrap();
        assert!(report.accuracy > 0.9, "accuracy: {}", report.accuracy);
        assert!(report.log_loss > 0.0);
    }

    #[test]
    fn test_unknown_ensemble_is_model_not_found() {
        let (manager, _dir) = manager();
        let (matrix, _) = demo_matrix();
        let err = manager.predict(&matrix, "missing", false).unwrap_err();
        assert!(matches!(err, ForgeError::ModelNotFound(_)));
    }
}
