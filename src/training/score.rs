//! Exact-score prediction with twin Poisson regressors

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::boosting::Objective;
use crate::features::{FeatureEngineer, PreprocessMode};
use crate::store::{ModelKind, ModelStore, ScoreModel, StoredModel};
use crate::training::trainer::CoreTrainer;
use crate::training::tuner::HyperTuner;
use crate::training::{select_rows, select_values, split_indices};
use crate::{ForgeError, MatchOutcome, MatchRecord, Result, TrainingConfig};

/// Held-out evaluation of a score model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreTrainReport {
    /// Fraction of held-out rows where both rounded scores are exact
    pub exact_accuracy: f64,
    /// Fraction where the win/draw/loss outcome is right
    pub result_accuracy: f64,
    pub home_mae: f64,
    pub away_mae: f64,
    pub test_rows: usize,
    pub most_common_scores: Vec<(String, u32)>,
}

/// A predicted score line with its local probability cloud
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorePrediction {
    pub home_score: u32,
    pub away_score: u32,
    pub predicted_score: String,
    pub outcome: MatchOutcome,
    pub raw_home_score: f32,
    pub raw_away_score: f32,
    /// Probabilities over neighbouring score lines; always sums to 1
    pub score_probabilities: BTreeMap<String, f64>,
    /// Empirical frequencies from the training data, when available
    pub historical_probabilities: BTreeMap<String, f64>,
}

/// Trains and serves exact-score models
pub struct ScorePredictor {
    store: Arc<ModelStore>,
    config: TrainingConfig,
}

impl ScorePredictor {
    pub fn new(store: Arc<ModelStore>, config: &TrainingConfig) -> Self {
        ScorePredictor {
            store,
            config: config.clone(),
        }
    }

    /// Fit independent home/away Poisson regressors, evaluate them on a
    /// held-out split, and persist them with the empirical score table.
    pub fn train(
        &self,
        records: &[MatchRecord],
        name: &str,
        mut tuner: Option<&mut HyperTuner>,
    ) -> Result<ScoreTrainReport> {
        log::info!("Training score model '{}'", name);
        for record in records {
            if record.home_score.is_none() {
                return Err(ForgeError::MissingField("home_score"));
            }
            if record.away_score.is_none() {
                return Err(ForgeError::MissingField("away_score"));
            }
        }

        let prep = FeatureEngineer::preprocess(records, PreprocessMode::Training)?;
        let encoders = prep
            .encoders
            .ok_or_else(|| ForgeError::InvalidParameter("missing encoders".to_string()))?;

        let y_home: Vec<f32> = records
            .iter()
            .map(|r| r.home_score.unwrap_or(0) as f32)
            .collect();
        let y_away: Vec<f32> = records
            .iter()
            .map(|r| r.away_score.unwrap_or(0) as f32)
            .collect();

        let (train_rows, test_rows) =
            split_indices(records.len(), self.config.test_size, self.config.seed);
        let x_train = select_rows(&prep.matrix.values, &train_rows);
        let trainer = CoreTrainer::new(&self.config);
        let params = trainer.params_for(Objective::Poisson);

        let (home_model, _) = trainer.train(
            &x_train,
            &select_values(&y_home, &train_rows),
            &prep.matrix.columns,
            params.clone(),
            tuner.as_deref_mut(),
        )?;
        let (away_model, _) = trainer.train(
            &x_train,
            &select_values(&y_away, &train_rows),
            &prep.matrix.columns,
            params,
            tuner.as_deref_mut(),
        )?;

        // Evaluate on the held-out rows; fall back to the training rows for
        // datasets too small to split
        let eval_rows = if test_rows.is_empty() {
            log::warn!("Dataset too small for a held-out split, evaluating on training rows");
            &train_rows
        } else {
            &test_rows
        };
        let x_eval = select_rows(&prep.matrix.values, eval_rows);
        let home_pred = home_model.predict(&x_eval)?;
        let away_pred = away_model.predict(&x_eval)?;

        let mut exact = 0usize;
        let mut outcome_right = 0usize;
        let mut home_abs_err = 0.0f64;
        let mut away_abs_err = 0.0f64;
        for (i, &row) in eval_rows.iter().enumerate() {
            let truth_home = y_home[row] as u32;
            let truth_away = y_away[row] as u32;
            let pred_home = round_score(home_pred[i]);
            let pred_away = round_score(away_pred[i]);

            if pred_home == truth_home && pred_away == truth_away {
                exact += 1;
            }
            if MatchOutcome::from_scores(pred_home, pred_away)
                == MatchOutcome::from_scores(truth_home, truth_away)
            {
                outcome_right += 1;
            }
            home_abs_err += (pred_home as f64 - truth_home as f64).abs();
            away_abs_err += (pred_away as f64 - truth_away as f64).abs();
        }
        let eval_n = eval_rows.len() as f64;

        // Empirical score table over the full dataset, 0-9 x 0-9
        let mut distribution = BTreeMap::new();
        for record in records {
            let (Some(h), Some(a)) = (record.home_score, record.away_score) else {
                continue;
            };
            if h < 10 && a < 10 {
                *distribution.entry(format!("{}-{}", h, a)).or_insert(0u32) += 1;
            }
        }
        let mut most_common: Vec<(String, u32)> = distribution
            .iter()
            .map(|(k, &v)| (k.clone(), v))
            .collect();
        most_common.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        most_common.truncate(5);

        self.store.put(
            name,
            StoredModel::Score(ScoreModel {
                home: home_model,
                away: away_model,
                encoders,
                distribution,
            }),
        )?;

        let report = ScoreTrainReport {
            exact_accuracy: exact as f64 / eval_n,
            result_accuracy: outcome_right as f64 / eval_n,
            home_mae: home_abs_err / eval_n,
            away_mae: away_abs_err / eval_n,
            test_rows: eval_rows.len(),
            most_common_scores: most_common,
        };
        log::info!(
            "Score model '{}': exact {:.1}%, outcome {:.1}%",
            name,
            report.exact_accuracy * 100.0,
            report.result_accuracy * 100.0
        );
        Ok(report)
    }

    /// Predict score lines for the given matches
    pub fn predict(&self, records: &[MatchRecord], name: &str) -> Result<Vec<ScorePrediction>> {
        let stored = self.store.get(name, ModelKind::Score)?;
        let StoredModel::Score(score_model) = stored.as_ref() else {
            return Err(ForgeError::ModelNotFound(name.to_string()));
        };

        let prep = FeatureEngineer::preprocess(
            records,
            PreprocessMode::Prediction(&score_model.encoders),
        )?;
        let raw_home = score_model.home.predict(&prep.matrix.values)?;
        let raw_away = score_model.away.predict(&prep.matrix.values)?;

        let total_matches: u32 = score_model.distribution.values().sum();
        let historical: BTreeMap<String, f64> = if total_matches > 0 {
            score_model
                .distribution
                .iter()
                .map(|(k, &v)| (k.clone(), v as f64 / total_matches as f64))
                .collect()
        } else {
            BTreeMap::new()
        };

        let mut predictions = Vec::with_capacity(records.len());
        for i in 0..records.len() {
            let home_score = round_score(raw_home[i]);
            let away_score = round_score(raw_away[i]);

            predictions.push(ScorePrediction {
                home_score,
                away_score,
                predicted_score: format!("{}-{}", home_score, away_score),
                outcome: MatchOutcome::from_scores(home_score, away_score),
                raw_home_score: raw_home[i],
                raw_away_score: raw_away[i],
                score_probabilities: score_cloud(
                    home_score,
                    away_score,
                    raw_home[i],
                    raw_away[i],
                ),
                historical_probabilities: historical.clone(),
            });
        }
        Ok(predictions)
    }
}

fn round_score(raw: f32) -> u32 {
    raw.round().max(0.0) as u32
}

/// Probabilities over the scores neighbouring the prediction, from an
/// exp(−distance) kernel around the raw regressor outputs. Normalized, so the
/// values always sum to 1.
fn score_cloud(
    home_score: u32,
    away_score: u32,
    raw_home: f32,
    raw_away: f32,
) -> BTreeMap<String, f64> {
    let mut cloud = BTreeMap::new();
    let mut total = 0.0f64;

    for h in home_score.saturating_sub(2)..=home_score + 2 {
        for a in away_score.saturating_sub(2)..=away_score + 2 {
            let distance = (((h as f32 - raw_home).powi(2) + (a as f32 - raw_away).powi(2))
                as f64)
                .sqrt();
            let probability = (-distance).exp();
            cloud.insert(format!("{}-{}", h, a), probability);
            total += probability;
        }
    }
    for value in cloud.values_mut() {
        *value /= total;
    }
    cloud
}
