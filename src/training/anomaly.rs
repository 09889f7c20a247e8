//! Anomaly screening via a constant-target regression proxy
//!
//! A regressor is fitted against an all-ones synthetic target on known-good
//! data; rows that later score well below the training-time score band are
//! flagged. There is no real anomaly signal in this scheme, only deviation
//! from self-referential "normality".

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::boosting::{BoostParams, Booster, Objective};
use crate::features::{FeatureEngineer, PreprocessMode};
use crate::store::{AnomalyMeta, AnomalyModel, ModelKind, ModelStore, StoredModel};
use crate::{ForgeError, MatchRecord, Result};

/// Score statistics from training an anomaly model
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnomalyTrainReport {
    pub mean: f32,
    pub std: f32,
    pub threshold: f32,
    pub min_score: f32,
    pub max_score: f32,
}

/// One flagged row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub row: usize,
    pub score: f32,
    /// How far below the training mean, in standard deviations
    pub deviation: f32,
}

/// Result of an anomaly scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub anomalies: Vec<AnomalyFlag>,
    pub scores: Vec<f32>,
    pub mean: f32,
    pub threshold_used: f32,
}

/// Trains and applies anomaly models
pub struct AnomalyDetector {
    store: Arc<ModelStore>,
    seed: u64,
}

impl AnomalyDetector {
    pub fn new(store: Arc<ModelStore>, seed: u64) -> Self {
        AnomalyDetector { store, seed }
    }

    /// Fit the normality proxy on known-good rows and persist it with the
    /// derived threshold (mean − 3σ over the training scores).
    pub fn train(&self, records: &[MatchRecord], name: &str) -> Result<AnomalyTrainReport> {
        log::info!("Training anomaly model '{}'", name);
        let prep = FeatureEngineer::preprocess(records, PreprocessMode::Training)?;
        let encoders = prep
            .encoders
            .ok_or_else(|| ForgeError::InvalidParameter("missing encoders".to_string()))?;

        let y = vec![1.0f32; prep.matrix.rows()];
        let params = BoostParams {
            objective: Objective::SquaredError,
            n_rounds: 100,
            learning_rate: 0.1,
            max_depth: 3,
            subsample: 1.0,
            colsample: 1.0,
            seed: self.seed,
            ..BoostParams::default()
        };
        let model = Booster::train(&prep.matrix.values, &y, &prep.matrix.columns, &params)?;

        let scores = model.predict(&prep.matrix.values)?;
        let n = scores.len() as f32;
        let mean = scores.sum() / n;
        let std = (scores.mapv(|s| (s - mean) * (s - mean)).sum() / n).sqrt();
        let threshold = mean - 3.0 * std;
        let min_score = scores.iter().cloned().fold(f32::INFINITY, f32::min);
        let max_score = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

        let meta = AnomalyMeta {
            mean,
            std,
            threshold,
        };
        self.store.put(
            name,
            StoredModel::Anomaly(AnomalyModel {
                model,
                meta,
                encoders,
            }),
        )?;

        Ok(AnomalyTrainReport {
            mean,
            std,
            threshold,
            min_score,
            max_score,
        })
    }

    /// Flag rows scoring below the threshold. `threshold = None` uses exactly
    /// the training-time threshold stored with the model.
    pub fn detect(
        &self,
        records: &[MatchRecord],
        threshold: Option<f32>,
        name: &str,
    ) -> Result<AnomalyReport> {
        let stored = self.store.get(name, ModelKind::Anomaly)?;
        let StoredModel::Anomaly(anomaly) = stored.as_ref() else {
            return Err(ForgeError::ModelNotFound(name.to_string()));
        };
        let threshold_used = threshold.unwrap_or(anomaly.meta.threshold);
        log::info!(
            "Anomaly scan with model '{}' (threshold {})",
            name,
            threshold_used
        );

        let prep =
            FeatureEngineer::preprocess(records, PreprocessMode::Prediction(&anomaly.encoders))?;
        let scores = anomaly.model.predict(&prep.matrix.values)?;

        let mut anomalies = Vec::new();
        for (row, &score) in scores.iter().enumerate() {
            if score < threshold_used {
                let deviation = if anomaly.meta.std > 0.0 {
                    (anomaly.meta.mean - score) / anomaly.meta.std
                } else {
                    0.0
                };
                anomalies.push(AnomalyFlag {
                    row,
                    score,
                    deviation,
                });
            }
        }

        Ok(AnomalyReport {
            anomalies,
            scores: scores.to_vec(),
            mean: anomaly.meta.mean,
            threshold_used,
        })
    }
}
