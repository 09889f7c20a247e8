//! Top-level façade wiring feature engineering, training and persistence

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::boosting::{BoostParams, Objective};
use crate::features::{FeatureEngineer, PreprocessMode};
use crate::store::{ModelKind, ModelStore, ResultModel, StoredModel};
use crate::training::anomaly::{AnomalyDetector, AnomalyReport, AnomalyTrainReport};
use crate::training::ensemble::{Diversity, EnsembleManager, EnsemblePrediction};
use crate::training::metrics::{evaluate_classification, EvalReport, MetricsHistory};
use crate::training::score::{ScorePrediction, ScorePredictor, ScoreTrainReport};
use crate::training::trainer::CoreTrainer;
use crate::training::tuner::HyperTuner;
use crate::training::{select_rows, select_values, split_indices};
use crate::{Config, ForgeError, MatchOutcome, MatchRecord, Result};

pub const DEFAULT_RESULT_MODEL: &str = "match_result_model";
pub const DEFAULT_SCORE_MODEL: &str = "score_prediction_model";
pub const DEFAULT_ANOMALY_MODEL: &str = "anomaly_model";

/// Receiver for completion events; the integration seam with the host
/// application's messaging layer.
pub trait EventSink {
    fn emit(&self, event: &str, payload: Value);
}

/// Outcome of training a result model
#[derive(Debug, Clone, Serialize)]
pub struct TrainReport {
    pub metrics: EvalReport,
    pub params: BoostParams,
    pub feature_importance: BTreeMap<String, f32>,
}

/// Result-model prediction for one match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPrediction {
    pub probabilities: BTreeMap<MatchOutcome, f32>,
    pub predicted: MatchOutcome,
    pub confidence: f32,
}

/// The prediction toolkit: trains, persists and serves every model kind.
///
/// `open` loads persisted models before returning, so a constructed `Forge`
/// is always ready; no operation can observe a partially initialized state.
pub struct Forge {
    config: Config,
    store: Arc<ModelStore>,
    trainer: CoreTrainer,
    tuner: Mutex<HyperTuner>,
    ensembles: EnsembleManager,
    scores: ScorePredictor,
    anomalies: AnomalyDetector,
    metrics: RwLock<MetricsHistory>,
    importance: RwLock<HashMap<String, BTreeMap<String, f32>>>,
}

impl Forge {
    /// Open the toolkit: create the store and load every persisted model
    pub fn open(config: Config) -> Result<Self> {
        let store = Arc::new(ModelStore::open(&config.data.data_path)?);
        let loaded = store.load_all();
        log::info!("Forge ready ({} models loaded)", loaded);

        let seed = config.training.seed;
        Ok(Forge {
            trainer: CoreTrainer::new(&config.training),
            tuner: Mutex::new(HyperTuner::new(&config.tuning)),
            ensembles: EnsembleManager::new(Arc::clone(&store), seed),
            scores: ScorePredictor::new(Arc::clone(&store), &config.training),
            anomalies: AnomalyDetector::new(Arc::clone(&store), seed),
            metrics: RwLock::new(MetricsHistory::default()),
            importance: RwLock::new(HashMap::new()),
            store,
            config,
        })
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    /// Train the win/draw/loss classifier and persist it under `name`.
    pub fn train_match_result_model(
        &self,
        records: &[MatchRecord],
        name: &str,
    ) -> Result<TrainReport> {
        log::info!("Training result model '{}'", name);
        let prep = FeatureEngineer::preprocess(records, PreprocessMode::Training)?;
        let targets = prep
            .targets
            .ok_or(ForgeError::MissingField("result"))?;
        let encoders = prep
            .encoders
            .ok_or_else(|| ForgeError::InvalidParameter("missing encoders".to_string()))?;

        let (train_rows, test_rows) =
            split_indices(records.len(), self.config.training.test_size, self.config.training.seed);
        let y: Vec<f32> = targets.iter().map(|&t| t as f32).collect();

        let params = self.trainer.params_for(Objective::Softprob {
            classes: MatchOutcome::COUNT,
        });
        let mut tuner_guard = if self.config.tuning.enabled {
            Some(self.tuner.lock().unwrap_or_else(PoisonError::into_inner))
        } else {
            None
        };
        let (model, used_params) = self.trainer.train(
            &select_rows(&prep.matrix.values, &train_rows),
            &select_values(&y, &train_rows),
            &prep.matrix.columns,
            params,
            tuner_guard.as_deref_mut(),
        )?;
        drop(tuner_guard);

        let eval_rows = if test_rows.is_empty() {
            log::warn!("Dataset too small for a held-out split, evaluating on training rows");
            &train_rows
        } else {
            &test_rows
        };
        let x_eval = select_rows(&prep.matrix.values, eval_rows);
        let probabilities = model.predict_proba(&x_eval)?;
        let predicted: Vec<usize> = (0..probabilities.nrows())
            .map(|row| {
                let mut best = 0;
                for col in 1..probabilities.ncols() {
                    if probabilities[[row, col]] > probabilities[[row, best]] {
                        best = col;
                    }
                }
                best
            })
            .collect();
        let truth = select_values(&targets, eval_rows);
        let metrics = evaluate_classification(
            &truth,
            &predicted,
            Some(&probabilities),
            MatchOutcome::COUNT,
        );
        log::info!("Result model '{}': {}", name, metrics);

        let feature_importance = model.gain_importance();
        self.store
            .put(name, StoredModel::Result(ResultModel { model, encoders }))?;

        self.metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .record(&metrics);
        self.importance
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), feature_importance.clone());

        Ok(TrainReport {
            metrics,
            params: used_params,
            feature_importance,
        })
    }

    /// Predict win/draw/loss probabilities for the given matches
    pub fn predict_match_result(
        &self,
        records: &[MatchRecord],
        name: &str,
    ) -> Result<Vec<ResultPrediction>> {
        let stored = self.store.get(name, ModelKind::Result)?;
        let StoredModel::Result(result_model) = stored.as_ref() else {
            return Err(ForgeError::ModelNotFound(name.to_string()));
        };

        let prep = FeatureEngineer::preprocess(
            records,
            PreprocessMode::Prediction(&result_model.encoders),
        )?;
        let probabilities = result_model.model.predict_proba(&prep.matrix.values)?;

        let mut predictions = Vec::with_capacity(records.len());
        for row in 0..probabilities.nrows() {
            let mut by_outcome = BTreeMap::new();
            let mut best = 0;
            for col in 0..probabilities.ncols() {
                if let Some(outcome) = MatchOutcome::from_class_index(col) {
                    by_outcome.insert(outcome, probabilities[[row, col]]);
                }
                if probabilities[[row, col]] > probabilities[[row, best]] {
                    best = col;
                }
            }
            let predicted = MatchOutcome::from_class_index(best)
                .unwrap_or(MatchOutcome::Draw);
            predictions.push(ResultPrediction {
                probabilities: by_outcome,
                predicted,
                confidence: probabilities[[row, best]],
            });
        }
        Ok(predictions)
    }

    /// Train the exact-score model
    pub fn train_score_model(
        &self,
        records: &[MatchRecord],
        name: &str,
    ) -> Result<ScoreTrainReport> {
        let mut tuner_guard = if self.config.tuning.enabled {
            Some(self.tuner.lock().unwrap_or_else(PoisonError::into_inner))
        } else {
            None
        };
        self.scores.train(records, name, tuner_guard.as_deref_mut())
    }

    /// Predict exact scores for the given matches
    pub fn predict_match_score(
        &self,
        records: &[MatchRecord],
        name: &str,
    ) -> Result<Vec<ScorePrediction>> {
        self.scores.predict(records, name)
    }

    /// Train the anomaly screen on known-good data
    pub fn train_anomaly_model(
        &self,
        records: &[MatchRecord],
        name: &str,
    ) -> Result<AnomalyTrainReport> {
        self.anomalies.train(records, name)
    }

    /// Scan matches for anomalies; `threshold = None` uses the stored one
    pub fn detect_anomalies(
        &self,
        records: &[MatchRecord],
        threshold: Option<f32>,
        name: &str,
    ) -> Result<AnomalyReport> {
        self.anomalies.detect(records, threshold, name)
    }

    /// Train a diversified ensemble; returns the number of members
    pub fn create_ensemble(
        &self,
        records: &[MatchRecord],
        name: &str,
        count: usize,
        diversity: Diversity,
    ) -> Result<usize> {
        let prep = FeatureEngineer::preprocess(records, PreprocessMode::Training)?;
        let targets = prep.targets.ok_or(ForgeError::MissingField("result"))?;
        let encoders = prep
            .encoders
            .ok_or_else(|| ForgeError::InvalidParameter("missing encoders".to_string()))?;
        self.ensembles
            .create(&prep.matrix, &targets, encoders, name, count, diversity)
    }

    /// Predict with a persisted ensemble
    pub fn predict_with_ensemble(
        &self,
        records: &[MatchRecord],
        name: &str,
        weighted: bool,
    ) -> Result<EnsemblePrediction> {
        let stored = self.store.get(name, ModelKind::Ensemble)?;
        let prep = FeatureEngineer::preprocess(
            records,
            PreprocessMode::Prediction(stored.encoders()),
        )?;
        self.ensembles.predict(&prep.matrix, name, weighted)
    }

    /// Evaluate a persisted ensemble on labelled matches
    pub fn evaluate_ensemble(&self, records: &[MatchRecord], name: &str) -> Result<EvalReport> {
        let stored = self.store.get(name, ModelKind::Ensemble)?;
        let prep = FeatureEngineer::preprocess(
            records,
            PreprocessMode::Prediction(stored.encoders()),
        )?;
        let targets: Vec<usize> = records
            .iter()
            .map(|r| {
                r.outcome()
                    .map(|o| o.class_index())
                    .ok_or(ForgeError::MissingField("result"))
            })
            .collect::<Result<_>>()?;
        self.ensembles.evaluate(&prep.matrix, &targets, name)
    }

    /// Metric series across every result-model training this session
    pub fn model_metrics(&self) -> MetricsHistory {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Gain importance for one model, or for all trained models
    pub fn feature_importance(
        &self,
        name: Option<&str>,
    ) -> HashMap<String, BTreeMap<String, f32>> {
        let importance = self.importance.read().unwrap_or_else(PoisonError::into_inner);
        match name {
            Some(name) => importance
                .get(name)
                .map(|imp| HashMap::from([(name.to_string(), imp.clone())]))
                .unwrap_or_default(),
            None => importance.clone(),
        }
    }

    /// Formatted overview of the registered models
    pub fn model_summary(&self) -> String {
        let mut summary = vec!["=== Forge model summary ===".to_string()];

        for (name, kind) in self.store.list() {
            summary.push(format!("\nModel: {} ({})", name, kind.label()));

            if kind == ModelKind::Result {
                if let Some(latest) = self
                    .metrics
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .latest()
                {
                    summary.push(format!("  Last evaluation: {}", latest));
                }
                let importance = self.importance.read().unwrap_or_else(PoisonError::into_inner);
                if let Some(features) = importance.get(&name) {
                    let mut ranked: Vec<(&String, &f32)> = features.iter().collect();
                    ranked.sort_by(|a, b| {
                        b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal)
                    });
                    summary.push("  Top features:".to_string());
                    for (feature, gain) in ranked.into_iter().take(5) {
                        summary.push(format!("    {}: {:.4}", feature, gain));
                    }
                }
            }
        }
        summary.join("\n")
    }

    /// Dispatch a named request event, emitting the matching completion
    /// event through `sink`.
    ///
    /// Supported events: `match_prediction_request`, `model_training_request`
    /// and `anomaly_detection_request`.
    pub fn handle_event(&self, event: &str, payload: Value, sink: &dyn EventSink) -> Result<()> {
        match event {
            "match_prediction_request" => self.handle_prediction_request(payload, sink),
            "model_training_request" => self.handle_training_request(payload, sink),
            "anomaly_detection_request" => self.handle_anomaly_request(payload, sink),
            other => Err(ForgeError::UnknownEvent(other.to_string())),
        }
    }

    fn handle_prediction_request(&self, payload: Value, sink: &dyn EventSink) -> Result<()> {
        let records = parse_match_data(&payload)?;
        let model_name = payload
            .get("model_name")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_RESULT_MODEL)
            .to_string();

        let predictions = self.predict_match_result(&records, &model_name)?;
        let mut completion = json!({
            "match_id": payload.get("match_id").cloned().unwrap_or(Value::Null),
            "prediction": predictions,
            "model_used": model_name,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        if payload
            .get("predict_score")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            let score_model = payload
                .get("score_model_name")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_SCORE_MODEL);
            let scores = self.predict_match_score(&records, score_model)?;
            completion["score_prediction"] = serde_json::to_value(scores)?;
        }

        sink.emit("match_prediction_complete", completion);
        Ok(())
    }

    fn handle_training_request(&self, payload: Value, sink: &dyn EventSink) -> Result<()> {
        let records: Vec<MatchRecord> = payload
            .get("training_data")
            .cloned()
            .ok_or_else(|| ForgeError::BadPayload("missing training_data".to_string()))
            .and_then(|v| serde_json::from_value(v).map_err(ForgeError::from))?;

        let model_type = payload
            .get("model_type")
            .and_then(Value::as_str)
            .unwrap_or("match_result")
            .to_string();
        let default_name = format!("{}_model", model_type);
        let model_name = payload
            .get("model_name")
            .and_then(Value::as_str)
            .unwrap_or(&default_name)
            .to_string();

        let results = match model_type.as_str() {
            "match_result" => {
                serde_json::to_value(self.train_match_result_model(&records, &model_name)?)?
            }
            "score_prediction" => {
                serde_json::to_value(self.train_score_model(&records, &model_name)?)?
            }
            other => {
                return Err(ForgeError::BadPayload(format!(
                    "unsupported model_type: {}",
                    other
                )))
            }
        };

        sink.emit(
            "model_training_complete",
            json!({
                "model_name": model_name,
                "model_type": model_type,
                "results": results,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        );
        Ok(())
    }

    fn handle_anomaly_request(&self, payload: Value, sink: &dyn EventSink) -> Result<()> {
        let records = parse_match_data(&payload)?;
        let threshold = payload
            .get("threshold")
            .and_then(Value::as_f64)
            .map(|t| t as f32);
        let model_name = payload
            .get("model_name")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_ANOMALY_MODEL)
            .to_string();

        let report = self.detect_anomalies(&records, threshold, &model_name)?;
        sink.emit(
            "anomaly_detection_complete",
            json!({
                "match_id": payload.get("match_id").cloned().unwrap_or(Value::Null),
                "anomalies": report,
                "model_used": model_name,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        );
        Ok(())
    }
}

/// `match_data` may be a single match object or an array of them
fn parse_match_data(payload: &Value) -> Result<Vec<MatchRecord>> {
    let data = payload
        .get("match_data")
        .ok_or_else(|| ForgeError::BadPayload("missing match_data".to_string()))?;
    match data {
        Value::Array(_) => Ok(serde_json::from_value(data.clone())?),
        Value::Object(_) => Ok(vec![serde_json::from_value(data.clone())?]),
        _ => Err(ForgeError::BadPayload(
            "match_data must be an object or array".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn league_records(n: usize) -> Vec<MatchRecord> {
        (0..n)
            .map(|i| {
                // Outcome tracks the form gap, so the classifier has signal
                let home_form = (i % 5) as f32;
                let away_form = ((i + 2) % 5) as f32;
                let (home_score, away_score) = if home_form > away_form {
                    (2, 0)
                } else if home_form < away_form {
                    (0, 2)
                } else {
                    (1, 1)
                };
                MatchRecord {
                    home_team: format!("Team{}", i % 6),
                    away_team: format!("Team{}", (i + 1) % 6),
                    home_form: Some(home_form),
                    away_form: Some(away_form),
                    home_score: Some(home_score),
                    away_score: Some(away_score),
                    ..Default::default()
                }
            })
            .collect()
    }

    fn open_forge() -> (Forge, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data.data_path = dir.path().to_string_lossy().into_owned();
        (Forge::open(config).unwrap(), dir)
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(String, Value)>>,
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: &str, payload: Value) {
            self.events
                .lock()
                .unwrap()
                .push((event.to_string(), payload));
        }
    }

    #[test]
    fn test_train_then_predict_result() {
        let (forge, _dir) = open_forge();
        let records = league_records(80);

        let report = forge
            .train_match_result_model(&records, DEFAULT_RESULT_MODEL)
            .unwrap();
        assert!(report.metrics.accuracy > 0.7, "{}", report.metrics);
        assert!(!report.feature_importance.is_empty());

        let predictions = forge
            .predict_match_result(&records[..3], DEFAULT_RESULT_MODEL)
            .unwrap();
        assert_eq!(predictions.len(), 3);
        for prediction in &predictions {
            let total: f32 = prediction.probabilities.values().sum();
            assert!((total - 1.0).abs() < 1e-4);
            assert_eq!(
                prediction.probabilities[&prediction.predicted],
                prediction.confidence
            );
        }

        // Training appended to the metrics history
        assert_eq!(forge.model_metrics().len(), 1);
        assert!(!forge.feature_importance(Some(DEFAULT_RESULT_MODEL)).is_empty());
    }

    #[test]
    fn test_predict_without_model_is_typed_error() {
        let (forge, _dir) = open_forge();
        let err = forge
            .predict_match_result(&league_records(2), "missing")
            .unwrap_err();
        assert!(matches!(err, ForgeError::ModelNotFound(_)));
    }

    #[test]
    fn test_models_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data.data_path = dir.path().to_string_lossy().into_owned();

        let records = league_records(60);
        {
            let forge = Forge::open(config.clone()).unwrap();
            forge
                .train_match_result_model(&records, DEFAULT_RESULT_MODEL)
                .unwrap();
        }

        let reopened = Forge::open(config).unwrap();
        let predictions = reopened
            .predict_match_result(&records[..2], DEFAULT_RESULT_MODEL)
            .unwrap();
        assert_eq!(predictions.len(), 2);
    }

    #[test]
    fn test_missing_result_never_panics() {
        let (forge, _dir) = open_forge();
        let unlabelled = vec![MatchRecord {
            home_team: "A".to_string(),
            away_team: "B".to_string(),
            ..Default::default()
        }];
        let err = forge
            .train_match_result_model(&unlabelled, DEFAULT_RESULT_MODEL)
            .unwrap_err();
        assert!(matches!(err, ForgeError::MissingField("result")));
    }

    #[test]
    fn test_ensemble_round_trip_through_facade() {
        let (forge, _dir) = open_forge();
        let records = league_records(60);

        let members = forge
            .create_ensemble(&records, "committee", 3, Diversity::Both)
            .unwrap();
        assert_eq!(members, 3);

        let prediction = forge
            .predict_with_ensemble(&records[..5], "committee", true)
            .unwrap();
        assert_eq!(prediction.predictions.len(), 5);

        let report = forge.evaluate_ensemble(&records, "committee").unwrap();
        assert!(report.accuracy > 0.6, "{}", report);
    }

    #[test]
    fn test_prediction_event_emits_completion() {
        let (forge, _dir) = open_forge();
        let records = league_records(60);
        forge
            .train_match_result_model(&records, DEFAULT_RESULT_MODEL)
            .unwrap();

        let sink = RecordingSink::default();
        let payload = json!({
            "match_id": 17,
            "match_data": serde_json::to_value(&records[0]).unwrap(),
        });
        forge
            .handle_event("match_prediction_request", payload, &sink)
            .unwrap();

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        let (event, payload) = &events[0];
        assert_eq!(event, "match_prediction_complete");
        assert_eq!(payload["match_id"], json!(17));
        assert_eq!(payload["model_used"], json!(DEFAULT_RESULT_MODEL));
        assert!(payload["prediction"].is_array());
        assert!(payload["timestamp"].is_string());
    }

    #[test]
    fn test_training_event_round_trip() {
        let (forge, _dir) = open_forge();
        let sink = RecordingSink::default();
        let payload = json!({
            "training_data": serde_json::to_value(league_records(60)).unwrap(),
            "model_type": "match_result",
        });
        forge
            .handle_event("model_training_request", payload, &sink)
            .unwrap();

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "model_training_complete");
        assert_eq!(events[0].1["model_name"], json!("match_result_model"));
        assert!(events[0].1["results"]["metrics"]["accuracy"].is_number());
    }

    #[test]
    fn test_unknown_event_rejected() {
        let (forge, _dir) = open_forge();
        let sink = RecordingSink::default();
        let err = forge
            .handle_event("tarot_reading_request", json!({}), &sink)
            .unwrap_err();
        assert!(matches!(err, ForgeError::UnknownEvent(_)));
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_payload_rejected() {
        let (forge, _dir) = open_forge();
        let sink = RecordingSink::default();
        let err = forge
            .handle_event("match_prediction_request", json!({"match_data": 5}), &sink)
            .unwrap_err();
        assert!(matches!(err, ForgeError::BadPayload(_)));
    }

    #[test]
    fn test_model_summary_lists_models() {
        let (forge, _dir) = open_forge();
        forge
            .train_match_result_model(&league_records(60), "summary_model")
            .unwrap();

        let summary = forge.model_summary();
        assert!(summary.contains("summary_model"));
        assert!(summary.contains("Top features"));
    }
}
