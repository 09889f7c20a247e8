//! Match prediction using gradient-boosted trees
//!
//! A toolkit for training and serving sports match prediction models:
//! result probabilities, exact-score forecasts and anomaly screening.

pub mod boosting;
pub mod data;
pub mod features;
pub mod forge;
pub mod store;
pub mod training;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use crate::forge::Forge;

/// Final outcome of a match, from the home side's perspective.
///
/// Class indices are fixed (0 = home win, 1 = draw, 2 = away win) so that
/// trained classifiers stay aligned across datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MatchOutcome {
    HomeWin,
    Draw,
    AwayWin,
}

impl MatchOutcome {
    /// Number of outcome classes
    pub const COUNT: usize = 3;

    /// Fixed class index used as the classification target
    pub fn class_index(self) -> usize {
        match self {
            MatchOutcome::HomeWin => 0,
            MatchOutcome::Draw => 1,
            MatchOutcome::AwayWin => 2,
        }
    }

    pub fn from_class_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(MatchOutcome::HomeWin),
            1 => Some(MatchOutcome::Draw),
            2 => Some(MatchOutcome::AwayWin),
            _ => None,
        }
    }

    /// Derive the outcome from a final score
    pub fn from_scores(home: u32, away: u32) -> Self {
        match home.cmp(&away) {
            std::cmp::Ordering::Greater => MatchOutcome::HomeWin,
            std::cmp::Ordering::Equal => MatchOutcome::Draw,
            std::cmp::Ordering::Less => MatchOutcome::AwayWin,
        }
    }
}

impl fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchOutcome::HomeWin => write!(f, "Home win"),
            MatchOutcome::Draw => write!(f, "Draw"),
            MatchOutcome::AwayWin => write!(f, "Away win"),
        }
    }
}

/// A single match, as supplied for training or prediction.
///
/// Only the team names are required; every contextual field is optional and
/// participates in the feature matrix only when the dataset supplies it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchRecord {
    pub home_team: String,
    pub away_team: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub competition: Option<String>,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub home_form: Option<f32>,
    #[serde(default)]
    pub away_form: Option<f32>,
    #[serde(default)]
    pub home_ranking: Option<f32>,
    #[serde(default)]
    pub away_ranking: Option<f32>,
    #[serde(default)]
    pub home_goals_scored: Option<f32>,
    #[serde(default)]
    pub away_goals_scored: Option<f32>,
    #[serde(default)]
    pub home_goals_conceded: Option<f32>,
    #[serde(default)]
    pub away_goals_conceded: Option<f32>,
    #[serde(default)]
    pub home_score: Option<u32>,
    #[serde(default)]
    pub away_score: Option<u32>,
    #[serde(default)]
    pub result: Option<MatchOutcome>,
}

impl MatchRecord {
    /// The match outcome: the explicit label if present, otherwise derived
    /// from the final score.
    pub fn outcome(&self) -> Option<MatchOutcome> {
        self.result.or_else(|| match (self.home_score, self.away_score) {
            (Some(h), Some(a)) => Some(MatchOutcome::from_scores(h, a)),
            _ => None,
        })
    }
}

/// Application-wide errors
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Empty dataset - nothing to train on")]
    EmptyDataset,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Encoder fingerprint mismatch for '{model}': expected {expected:#018x}, found {found:#018x}")]
    EncoderMismatch {
        model: String,
        expected: u64,
        found: u64,
    },

    #[error("Unsupported model schema version {found} (this build reads version {expected})")]
    SchemaVersion { expected: u32, found: u32 },

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Malformed event payload: {0}")]
    BadPayload(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ForgeError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data: DataConfig,
    pub training: TrainingConfig,
    pub tuning: TuningConfig,
    pub ensemble: EnsembleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root directory for models and ensembles
    pub data_path: String,
    pub database_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub learning_rate: f32,
    pub max_depth: usize,
    pub n_rounds: usize,
    pub subsample: f32,
    pub colsample: f32,
    pub min_child_weight: f32,
    pub gamma: f32,
    pub lambda: f32,
    pub seed: u64,
    /// Fraction of rows held out for evaluation
    pub test_size: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Run the grid search before every training call
    pub enabled: bool,
    pub folds: usize,
    /// Above this row count the grid is trimmed to endpoint values
    pub large_dataset_rows: usize,
    pub cache_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub count: usize,
    pub diversity: training::ensemble::Diversity,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data: DataConfig {
                data_path: "data".to_string(),
                database_path: "data/forge.db".to_string(),
            },
            training: TrainingConfig {
                learning_rate: 0.1,
                max_depth: 5,
                n_rounds: 100,
                subsample: 0.8,
                colsample: 0.8,
                min_child_weight: 1.0,
                gamma: 0.0,
                lambda: 1.0,
                seed: 42,
                test_size: 0.2,
            },
            tuning: TuningConfig {
                enabled: false,
                folds: 3,
                large_dataset_rows: 10_000,
                cache_capacity: 64,
            },
            ensemble: EnsembleConfig {
                count: 5,
                diversity: training::ensemble::Diversity::Params,
            },
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ForgeError::Config(format!("Failed to read config file {}: {}", path, e))
        })?;
        toml::from_str(&content)
            .map_err(|e| ForgeError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ForgeError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
