//! Turns raw match records into numeric feature matrices

use ndarray::Array2;

use crate::boosting::{Booster, BoostParams, Objective};
use crate::features::encoding::{EncoderSet, LabelEncoder, OneHotEncoder};
use crate::{ForgeError, MatchRecord, Result};

/// Categorical columns that get a label-encoded feature
const LABEL_FIELDS: [&str; 4] = ["home_team", "away_team", "competition", "season"];

/// Categorical columns that additionally get a one-hot block
const ONEHOT_FIELDS: [&str; 2] = ["competition", "season"];

/// Numeric columns, in feature order
const NUMERIC_FIELDS: [&str; 8] = [
    "home_form",
    "away_form",
    "home_ranking",
    "away_ranking",
    "home_goals_scored",
    "away_goals_scored",
    "home_goals_conceded",
    "away_goals_conceded",
];

const DATE_FIELDS: [&str; 3] = ["day_of_week", "month", "is_weekend"];

const DERIVED_FIELDS: [&str; 4] = [
    "form_diff",
    "ranking_diff",
    "home_goal_ratio",
    "away_goal_ratio",
];

/// A numeric feature matrix with named columns
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub values: Array2<f32>,
}

impl FeatureMatrix {
    pub fn rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn cols(&self) -> usize {
        self.values.ncols()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// New matrix containing only the given columns, in the given order
    pub fn select(&self, indices: &[usize]) -> FeatureMatrix {
        let columns = indices.iter().map(|&i| self.columns[i].clone()).collect();
        let mut values = Array2::zeros((self.rows(), indices.len()));
        for (out_col, &src_col) in indices.iter().enumerate() {
            for row in 0..self.rows() {
                values[[row, out_col]] = self.values[[row, src_col]];
            }
        }
        FeatureMatrix { columns, values }
    }

    fn push_column(&mut self, name: &str, data: Vec<f32>) {
        let rows = self.rows();
        let mut values = Array2::zeros((rows, self.cols() + 1));
        for row in 0..rows {
            for col in 0..self.cols() {
                values[[row, col]] = self.values[[row, col]];
            }
            values[[row, self.cols()]] = data[row];
        }
        self.columns.push(name.to_string());
        self.values = values;
    }
}

/// Whether to fit fresh encoders or replay a stored set
pub enum PreprocessMode<'a> {
    Training,
    Prediction(&'a EncoderSet),
}

/// Output of [`FeatureEngineer::preprocess`]
#[derive(Debug)]
pub struct Preprocessed {
    pub matrix: FeatureMatrix,
    /// Outcome class per row; present only in training mode
    pub targets: Option<Vec<usize>>,
    /// Fitted encoders; present only in training mode
    pub encoders: Option<EncoderSet>,
}

/// Stateless feature builder.
///
/// Training fits encoders and records the exact column schema; prediction
/// replays that schema, so the two paths can never drift apart.
pub struct FeatureEngineer;

impl FeatureEngineer {
    pub fn preprocess(records: &[MatchRecord], mode: PreprocessMode) -> Result<Preprocessed> {
        if records.is_empty() {
            return Err(ForgeError::EmptyDataset);
        }
        Self::check_identity_fields(records)?;

        match mode {
            PreprocessMode::Training => {
                let targets = Self::encode_targets(records)?;
                let encoders = Self::fit_encoders(records);
                let matrix = Self::encode_rows(records, &encoders);
                Ok(Preprocessed {
                    matrix,
                    targets: Some(targets),
                    encoders: Some(encoders),
                })
            }
            PreprocessMode::Prediction(encoders) => {
                let matrix = Self::encode_rows(records, encoders);
                Ok(Preprocessed {
                    matrix,
                    targets: None,
                    encoders: None,
                })
            }
        }
    }

    fn check_identity_fields(records: &[MatchRecord]) -> Result<()> {
        for record in records {
            if record.home_team.trim().is_empty() {
                return Err(ForgeError::MissingField("home_team"));
            }
            if record.away_team.trim().is_empty() {
                return Err(ForgeError::MissingField("away_team"));
            }
        }
        Ok(())
    }

    fn encode_targets(records: &[MatchRecord]) -> Result<Vec<usize>> {
        records
            .iter()
            .map(|r| {
                r.outcome()
                    .map(|o| o.class_index())
                    .ok_or(ForgeError::MissingField("result"))
            })
            .collect()
    }

    /// Fit encoders and record the column schema for this dataset
    fn fit_encoders(records: &[MatchRecord]) -> EncoderSet {
        let mut encoders = EncoderSet::default();

        for field in LABEL_FIELDS {
            let values: Vec<&str> = records
                .iter()
                .filter_map(|r| categorical_field(r, field))
                .collect();
            if !values.is_empty() {
                encoders
                    .labels
                    .insert(field.to_string(), LabelEncoder::fit(values));
            }
        }

        for field in ONEHOT_FIELDS {
            let values: Vec<&str> = records
                .iter()
                .filter_map(|r| categorical_field(r, field))
                .collect();
            if !values.is_empty() {
                encoders
                    .onehot
                    .insert(field.to_string(), OneHotEncoder::fit(values));
            }
        }

        let has_dates = records.iter().any(|r| r.date.is_some());

        let mut columns = Vec::new();
        for field in LABEL_FIELDS {
            if encoders.labels.contains_key(field) {
                columns.push(format!("{}_encoded", field));
            }
        }
        for field in ONEHOT_FIELDS {
            if let Some(encoder) = encoders.onehot.get(field) {
                for i in 0..encoder.width() {
                    columns.push(format!("{}_{}", field, i));
                }
            }
        }
        for field in NUMERIC_FIELDS {
            if records.iter().any(|r| numeric_field(r, field).is_some()) {
                columns.push(field.to_string());
            }
        }
        if has_dates {
            for field in DATE_FIELDS {
                columns.push(field.to_string());
            }
        }
        for field in DERIVED_FIELDS {
            if derived_inputs_present(&columns, field) {
                columns.push(field.to_string());
            }
        }

        encoders.columns = columns;
        encoders
    }

    /// Build the matrix for the stored schema.
    ///
    /// Used identically by the training and prediction paths: re-encoding the
    /// training rows with the fitted encoders reproduces the training matrix.
    fn encode_rows(records: &[MatchRecord], encoders: &EncoderSet) -> FeatureMatrix {
        let columns = encoders.columns.clone();
        let mut values = Array2::zeros((records.len(), columns.len()));

        for (row, record) in records.iter().enumerate() {
            for (col, name) in columns.iter().enumerate() {
                values[[row, col]] = column_value(record, name, encoders);
            }
        }

        FeatureMatrix { columns, values }
    }

    /// Append the pairwise interaction columns whose inputs exist.
    pub fn interaction_features(matrix: &FeatureMatrix) -> FeatureMatrix {
        let mut out = matrix.clone();
        let pairs = [
            ("home_away_form_interaction", "home_form", "away_form"),
            ("home_form_goal_interaction", "home_form", "home_goal_ratio"),
            ("away_form_goal_interaction", "away_form", "away_goal_ratio"),
            ("ranking_interaction", "home_ranking", "away_ranking"),
            ("home_day_interaction", "day_of_week", "home_team_encoded"),
            ("away_day_interaction", "day_of_week", "away_team_encoded"),
        ];

        for (name, left, right) in pairs {
            let (Some(l), Some(r)) = (matrix.column_index(left), matrix.column_index(right))
            else {
                continue;
            };
            let data: Vec<f32> = (0..matrix.rows())
                .map(|row| matrix.values[[row, l]] * matrix.values[[row, r]])
                .collect();
            out.push_column(name, data);
        }

        out
    }

    /// Keep the `k` columns with the highest gain importance, ranked by a
    /// small probe model trained on the data itself.
    pub fn select_features(
        matrix: &FeatureMatrix,
        targets: &[usize],
        k: usize,
    ) -> Result<(FeatureMatrix, Vec<String>)> {
        if k == 0 {
            return Err(ForgeError::InvalidParameter(
                "select_features requires k >= 1".to_string(),
            ));
        }

        let classes = targets.iter().copied().max().unwrap_or(0) + 1;
        let params = BoostParams {
            objective: Objective::Softprob {
                classes: classes.max(2),
            },
            n_rounds: 100,
            learning_rate: 0.1,
            max_depth: 4,
            subsample: 1.0,
            colsample: 1.0,
            ..BoostParams::default()
        };

        let y: Vec<f32> = targets.iter().map(|&t| t as f32).collect();
        let probe = Booster::train(&matrix.values, &y, &matrix.columns, &params)?;
        let importance = probe.gain_importance();

        let mut ranked: Vec<(usize, f32)> = matrix
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| (i, importance.get(name).copied().unwrap_or(0.0)))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut indices: Vec<usize> = ranked.iter().take(k).map(|(i, _)| *i).collect();
        indices.sort_unstable();

        let selected = matrix.select(&indices);
        let names = selected.columns.clone();
        log::info!("Selected features: {}", names.join(", "));
        Ok((selected, names))
    }
}

fn categorical_field<'a>(record: &'a MatchRecord, field: &str) -> Option<&'a str> {
    match field {
        "home_team" => Some(record.home_team.as_str()),
        "away_team" => Some(record.away_team.as_str()),
        "competition" => record.competition.as_deref(),
        "season" => record.season.as_deref(),
        _ => None,
    }
}

fn numeric_field(record: &MatchRecord, field: &str) -> Option<f32> {
    match field {
        "home_form" => record.home_form,
        "away_form" => record.away_form,
        "home_ranking" => record.home_ranking,
        "away_ranking" => record.away_ranking,
        "home_goals_scored" => record.home_goals_scored,
        "away_goals_scored" => record.away_goals_scored,
        "home_goals_conceded" => record.home_goals_conceded,
        "away_goals_conceded" => record.away_goals_conceded,
        _ => None,
    }
}

fn derived_inputs_present(columns: &[String], derived: &str) -> bool {
    let has = |name: &str| columns.iter().any(|c| c == name);
    match derived {
        "form_diff" => has("home_form") && has("away_form"),
        "ranking_diff" => has("home_ranking") && has("away_ranking"),
        "home_goal_ratio" => has("home_goals_scored") && has("home_goals_conceded"),
        "away_goal_ratio" => has("away_goals_scored") && has("away_goals_conceded"),
        _ => false,
    }
}

fn column_value(record: &MatchRecord, column: &str, encoders: &EncoderSet) -> f32 {
    // Label-encoded categoricals
    if let Some(field) = column.strip_suffix("_encoded") {
        let Some(encoder) = encoders.labels.get(field) else {
            return 0.0;
        };
        return match categorical_field(record, field) {
            Some(value) => encoder.encode(value) as f32,
            None => crate::features::encoding::UNSEEN as f32,
        };
    }

    // One-hot indicator columns ("competition_3", "season_0", ...)
    for field in ONEHOT_FIELDS {
        let prefix = format!("{}_", field);
        if let Some(rest) = column.strip_prefix(&prefix) {
            if let Ok(i) = rest.parse::<usize>() {
                if let Some(encoder) = encoders.onehot.get(field) {
                    let block = encoder.encode(categorical_field(record, field));
                    return block.get(i).copied().unwrap_or(0.0);
                }
            }
        }
    }

    if let Some(value) = numeric_field(record, column) {
        return value;
    }

    match column {
        "day_of_week" => record
            .date
            .map(|d| chrono::Datelike::weekday(&d).num_days_from_monday() as f32)
            .unwrap_or(0.0),
        "month" => record
            .date
            .map(|d| chrono::Datelike::month(&d) as f32)
            .unwrap_or(0.0),
        "is_weekend" => record
            .date
            .map(|d| {
                let dow = chrono::Datelike::weekday(&d).num_days_from_monday();
                if dow >= 5 {
                    1.0
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0),
        "form_diff" => {
            record.home_form.unwrap_or(0.0) - record.away_form.unwrap_or(0.0)
        }
        "ranking_diff" => {
            record.away_ranking.unwrap_or(0.0) - record.home_ranking.unwrap_or(0.0)
        }
        "home_goal_ratio" => goal_ratio(record.home_goals_scored, record.home_goals_conceded),
        "away_goal_ratio" => goal_ratio(record.away_goals_scored, record.away_goals_conceded),
        // Missing numeric against the stored schema
        _ => 0.0,
    }
}

/// Goals scored over goals conceded, with the zero-denominator floor
fn goal_ratio(scored: Option<f32>, conceded: Option<f32>) -> f32 {
    let scored = scored.unwrap_or(0.0);
    let conceded = conceded.unwrap_or(0.0);
    let denom = if conceded == 0.0 { 0.5 } else { conceded };
    scored / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(home: &str, away: &str) -> MatchRecord {
        MatchRecord {
            home_team: home.to_string(),
            away_team: away.to_string(),
            home_score: Some(1),
            away_score: Some(0),
            ..Default::default()
        }
    }

    fn rich_records() -> Vec<MatchRecord> {
        vec![
            MatchRecord {
                competition: Some("league".to_string()),
                season: Some("2024".to_string()),
                date: NaiveDate::from_ymd_opt(2024, 3, 2), // Saturday
                home_form: Some(3.0),
                away_form: Some(1.0),
                home_ranking: Some(2.0),
                away_ranking: Some(8.0),
                home_goals_scored: Some(12.0),
                away_goals_scored: Some(6.0),
                home_goals_conceded: Some(4.0),
                away_goals_conceded: Some(0.0),
                ..record("Ajax", "Porto")
            },
            MatchRecord {
                competition: Some("cup".to_string()),
                season: Some("2024".to_string()),
                date: NaiveDate::from_ymd_opt(2024, 3, 6), // Wednesday
                home_form: Some(1.0),
                away_form: Some(2.0),
                home_ranking: Some(5.0),
                away_ranking: Some(1.0),
                home_goals_scored: Some(7.0),
                away_goals_scored: Some(9.0),
                home_goals_conceded: Some(7.0),
                away_goals_conceded: Some(3.0),
                home_score: Some(0),
                away_score: Some(2),
                ..record("Celtic", "Ajax")
            },
        ]
    }

    #[test]
    fn test_training_builds_full_schema() {
        let out =
            FeatureEngineer::preprocess(&rich_records(), PreprocessMode::Training).unwrap();
        let encoders = out.encoders.unwrap();

        // 4 encoded + 2 competition one-hot + 1 season one-hot + 8 numeric
        // + 3 date + 4 derived
        assert_eq!(encoders.columns.len(), 22);
        assert_eq!(out.matrix.cols(), 22);
        assert_eq!(out.targets.unwrap(), vec![0, 2]);
    }

    #[test]
    fn test_encoding_round_trip_is_idempotent() {
        let records = rich_records();
        let trained = FeatureEngineer::preprocess(&records, PreprocessMode::Training).unwrap();
        let encoders = trained.encoders.unwrap();

        let replayed =
            FeatureEngineer::preprocess(&records, PreprocessMode::Prediction(&encoders)).unwrap();

        assert_eq!(trained.matrix.columns, replayed.matrix.columns);
        assert_eq!(trained.matrix.values, replayed.matrix.values);
    }

    #[test]
    fn test_unseen_team_maps_to_sentinel() {
        let records = rich_records();
        let trained = FeatureEngineer::preprocess(&records, PreprocessMode::Training).unwrap();
        let encoders = trained.encoders.unwrap();

        let unseen = vec![MatchRecord {
            competition: Some("friendly".to_string()),
            ..record("Boca", "Ajax")
        }];
        let out =
            FeatureEngineer::preprocess(&unseen, PreprocessMode::Prediction(&encoders)).unwrap();

        let home_col = out.matrix.column_index("home_team_encoded").unwrap();
        assert_eq!(out.matrix.values[[0, home_col]], -1.0);

        // Unknown competition: zero one-hot block
        let comp0 = out.matrix.column_index("competition_0").unwrap();
        let comp1 = out.matrix.column_index("competition_1").unwrap();
        assert_eq!(out.matrix.values[[0, comp0]], 0.0);
        assert_eq!(out.matrix.values[[0, comp1]], 0.0);
    }

    #[test]
    fn test_missing_home_team_is_an_error() {
        let records = vec![record("", "Porto")];
        let err = FeatureEngineer::preprocess(&records, PreprocessMode::Training).unwrap_err();
        assert!(matches!(err, crate::ForgeError::MissingField("home_team")));

        // Prediction path fails the same way, never panics
        let encoders = EncoderSet::default();
        let err = FeatureEngineer::preprocess(&records, PreprocessMode::Prediction(&encoders))
            .unwrap_err();
        assert!(matches!(err, crate::ForgeError::MissingField("home_team")));
    }

    #[test]
    fn test_training_without_outcome_is_an_error() {
        let records = vec![MatchRecord {
            home_team: "Ajax".to_string(),
            away_team: "Porto".to_string(),
            ..Default::default()
        }];
        let err = FeatureEngineer::preprocess(&records, PreprocessMode::Training).unwrap_err();
        assert!(matches!(err, crate::ForgeError::MissingField("result")));
    }

    #[test]
    fn test_goal_ratio_zero_floor() {
        assert_eq!(goal_ratio(Some(3.0), Some(0.0)), 6.0);
        assert_eq!(goal_ratio(Some(3.0), Some(2.0)), 1.5);
    }

    #[test]
    fn test_date_features() {
        let out =
            FeatureEngineer::preprocess(&rich_records(), PreprocessMode::Training).unwrap();
        let dow = out.matrix.column_index("day_of_week").unwrap();
        let weekend = out.matrix.column_index("is_weekend").unwrap();
        let month = out.matrix.column_index("month").unwrap();

        // Saturday
        assert_eq!(out.matrix.values[[0, dow]], 5.0);
        assert_eq!(out.matrix.values[[0, weekend]], 1.0);
        assert_eq!(out.matrix.values[[0, month]], 3.0);
        // Wednesday
        assert_eq!(out.matrix.values[[1, dow]], 2.0);
        assert_eq!(out.matrix.values[[1, weekend]], 0.0);
    }

    #[test]
    fn test_select_features_keeps_informative_columns() {
        // The outcome tracks the form gap; rankings are constant noise
        let records: Vec<MatchRecord> = (0..30)
            .map(|i| {
                let home_form = (i % 5) as f32;
                let away_form = ((i + 2) % 5) as f32;
                let (home_score, away_score) =
                    if home_form > away_form { (2, 0) } else { (0, 2) };
                MatchRecord {
                    home_team: format!("Team{}", i % 3),
                    away_team: format!("Team{}", (i + 1) % 3),
                    home_form: Some(home_form),
                    away_form: Some(away_form),
                    home_ranking: Some(1.0),
                    away_ranking: Some(1.0),
                    home_score: Some(home_score),
                    away_score: Some(away_score),
                    ..Default::default()
                }
            })
            .collect();

        let out = FeatureEngineer::preprocess(&records, PreprocessMode::Training).unwrap();
        let targets = out.targets.unwrap();
        let (selected, names) =
            FeatureEngineer::select_features(&out.matrix, &targets, 3).unwrap();

        assert_eq!(selected.cols(), 3);
        assert_eq!(names, selected.columns);
        assert!(
            names.iter().any(|n| n == "form_diff" || n == "home_form" || n == "away_form"),
            "selected: {:?}",
            names
        );
        // Constant columns carry no gain and are dropped
        assert!(!names.iter().any(|n| n == "ranking_diff"));
    }

    #[test]
    fn test_interaction_features_appended() {
        let out =
            FeatureEngineer::preprocess(&rich_records(), PreprocessMode::Training).unwrap();
        let with_interactions = FeatureEngineer::interaction_features(&out.matrix);

        assert_eq!(with_interactions.cols(), out.matrix.cols() + 6);
        let idx = with_interactions
            .column_index("home_away_form_interaction")
            .unwrap();
        // 3.0 * 1.0
        assert_eq!(with_interactions.values[[0, idx]], 3.0);
    }
}
