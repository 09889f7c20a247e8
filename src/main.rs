//! Match prediction CLI
//!
//! Boosted-tree training and prediction for match results, exact scores and
//! anomaly screening.

use clap::{Parser, Subcommand};
use forge::training::ensemble::Diversity;
use forge::{Config, Result};

#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "Match prediction with gradient-boosted trees", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Data management commands
    Data {
        #[command(subcommand)]
        action: DataCommands,
    },
    /// Train a model on the stored matches (or a fixture file)
    Train {
        /// Model kind: result, score, or anomaly
        kind: TrainKind,
        /// Model name (defaults per kind)
        #[arg(long)]
        name: Option<String>,
        /// Train from a JSON fixture file instead of the database
        #[arg(long)]
        fixture: Option<String>,
        /// Run the hyperparameter grid search first
        #[arg(long)]
        tune: bool,
    },
    /// Predict outcomes for matches in a fixture file
    Predict {
        /// result or score
        kind: TrainKind,
        /// JSON fixture file with the matches to predict
        fixture: String,
        /// Model name (defaults per kind)
        #[arg(long)]
        model: Option<String>,
        /// Output format
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },
    /// Scan matches for anomalies
    Detect {
        /// JSON fixture file with the matches to scan
        fixture: String,
        /// Override the stored anomaly threshold
        #[arg(long)]
        threshold: Option<f32>,
        /// Anomaly model name
        #[arg(long)]
        model: Option<String>,
        /// Output format
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },
    /// Ensemble management commands
    Ensemble {
        #[command(subcommand)]
        action: EnsembleCommands,
    },
    /// Model management commands
    Model {
        #[command(subcommand)]
        action: ModelCommands,
    },
    /// Initialize a new project with default config
    Init,
}

#[derive(Subcommand)]
enum DataCommands {
    /// Import a JSON fixture file into the match database
    Import {
        /// Path to the JSON file (array of match records)
        path: String,
    },
    /// Show database status
    Status,
}

#[derive(Subcommand)]
enum EnsembleCommands {
    /// Train a diversified ensemble
    Create {
        name: String,
        /// Number of members (defaults to config)
        #[arg(long)]
        count: Option<usize>,
        /// Diversity method: params, features, or both
        #[arg(long)]
        diversity: Option<Diversity>,
        /// Train from a JSON fixture file instead of the database
        #[arg(long)]
        fixture: Option<String>,
    },
    /// Predict with a stored ensemble
    Predict {
        name: String,
        fixture: String,
        /// Weight later members higher
        #[arg(long)]
        weighted: bool,
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },
    /// Evaluate a stored ensemble on labelled matches
    Evaluate {
        name: String,
        fixture: String,
    },
}

#[derive(Subcommand)]
enum ModelCommands {
    /// List stored models
    List,
    /// Show metrics and top features per model
    Summary,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TrainKind {
    Result,
    Score,
    Anomaly,
}

impl std::str::FromStr for TrainKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "result" => Ok(TrainKind::Result),
            "score" => Ok(TrainKind::Score),
            "anomaly" => Ok(TrainKind::Anomaly),
            _ => Err(format!(
                "Unknown model kind: {}. Use result, score, or anomaly.",
                s
            )),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum OutputFormat {
    Table,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown format: {}. Use table or json.", s)),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    let result = match cli.command {
        Commands::Data { action } => match action {
            DataCommands::Import { path } => commands::data_import(&config, &path),
            DataCommands::Status => commands::data_status(&config),
        },
        Commands::Train {
            kind,
            name,
            fixture,
            tune,
        } => commands::train(&config, kind, name, fixture, tune),
        Commands::Predict {
            kind,
            fixture,
            model,
            format,
        } => commands::predict(&config, kind, &fixture, model, format),
        Commands::Detect {
            fixture,
            threshold,
            model,
            format,
        } => commands::detect(&config, &fixture, threshold, model, format),
        Commands::Ensemble { action } => match action {
            EnsembleCommands::Create {
                name,
                count,
                diversity,
                fixture,
            } => commands::ensemble_create(&config, &name, count, diversity, fixture),
            EnsembleCommands::Predict {
                name,
                fixture,
                weighted,
                format,
            } => commands::ensemble_predict(&config, &name, &fixture, weighted, format),
            EnsembleCommands::Evaluate { name, fixture } => {
                commands::ensemble_evaluate(&config, &name, &fixture)
            }
        },
        Commands::Model { action } => match action {
            ModelCommands::List => commands::model_list(&config),
            ModelCommands::Summary => commands::model_summary(&config),
        },
        Commands::Init => commands::init(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

mod commands {
    use super::{OutputFormat, TrainKind};
    use forge::data::Database;
    use forge::forge::{DEFAULT_ANOMALY_MODEL, DEFAULT_RESULT_MODEL, DEFAULT_SCORE_MODEL};
    use forge::training::ensemble::Diversity;
    use forge::{Config, Forge, MatchRecord, Result};

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        std::fs::create_dir_all(&config.data.data_path)?;
        println!("Created {}/ directory", config.data.data_path);

        println!("\nNext steps:");
        println!("  1. Edit {} to customize settings", config_path);
        println!("  2. Run 'forge data import matches.json' to load training data");
        println!("  3. Run 'forge train result' to train the result model");
        println!("  4. Run 'forge predict result fixtures.json' to make predictions");
        Ok(())
    }

    pub fn data_import(config: &Config, path: &str) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        let count = db.import_json(path)?;
        println!("Imported {} matches into {}", count, config.data.database_path);
        Ok(())
    }

    pub fn data_status(config: &Config) -> Result<()> {
        let db = Database::open(&config.data.database_path)?;
        let stats = db.stats()?;
        println!("Database: {}", config.data.database_path);
        println!("  Matches: {}", stats.match_count);
        println!("  Teams:   {}", stats.team_count);
        if let (Some(first), Some(last)) = (stats.earliest_match, stats.latest_match) {
            println!("  Range:   {} to {}", first, last);
        }
        Ok(())
    }

    pub fn train(
        config: &Config,
        kind: TrainKind,
        name: Option<String>,
        fixture: Option<String>,
        tune: bool,
    ) -> Result<()> {
        let mut config = config.clone();
        if tune {
            config.tuning.enabled = true;
        }
        let records = load_records(&config, fixture.as_deref())?;
        println!("Training on {} matches", records.len());
        let forge = Forge::open(config)?;

        match kind {
            TrainKind::Result => {
                let name = name.unwrap_or_else(|| DEFAULT_RESULT_MODEL.to_string());
                let report = forge.train_match_result_model(&records, &name)?;
                println!("Trained '{}': {}", name, report.metrics);

                let mut ranked: Vec<_> = report.feature_importance.iter().collect();
                ranked.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
                println!("Top features:");
                for (feature, gain) in ranked.into_iter().take(5) {
                    println!("  {}: {:.4}", feature, gain);
                }
            }
            TrainKind::Score => {
                let name = name.unwrap_or_else(|| DEFAULT_SCORE_MODEL.to_string());
                let report = forge.train_score_model(&records, &name)?;
                println!(
                    "Trained '{}': exact {:.1}%, outcome {:.1}%, MAE {:.2}/{:.2} ({} held-out rows)",
                    name,
                    report.exact_accuracy * 100.0,
                    report.result_accuracy * 100.0,
                    report.home_mae,
                    report.away_mae,
                    report.test_rows
                );
                println!("Most common scores:");
                for (score, count) in &report.most_common_scores {
                    println!("  {}: {} matches", score, count);
                }
            }
            TrainKind::Anomaly => {
                let name = name.unwrap_or_else(|| DEFAULT_ANOMALY_MODEL.to_string());
                let report = forge.train_anomaly_model(&records, &name)?;
                println!(
                    "Trained '{}': mean {:.4}, std {:.4}, threshold {:.4}",
                    name, report.mean, report.std, report.threshold
                );
            }
        }
        Ok(())
    }

    pub fn predict(
        config: &Config,
        kind: TrainKind,
        fixture: &str,
        model: Option<String>,
        format: OutputFormat,
    ) -> Result<()> {
        let records = read_fixture(fixture)?;
        let forge = Forge::open(config.clone())?;

        match kind {
            TrainKind::Result => {
                let model = model.unwrap_or_else(|| DEFAULT_RESULT_MODEL.to_string());
                let predictions = forge.predict_match_result(&records, &model)?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&predictions)?)
                    }
                    OutputFormat::Table => {
                        for (record, prediction) in records.iter().zip(&predictions) {
                            println!(
                                "{} vs {}  ->  {} ({:.1}%)",
                                record.home_team,
                                record.away_team,
                                prediction.predicted,
                                prediction.confidence * 100.0
                            );
                        }
                    }
                }
            }
            TrainKind::Score => {
                let model = model.unwrap_or_else(|| DEFAULT_SCORE_MODEL.to_string());
                let predictions = forge.predict_match_score(&records, &model)?;
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&predictions)?)
                    }
                    OutputFormat::Table => {
                        for (record, prediction) in records.iter().zip(&predictions) {
                            println!(
                                "{} vs {}  ->  {}  ({})",
                                record.home_team,
                                record.away_team,
                                prediction.predicted_score,
                                prediction.outcome
                            );
                        }
                    }
                }
            }
            TrainKind::Anomaly => {
                return Err(forge::ForgeError::InvalidParameter(
                    "use 'forge detect' for anomaly scans".to_string(),
                ))
            }
        }
        Ok(())
    }

    pub fn detect(
        config: &Config,
        fixture: &str,
        threshold: Option<f32>,
        model: Option<String>,
        format: OutputFormat,
    ) -> Result<()> {
        let records = read_fixture(fixture)?;
        let forge = Forge::open(config.clone())?;
        let model = model.unwrap_or_else(|| DEFAULT_ANOMALY_MODEL.to_string());
        let report = forge.detect_anomalies(&records, threshold, &model)?;

        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Table => {
                println!(
                    "Scanned {} matches (threshold {:.4}): {} anomalies",
                    records.len(),
                    report.threshold_used,
                    report.anomalies.len()
                );
                for flag in &report.anomalies {
                    let record = &records[flag.row];
                    println!(
                        "  {} vs {}: score {:.4} ({:.1} std below mean)",
                        record.home_team, record.away_team, flag.score, flag.deviation
                    );
                }
            }
        }
        Ok(())
    }

    pub fn ensemble_create(
        config: &Config,
        name: &str,
        count: Option<usize>,
        diversity: Option<Diversity>,
        fixture: Option<String>,
    ) -> Result<()> {
        let records = load_records(config, fixture.as_deref())?;
        let forge = Forge::open(config.clone())?;
        let count = count.unwrap_or(config.ensemble.count);
        let diversity = diversity.unwrap_or(config.ensemble.diversity);

        let members = forge.create_ensemble(&records, name, count, diversity)?;
        println!(
            "Created ensemble '{}' with {} members (diversity: {})",
            name, members, diversity
        );
        Ok(())
    }

    pub fn ensemble_predict(
        config: &Config,
        name: &str,
        fixture: &str,
        weighted: bool,
        format: OutputFormat,
    ) -> Result<()> {
        let records = read_fixture(fixture)?;
        let forge = Forge::open(config.clone())?;
        let prediction = forge.predict_with_ensemble(&records, name, weighted)?;

        match format {
            OutputFormat::Json => {
                let rows: Vec<serde_json::Value> = records
                    .iter()
                    .zip(&prediction.predictions)
                    .zip(&prediction.confidence)
                    .map(|((record, &class), &confidence)| {
                        serde_json::json!({
                            "home_team": record.home_team,
                            "away_team": record.away_team,
                            "predicted_class": class,
                            "confidence": confidence,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
            OutputFormat::Table => {
                for (i, record) in records.iter().enumerate() {
                    let outcome = forge::MatchOutcome::from_class_index(
                        prediction.predictions[i],
                    );
                    match outcome {
                        Some(outcome) => println!(
                            "{} vs {}  ->  {} ({:.1}%)",
                            record.home_team,
                            record.away_team,
                            outcome,
                            prediction.confidence[i] * 100.0
                        ),
                        None => println!(
                            "{} vs {}  ->  class {} ({:.1}%)",
                            record.home_team,
                            record.away_team,
                            prediction.predictions[i],
                            prediction.confidence[i] * 100.0
                        ),
                    }
                }
            }
        }
        Ok(())
    }

    pub fn ensemble_evaluate(config: &Config, name: &str, fixture: &str) -> Result<()> {
        let records = read_fixture(fixture)?;
        let forge = Forge::open(config.clone())?;
        let report = forge.evaluate_ensemble(&records, name)?;
        println!("Ensemble '{}': {}", name, report);
        Ok(())
    }

    pub fn model_list(config: &Config) -> Result<()> {
        let forge = Forge::open(config.clone())?;
        let models = forge.store().list();
        if models.is_empty() {
            println!("No models stored. Run 'forge train result' first.");
            return Ok(());
        }
        for (name, kind) in models {
            println!("{}  ({})", name, kind.label());
        }
        Ok(())
    }

    pub fn model_summary(config: &Config) -> Result<()> {
        let forge = Forge::open(config.clone())?;
        println!("{}", forge.model_summary());
        Ok(())
    }

    /// Records from a fixture file when given, otherwise the database
    fn load_records(config: &Config, fixture: Option<&str>) -> Result<Vec<MatchRecord>> {
        match fixture {
            Some(path) => read_fixture(path),
            None => {
                let db = Database::open(&config.data.database_path)?;
                db.all_matches()
            }
        }
    }

    /// A fixture file holds one match object or an array of them
    fn read_fixture(path: &str) -> Result<Vec<MatchRecord>> {
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Vec<MatchRecord>>(&content) {
            Ok(records) => Ok(records),
            Err(_) => Ok(vec![serde_json::from_str::<MatchRecord>(&content)?]),
        }
    }
}
