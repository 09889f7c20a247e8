//! Versioned on-disk model store
//!
//! One JSON artifact per model name, wrapped in an envelope carrying the
//! schema version and the encoder fingerprint. Loads reject a mismatch on
//! either instead of silently misaligning features. Writes go through a
//! temp file and rename, so a concurrent reader sees the old artifact or the
//! new one, never a torn file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::boosting::Booster;
use crate::features::EncoderSet;
use crate::{ForgeError, Result};

/// Artifact format version; bump on incompatible layout changes
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    Result,
    Score,
    Anomaly,
    Ensemble,
}

impl ModelKind {
    fn dir(&self) -> &'static str {
        match self {
            ModelKind::Ensemble => "ensembles",
            _ => "models",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModelKind::Result => "result",
            ModelKind::Score => "score",
            ModelKind::Anomaly => "anomaly",
            ModelKind::Ensemble => "ensemble",
        }
    }
}

/// Result-model artifact: classifier plus the encoders it was trained with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultModel {
    pub model: Booster,
    pub encoders: EncoderSet,
}

/// Score-model artifact: twin goal regressors plus the empirical score table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreModel {
    pub home: Booster,
    pub away: Booster,
    pub encoders: EncoderSet,
    /// Empirical frequency of each "h-a" score line in the training data
    pub distribution: BTreeMap<String, u32>,
}

/// Score statistics recorded when an anomaly model is trained
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnomalyMeta {
    pub mean: f32,
    pub std: f32,
    pub threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyModel {
    pub model: Booster,
    pub meta: AnomalyMeta,
    pub encoders: EncoderSet,
}

/// One member of an ensemble; `feature_subset` holds the column indices the
/// member was trained on, replayed at prediction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleMember {
    pub model: Booster,
    pub feature_subset: Option<Vec<usize>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleModel {
    pub members: Vec<EnsembleMember>,
    pub encoders: EncoderSet,
}

/// Any persistable model artifact
#[derive(Debug, Clone)]
pub enum StoredModel {
    Result(ResultModel),
    Score(ScoreModel),
    Anomaly(AnomalyModel),
    Ensemble(EnsembleModel),
}

impl StoredModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            StoredModel::Result(_) => ModelKind::Result,
            StoredModel::Score(_) => ModelKind::Score,
            StoredModel::Anomaly(_) => ModelKind::Anomaly,
            StoredModel::Ensemble(_) => ModelKind::Ensemble,
        }
    }

    pub fn encoders(&self) -> &EncoderSet {
        match self {
            StoredModel::Result(m) => &m.encoders,
            StoredModel::Score(m) => &m.encoders,
            StoredModel::Anomaly(m) => &m.encoders,
            StoredModel::Ensemble(m) => &m.encoders,
        }
    }

    fn payload(&self) -> Result<serde_json::Value> {
        let value = match self {
            StoredModel::Result(m) => serde_json::to_value(m)?,
            StoredModel::Score(m) => serde_json::to_value(m)?,
            StoredModel::Anomaly(m) => serde_json::to_value(m)?,
            StoredModel::Ensemble(m) => serde_json::to_value(m)?,
        };
        Ok(value)
    }

    fn from_payload(kind: ModelKind, payload: serde_json::Value) -> Result<Self> {
        let model = match kind {
            ModelKind::Result => StoredModel::Result(serde_json::from_value(payload)?),
            ModelKind::Score => StoredModel::Score(serde_json::from_value(payload)?),
            ModelKind::Anomaly => StoredModel::Anomaly(serde_json::from_value(payload)?),
            ModelKind::Ensemble => StoredModel::Ensemble(serde_json::from_value(payload)?),
        };
        Ok(model)
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    schema_version: u32,
    kind: ModelKind,
    encoder_fingerprint: u64,
    saved_at: String,
    payload: serde_json::Value,
}

/// Model registry with on-disk persistence.
///
/// The in-memory registry sits behind an `RwLock`: concurrent training of
/// the same name serializes on the write lock, and readers never observe a
/// partially inserted model.
pub struct ModelStore {
    root: PathBuf,
    registry: RwLock<HashMap<String, Arc<StoredModel>>>,
}

impl ModelStore {
    /// Open a store rooted at the given data directory
    pub fn open<P: AsRef<Path>>(data_path: P) -> Result<Self> {
        let root = data_path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("models"))?;
        std::fs::create_dir_all(root.join("ensembles"))?;
        Ok(ModelStore {
            root,
            registry: RwLock::new(HashMap::new()),
        })
    }

    fn registry_key(name: &str, kind: ModelKind) -> String {
        format!("{}/{}", kind.dir(), name)
    }

    fn path_for(&self, name: &str, kind: ModelKind) -> PathBuf {
        self.root.join(kind.dir()).join(format!("{}.json", name))
    }

    /// Insert a model and persist it atomically
    pub fn put(&self, name: &str, model: StoredModel) -> Result<()> {
        let kind = model.kind();
        let envelope = Envelope {
            schema_version: SCHEMA_VERSION,
            kind,
            encoder_fingerprint: model.encoders().fingerprint(),
            saved_at: chrono::Utc::now().to_rfc3339(),
            payload: model.payload()?,
        };
        let bytes = serde_json::to_vec(&envelope)?;

        let path = self.path_for(name, kind);
        let tmp = path.with_extension("json.tmp");
        {
            // Hold the write lock across the disk write so two same-name
            // trainings cannot interleave their rename with the insert
            let mut registry = self
                .registry
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            std::fs::write(&tmp, &bytes)?;
            std::fs::rename(&tmp, &path)?;
            registry.insert(Self::registry_key(name, kind), Arc::new(model));
        }
        log::info!("Saved {} model '{}'", kind.label(), name);
        Ok(())
    }

    /// Fetch a model from memory, falling back to disk
    pub fn get(&self, name: &str, kind: ModelKind) -> Result<Arc<StoredModel>> {
        let key = Self::registry_key(name, kind);
        {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(model) = registry.get(&key) {
                return Ok(Arc::clone(model));
            }
        }

        let path = self.path_for(name, kind);
        if !path.exists() {
            return Err(ForgeError::ModelNotFound(name.to_string()));
        }
        let model = Arc::new(self.load_file(name, &path)?);

        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        registry.insert(key, Arc::clone(&model));
        Ok(model)
    }

    /// Remove a model from the registry and disk; returns whether it existed
    pub fn delete(&self, name: &str, kind: ModelKind) -> Result<bool> {
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let in_memory = registry.remove(&Self::registry_key(name, kind)).is_some();

        let path = self.path_for(name, kind);
        let on_disk = path.exists();
        if on_disk {
            std::fs::remove_file(&path)?;
        }
        Ok(in_memory || on_disk)
    }

    /// Names and kinds of every registered model, sorted by name
    pub fn list(&self) -> Vec<(String, ModelKind)> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<(String, ModelKind)> = registry
            .iter()
            .map(|(key, model)| {
                let name = key.split_once('/').map(|(_, n)| n).unwrap_or(key);
                (name.to_string(), model.kind())
            })
            .collect();
        entries.sort();
        entries
    }

    /// Load every readable artifact from disk; unreadable files are logged
    /// and skipped. Returns the number of models loaded.
    pub fn load_all(&self) -> usize {
        let mut loaded = 0;
        for dir in ["models", "ensembles"] {
            let dir_path = self.root.join(dir);
            let entries = match std::fs::read_dir(&dir_path) {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("Cannot read {}: {}", dir_path.display(), e);
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                match self.load_file(name, &path) {
                    Ok(model) => {
                        let key = Self::registry_key(name, model.kind());
                        let mut registry = self
                            .registry
                            .write()
                            .unwrap_or_else(PoisonError::into_inner);
                        registry.insert(key, Arc::new(model));
                        loaded += 1;
                        log::info!("Loaded model '{}'", name);
                    }
                    Err(e) => log::error!("Failed to load model '{}': {}", name, e),
                }
            }
        }
        loaded
    }

    fn load_file(&self, name: &str, path: &Path) -> Result<StoredModel> {
        let bytes = std::fs::read(path)?;
        let envelope: Envelope = serde_json::from_slice(&bytes)?;

        if envelope.schema_version != SCHEMA_VERSION {
            return Err(ForgeError::SchemaVersion {
                expected: SCHEMA_VERSION,
                found: envelope.schema_version,
            });
        }

        let model = StoredModel::from_payload(envelope.kind, envelope.payload)?;
        let found = model.encoders().fingerprint();
        if found != envelope.encoder_fingerprint {
            return Err(ForgeError::EncoderMismatch {
                model: name.to_string(),
                expected: envelope.encoder_fingerprint,
                found,
            });
        }
        Ok(model)
    }
}
