//! Categorical encoders fitted at training time and replayed at prediction time

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Code assigned to a categorical value the encoder has never seen
pub const UNSEEN: i64 = -1;

/// Maps each distinct categorical value to an integer code.
///
/// Classes are sorted before codes are assigned, so the mapping depends only
/// on the set of values, not on row order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
    codes: BTreeMap<String, i64>,
}

impl LabelEncoder {
    /// Fit the encoder on the distinct values of a column
    pub fn fit<'a, I: IntoIterator<Item = &'a str>>(values: I) -> Self {
        let mut classes: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
        classes.sort();
        classes.dedup();

        let codes = classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i as i64))
            .collect();

        LabelEncoder { classes, codes }
    }

    /// Encode a value; unseen values map to the [`UNSEEN`] sentinel
    pub fn encode(&self, value: &str) -> i64 {
        self.codes.get(value).copied().unwrap_or(UNSEEN)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Maps each distinct categorical value to an indicator vector.
///
/// Unknown values encode as an all-zero block rather than failing, matching
/// how prediction requests may carry competitions never seen in training.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    categories: Vec<String>,
}

impl OneHotEncoder {
    pub fn fit<'a, I: IntoIterator<Item = &'a str>>(values: I) -> Self {
        let mut categories: Vec<String> = values.into_iter().map(|v| v.to_string()).collect();
        categories.sort();
        categories.dedup();
        OneHotEncoder { categories }
    }

    /// Encode a value into an indicator block of [`width`](Self::width) columns
    pub fn encode(&self, value: Option<&str>) -> Vec<f32> {
        let mut block = vec![0.0; self.categories.len()];
        if let Some(value) = value {
            if let Ok(i) = self.categories.binary_search_by(|c| c.as_str().cmp(value)) {
                block[i] = 1.0;
            }
        }
        block
    }

    pub fn width(&self) -> usize {
        self.categories.len()
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }
}

/// Everything needed to rebuild a model's feature matrix: the fitted encoders
/// and the exact column schema recorded at training time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncoderSet {
    pub labels: BTreeMap<String, LabelEncoder>,
    pub onehot: BTreeMap<String, OneHotEncoder>,
    /// Ordered feature column names; prediction replays this schema verbatim
    pub columns: Vec<String>,
}

impl EncoderSet {
    /// Stable fingerprint over the encoders and column schema.
    ///
    /// Persisted with every model; a mismatch at load time means the model
    /// was trained against a different feature layout and must be rejected.
    pub fn fingerprint(&self) -> u64 {
        let mut hash = Fnv1a::new();
        for (name, encoder) in &self.labels {
            hash.update(b"label");
            hash.update(name.as_bytes());
            for class in encoder.classes() {
                hash.update(class.as_bytes());
            }
        }
        for (name, encoder) in &self.onehot {
            hash.update(b"onehot");
            hash.update(name.as_bytes());
            for category in encoder.categories() {
                hash.update(category.as_bytes());
            }
        }
        for column in &self.columns {
            hash.update(b"column");
            hash.update(column.as_bytes());
        }
        hash.finish()
    }
}

/// FNV-1a, 64-bit. `DefaultHasher` is not guaranteed stable across Rust
/// releases, and the fingerprint must survive in on-disk artifacts.
/// Also used for the tuner's content-hash cache key.
pub(crate) struct Fnv1a(u64);

impl Fnv1a {
    pub(crate) fn new() -> Self {
        Fnv1a(0xcbf2_9ce4_8422_2325)
    }

    pub(crate) fn update(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(0x0000_0100_0000_01b3);
        }
        // Separator so ("ab","c") and ("a","bc") hash differently
        self.0 ^= 0xff;
        self.0 = self.0.wrapping_mul(0x0000_0100_0000_01b3);
    }

    pub(crate) fn finish(&self) -> u64 {
        self.0
    }
}
