//! Feature engineering: categorical encoding and matrix construction

pub mod encoding;
pub mod engineer;

pub use encoding::{EncoderSet, LabelEncoder, OneHotEncoder};
pub use engineer::{FeatureEngineer, FeatureMatrix, PreprocessMode, Preprocessed};
