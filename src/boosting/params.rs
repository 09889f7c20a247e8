//! Training objectives and hyperparameters

use serde::{Deserialize, Serialize};

use crate::{ForgeError, Result};

/// Loss the booster minimizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Objective {
    /// Plain regression on the identity link
    SquaredError,
    /// Count regression on the log link; predictions are returned in mean space
    Poisson,
    /// Multiclass classification; predictions are softmax probabilities
    Softprob { classes: usize },
}

impl Objective {
    /// Number of parallel outputs (trees per round)
    pub fn outputs(&self) -> usize {
        match self {
            Objective::SquaredError | Objective::Poisson => 1,
            Objective::Softprob { classes } => *classes,
        }
    }

    pub fn is_classification(&self) -> bool {
        matches!(self, Objective::Softprob { .. })
    }

    /// Stable tag, used in cache keys and log lines
    pub fn tag(&self) -> String {
        match self {
            Objective::SquaredError => "squared_error".to_string(),
            Objective::Poisson => "poisson".to_string(),
            Objective::Softprob { classes } => format!("softprob:{}", classes),
        }
    }
}

/// Boosting hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostParams {
    pub objective: Objective,
    pub n_rounds: usize,
    pub learning_rate: f32,
    pub max_depth: usize,
    pub min_child_weight: f32,
    /// Row fraction sampled per round
    pub subsample: f32,
    /// Column fraction sampled per tree
    pub colsample: f32,
    /// Minimum gain required to keep a split
    pub gamma: f32,
    /// L2 regularization on leaf weights
    pub lambda: f32,
    pub seed: u64,
}

impl Default for BoostParams {
    fn default() -> Self {
        BoostParams {
            objective: Objective::SquaredError,
            n_rounds: 100,
            learning_rate: 0.1,
            max_depth: 5,
            min_child_weight: 1.0,
            subsample: 0.8,
            colsample: 0.8,
            gamma: 0.0,
            lambda: 1.0,
            seed: 42,
        }
    }
}

impl BoostParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_rounds == 0 {
            return Err(ForgeError::InvalidParameter(
                "n_rounds must be at least 1".to_string(),
            ));
        }
        if self.max_depth == 0 {
            return Err(ForgeError::InvalidParameter(
                "max_depth must be at least 1".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0) {
            return Err(ForgeError::InvalidParameter(
                "learning_rate must be positive".to_string(),
            ));
        }
        for (name, value) in [("subsample", self.subsample), ("colsample", self.colsample)] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ForgeError::InvalidParameter(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }
        if let Objective::Softprob { classes } = self.objective {
            if classes < 2 {
                return Err(ForgeError::InvalidParameter(
                    "softprob requires at least 2 classes".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(BoostParams::default().validate().is_ok());
    }

    #[test]
    fn test_bad_subsample_rejected() {
        let params = BoostParams {
            subsample: 0.0,
            ..BoostParams::default()
        };
        assert!(params.validate().is_err());

        let params = BoostParams {
            subsample: 1.5,
            ..BoostParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_softprob_needs_two_classes() {
        let params = BoostParams {
            objective: Objective::Softprob { classes: 1 },
            ..BoostParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_objective_outputs() {
        assert_eq!(Objective::SquaredError.outputs(), 1);
        assert_eq!(Objective::Poisson.outputs(), 1);
        assert_eq!(Objective::Softprob { classes: 3 }.outputs(), 3);
        assert_eq!(Objective::Softprob { classes: 3 }.tag(), "softprob:3");
    }
}
