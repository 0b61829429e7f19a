//! ML Engine: drift regressors
//!
//! Every model maps one feature row (see [`crate::features`]) to
//! `[displacement_m, heading_deg]` and is fitted from a [`TrainingSet`].
//! Models are plain immutable values once fitted, so a fitted model can be
//! shared across rollout threads.
//!
//! ## Architecture
//! - `scaler`: per-column standardization (Welford)
//! - `linear`: ridge regression (closed form, Gaussian elimination)
//! - `knn`: k-nearest neighbours, uniform or inverse-distance weights
//! - `tree`: two-output CART regression tree
//! - `forest`: bootstrap-aggregated trees, trained in parallel with rayon
//! - `boosting`: gradient-boosted trees on squared loss
//! - `search_space`: per-model hyperparameter domains for tuning

pub mod boosting;
pub mod forest;
pub mod knn;
pub mod linear;
pub mod scaler;
pub mod search_space;
pub mod tree;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::dataset::TrainingSet;

pub use boosting::GradientBoosting;
pub use forest::RandomForest;
pub use knn::KnnRegressor;
pub use linear::RidgeRegression;
pub use scaler::StandardScaler;
pub use search_space::{format_params, ParamDomain, ParamSet, ParamValue, SearchSpace};
pub use tree::{RegressionTree, TreeParams};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Training set is empty")]
    EmptyTrainingSet,

    #[error("Feature width mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Invalid hyperparameters: {0}")]
    InvalidParams(String),

    #[error("Normal equations are singular; increase alpha")]
    Singular,
}

// ============================================================================
// Regressor Trait
// ============================================================================

/// A fitted drift model.
///
/// `predict` returns `[displacement_m, heading_deg]`. Any non-finite input
/// yields `[NaN, NaN]`, which the rollout propagates as a missing position.
pub trait Regressor: Send + Sync {
    fn predict(&self, features: &[f64]) -> [f64; 2];

    /// Expected input width.
    fn n_features(&self) -> usize;
}

/// `[NaN, NaN]` when any input is non-finite or the width is wrong.
pub(crate) fn reject_input(features: &[f64], n_features: usize) -> Option<[f64; 2]> {
    if features.len() != n_features || features.iter().any(|v| !v.is_finite()) {
        Some([f64::NAN, f64::NAN])
    } else {
        None
    }
}

// ============================================================================
// Model Specifications
// ============================================================================

/// Neighbour weighting for k-NN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnnWeighting {
    Uniform,
    Distance,
}

impl KnnWeighting {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnnWeighting::Uniform => "uniform",
            KnnWeighting::Distance => "distance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uniform" => Some(KnnWeighting::Uniform),
            "distance" => Some(KnnWeighting::Distance),
            _ => None,
        }
    }
}

/// A regressor family with its hyperparameters.
///
/// In TOML the family is the `kind` key:
///
/// ```toml
/// [[models]]
/// name = "forest"
/// kind = "random_forest"
/// n_trees = 200
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    Ridge {
        alpha: f64,
    },
    Knn {
        k: usize,
        weighting: KnnWeighting,
    },
    RandomForest {
        n_trees: usize,
        max_depth: usize,
        min_samples_leaf: usize,
        /// Fraction of features considered at each split, in (0, 1].
        max_features: f64,
    },
    GradientBoosting {
        n_estimators: usize,
        learning_rate: f64,
        max_depth: usize,
        min_samples_leaf: usize,
        /// Row fraction drawn (without replacement) per stage, in (0, 1].
        subsample: f64,
    },
}

impl ModelSpec {
    /// Family name as used in config and output tables.
    pub fn kind(&self) -> &'static str {
        match self {
            ModelSpec::Ridge { .. } => "ridge",
            ModelSpec::Knn { .. } => "knn",
            ModelSpec::RandomForest { .. } => "random_forest",
            ModelSpec::GradientBoosting { .. } => "gradient_boosting",
        }
    }

    /// Hyperparameter range errors; empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        match *self {
            ModelSpec::Ridge { alpha } => {
                if !alpha.is_finite() || alpha < 0.0 {
                    errors.push(format!("ridge alpha must be a finite value >= 0, got {alpha}"));
                }
            }
            ModelSpec::Knn { k, .. } => {
                if k == 0 {
                    errors.push("knn k must be >= 1".to_string());
                }
            }
            ModelSpec::RandomForest {
                n_trees,
                max_depth,
                min_samples_leaf,
                max_features,
            } => {
                if n_trees == 0 {
                    errors.push("random_forest n_trees must be >= 1".to_string());
                }
                if max_depth == 0 {
                    errors.push("random_forest max_depth must be >= 1".to_string());
                }
                if min_samples_leaf == 0 {
                    errors.push("random_forest min_samples_leaf must be >= 1".to_string());
                }
                if !(max_features > 0.0 && max_features <= 1.0) {
                    errors.push(format!("random_forest max_features must be in (0, 1], got {max_features}"));
                }
            }
            ModelSpec::GradientBoosting {
                n_estimators,
                learning_rate,
                max_depth,
                min_samples_leaf,
                subsample,
            } => {
                if n_estimators == 0 {
                    errors.push("gradient_boosting n_estimators must be >= 1".to_string());
                }
                if !(learning_rate > 0.0 && learning_rate <= 1.0) {
                    errors.push(format!("gradient_boosting learning_rate must be in (0, 1], got {learning_rate}"));
                }
                if max_depth == 0 {
                    errors.push("gradient_boosting max_depth must be >= 1".to_string());
                }
                if min_samples_leaf == 0 {
                    errors.push("gradient_boosting min_samples_leaf must be >= 1".to_string());
                }
                if !(subsample > 0.0 && subsample <= 1.0) {
                    errors.push(format!("gradient_boosting subsample must be in (0, 1], got {subsample}"));
                }
            }
        }
        errors
    }

    /// Fit this specification. `seed` drives every random choice.
    pub fn fit(&self, data: &TrainingSet, seed: u64) -> Result<Box<dyn Regressor>, ModelError> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(ModelError::InvalidParams(errors.join("; ")));
        }
        if data.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        if let Some(bad) = data.features.iter().find(|r| r.len() != data.n_features()) {
            return Err(ModelError::DimensionMismatch {
                expected: data.n_features(),
                got: bad.len(),
            });
        }
        debug!(kind = self.kind(), rows = data.len(), "Fitting model");

        let model: Box<dyn Regressor> = match *self {
            ModelSpec::Ridge { alpha } => Box::new(RidgeRegression::fit(data, alpha)?),
            ModelSpec::Knn { k, weighting } => Box::new(KnnRegressor::fit(data, k, weighting)),
            ModelSpec::RandomForest {
                n_trees,
                max_depth,
                min_samples_leaf,
                max_features,
            } => Box::new(RandomForest::fit(
                data,
                n_trees,
                TreeParams {
                    max_depth,
                    min_samples_leaf,
                    max_features: features_for_fraction(max_features, data.n_features()),
                },
                seed,
            )),
            ModelSpec::GradientBoosting {
                n_estimators,
                learning_rate,
                max_depth,
                min_samples_leaf,
                subsample,
            } => Box::new(GradientBoosting::fit(
                data,
                n_estimators,
                learning_rate,
                TreeParams {
                    max_depth,
                    min_samples_leaf,
                    max_features: data.n_features(),
                },
                subsample,
                seed,
            )),
        };
        Ok(model)
    }
}

/// Number of features to try per split for a fraction in (0, 1].
fn features_for_fraction(fraction: f64, n_features: usize) -> usize {
    ((fraction * n_features as f64).ceil() as usize).clamp(1, n_features.max(1))
}

/// A named menu entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(flatten)]
    pub spec: ModelSpec,
}
