//! icedrift: sea-ice buoy drift regression
//!
//! Predicts buoy drift (displacement and heading per observation interval)
//! from position, elapsed time and reanalysis covariates, then rolls the
//! prediction forward step by step to produce whole trajectories.
//!
//! ## Architecture
//!
//! - **Reanalysis**: gridded fields, kd-tree cell lookup, covariate sampling
//! - **Dataset**: buoy observation tables and training rows
//! - **ML Engine**: ridge, k-NN, random forest and gradient-boosted regressors
//! - **Predictor**: autoregressive rollout (sample → predict → propagate)
//! - **Harness**: grouped CV model selection, TPE tuning, held-out evaluation

pub mod config;
pub mod dataset;
pub mod features;
pub mod geodesy;
pub mod harness;
pub mod ml_engine;
pub mod predictor;
pub mod reanalysis;
pub mod tabular;
pub mod types;

// Re-export configuration
pub use config::{ConfigError, DriftConfig};

// Re-export commonly used types
pub use dataset::{BuoyTrack, DatasetError, ObservationTable, TrainingSet};
pub use features::FeatureLayout;
pub use types::{PredictionRecord, TrajectoryPoint};

// Re-export reanalysis components
pub use reanalysis::{CovariateSampler, FieldSet, GridError, GridField, SpatialIndex};

// Re-export models and rollout
pub use ml_engine::{ModelConfig, ModelError, ModelSpec, Regressor};
pub use predictor::IterativePredictor;

// Re-export harness entry points
pub use harness::{
    evaluate_holdout, select_model, tune, DriftContext, DriftMetrics, HarnessError, HoldoutReport,
    SelectionResult, TuningResult,
};
