//! System-wide default constants.
//!
//! Centralises magic numbers that were previously scattered across the codebase.
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Config Loading
// ============================================================================

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "ICEDRIFT_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "icedrift.toml";

/// Seed shared by tuning and holdout selection unless overridden.
pub const DEFAULT_SEED: u64 = 42;

// ============================================================================
// Reanalysis
// ============================================================================

/// Query times further than this outside a field's time axis sample as missing.
///
/// Reanalysis products are typically hourly to six-hourly.
pub const TIME_TOLERANCE_HOURS: f64 = 3.0;

/// Latitude beyond which degree-space nearest-neighbour distance is a poor
/// stand-in for geodesic distance.
pub const POLAR_DISTORTION_LATITUDE: f64 = 60.0;

// ============================================================================
// Harness
// ============================================================================

/// Grouped cross-validation folds.
pub const CV_SPLITS: usize = 5;

/// Minimum observations a buoy needs to contribute a training step.
pub const MIN_TRACK_LENGTH: usize = 2;

// ============================================================================
// Output File Names
// ============================================================================

pub const MODEL_COMPARISON_FILE: &str = "model_comparison.csv";
pub const TUNING_TRIALS_FILE: &str = "tuning_trials.csv";
pub const BEST_MODEL_FILE: &str = "best_model.json";
pub const HOLDOUT_PREDICTIONS_FILE: &str = "holdout_predictions.csv";
pub const HOLDOUT_METRICS_FILE: &str = "holdout_metrics.json";
pub const EFFECTIVE_CONFIG_FILE: &str = "effective_config.toml";
