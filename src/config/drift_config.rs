//! Drift Configuration - every pipeline knob as a TOML value
//!
//! Each section struct implements `Default` so an empty or partial file
//! still yields a runnable configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;
use crate::harness::report::sanitize;
use crate::ml_engine::{KnnWeighting, ModelConfig, ModelSpec};

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one drift-modelling run.
///
/// Load with `DriftConfig::load()` which searches:
/// 1. an explicit path (the `--config` CLI flag)
/// 2. `$ICEDRIFT_CONFIG`
/// 3. `./icedrift.toml`
/// 4. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Buoy observation table
    #[serde(default)]
    pub data: DataConfig,

    /// Reanalysis grids and lookup tolerances
    #[serde(default)]
    pub reanalysis: ReanalysisConfig,

    /// Grouped cross-validation
    #[serde(default)]
    pub cv: CvConfig,

    /// Candidate regressor menu, compared in order
    #[serde(default = "default_models")]
    pub models: Vec<ModelConfig>,

    /// Hyperparameter search
    #[serde(default)]
    pub tuning: TuningConfig,

    /// Final held-out evaluation
    #[serde(default)]
    pub evaluation: EvaluationConfig,

    /// Output tables
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            reanalysis: ReanalysisConfig::default(),
            cv: CvConfig::default(),
            models: default_models(),
            tuning: TuningConfig::default(),
            evaluation: EvaluationConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl DriftConfig {
    /// Load configuration using the standard search order:
    /// 1. `explicit` path, if given (errors are returned, not swallowed)
    /// 2. `$ICEDRIFT_CONFIG` environment variable
    /// 3. `./icedrift.toml` in the current working directory
    /// 4. Built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        // 1. Explicit path
        if let Some(path) = explicit {
            let config = Self::load_from_file(path)?;
            info!(path = %path.display(), "Loaded drift config");
            return Ok(config);
        }

        // 2. Check env var
        if let Ok(path) = std::env::var(defaults::CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded drift config from {}", defaults::CONFIG_ENV_VAR);
                        return Ok(config);
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", defaults::CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", defaults::CONFIG_ENV_VAR);
            }
        }

        // 3. Check ./icedrift.toml
        let local = PathBuf::from(defaults::LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded drift config from ./{}", defaults::LOCAL_CONFIG_FILE);
                    return Ok(config);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", defaults::LOCAL_CONFIG_FILE);
                }
            }
        }

        // 4. Defaults
        info!("No {} found, using built-in defaults", defaults::LOCAL_CONFIG_FILE);
        Ok(Self::default())
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    ///
    /// Unknown keys are reported as warnings; they never fail the load.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let typo_warnings = super::validation::validate_unknown_keys(contents);
        for w in &typo_warnings {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Save config to a file (the effective config is written next to run outputs).
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Drift config saved");
        Ok(())
    }

    /// Look up a menu entry by name.
    pub fn model(&self, name: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Validate all settings for internal consistency.
    ///
    /// Rules:
    /// - At least two CV folds
    /// - Model menu non-empty with unique names, also after file-name sanitizing
    /// - Reanalysis variable names unique and non-empty
    /// - Tuning trial counts and quantile within range
    /// - Every float finite
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.cv.n_splits < 2 {
            errors.push(format!("cv.n_splits must be >= 2, got {}", self.cv.n_splits));
        }

        if self.models.is_empty() {
            errors.push("models: at least one candidate model is required".to_string());
        }
        for (i, m) in self.models.iter().enumerate() {
            if m.name.trim().is_empty() {
                errors.push(format!("models[{i}].name must not be empty"));
            }
            if self.models[..i].iter().any(|other| other.name == m.name) {
                errors.push(format!("models: duplicate model name '{}'", m.name));
            } else if let Some(other) = self.models[..i]
                .iter()
                .find(|other| sanitize(&other.name) == sanitize(&m.name))
            {
                errors.push(format!(
                    "models: '{}' and '{}' would share fold output files (fold_{}_<k>.csv)",
                    other.name,
                    m.name,
                    sanitize(&m.name)
                ));
            }
            for e in m.spec.validate() {
                errors.push(format!("models[{}] ({}): {e}", i, m.name));
            }
        }

        let r = &self.reanalysis;
        if !r.time_tolerance_hours.is_finite() || r.time_tolerance_hours < 0.0 {
            errors.push(format!(
                "reanalysis.time_tolerance_hours must be a finite value >= 0, got {}",
                r.time_tolerance_hours
            ));
        }
        for (i, v) in r.variables.iter().enumerate() {
            if v.name.trim().is_empty() {
                errors.push(format!("reanalysis.variables[{i}].name must not be empty"));
            }
            if v.path.as_os_str().is_empty() {
                errors.push(format!("reanalysis.variables[{i}].path must not be empty"));
            }
            if r.variables[..i].iter().any(|other| other.name == v.name) {
                errors.push(format!("reanalysis.variables: duplicate variable '{}'", v.name));
            }
        }

        let t = &self.tuning;
        if t.n_trials == 0 {
            errors.push("tuning.n_trials must be > 0".to_string());
        }
        if t.n_startup_trials == 0 {
            errors.push("tuning.n_startup_trials must be > 0".to_string());
        }
        if !(t.gamma > 0.0 && t.gamma < 1.0) {
            errors.push(format!("tuning.gamma must be in (0, 1), got {}", t.gamma));
        }
        if t.n_candidates == 0 {
            errors.push("tuning.n_candidates must be > 0".to_string());
        }
        if t.parallelism == 0 {
            errors.push("tuning.parallelism must be > 0".to_string());
        }

        let e = &self.evaluation;
        if e.holdout_count == 0 && e.holdout_buoys.is_empty() {
            errors.push("evaluation: holdout_count must be > 0 when holdout_buoys is empty".to_string());
        }

        // Range warnings (non-fatal)
        let (range_errors, range_warnings) = super::validation::validate_ranges(self);
        errors.extend(range_errors);
        for w in &range_warnings {
            warn!("{}", w);
        }

        // Reject NaN/Inf in any config value (sweep all f64 fields via serialization)
        if let Ok(ref s) = toml::to_string(self) {
            let non_finite = ["= nan", "= inf", "= -inf", "= +inf", "= -nan"];
            if non_finite.iter().any(|pat| s.contains(pat)) {
                errors.push("Config contains NaN or Inf values; all numbers must be finite".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Observation Table
// ============================================================================

/// Buoy observation table location and column names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// CSV file with one row per buoy fix.
    #[serde(default = "default_observations_path")]
    pub observations_path: PathBuf,

    #[serde(default = "default_buoy_id_column")]
    pub buoy_id_column: String,

    #[serde(default = "default_latitude_column")]
    pub latitude_column: String,

    #[serde(default = "default_longitude_column")]
    pub longitude_column: String,

    #[serde(default = "default_time_column")]
    pub time_column: String,

    /// Metres travelled from this fix to the next one.
    #[serde(default = "default_displacement_column")]
    pub displacement_column: String,

    /// Bearing (degrees from north) from this fix to the next one.
    #[serde(default = "default_heading_column")]
    pub heading_column: String,

    /// Fill missing or non-finite targets from consecutive positions.
    #[serde(default = "default_true")]
    pub derive_missing_targets: bool,
}

fn default_observations_path() -> PathBuf { PathBuf::from("data/buoys.csv") }
fn default_buoy_id_column() -> String { "BuoyID".to_string() }
fn default_latitude_column() -> String { "Latitude".to_string() }
fn default_longitude_column() -> String { "Longitude".to_string() }
fn default_time_column() -> String { "datetime".to_string() }
fn default_displacement_column() -> String { "displacement".to_string() }
fn default_heading_column() -> String { "heading".to_string() }
fn default_true() -> bool { true }

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            observations_path: default_observations_path(),
            buoy_id_column: default_buoy_id_column(),
            latitude_column: default_latitude_column(),
            longitude_column: default_longitude_column(),
            time_column: default_time_column(),
            displacement_column: default_displacement_column(),
            heading_column: default_heading_column(),
            derive_missing_targets: default_true(),
        }
    }
}

// ============================================================================
// Reanalysis
// ============================================================================

/// Gridded reanalysis inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReanalysisConfig {
    /// How far outside a field's first/last time slice a query may fall
    /// before the sampler returns the missing sentinel.
    #[serde(default = "default_time_tolerance_hours")]
    pub time_tolerance_hours: f64,

    /// One archive per environmental variable. Variable names double as the
    /// covariate column names in the observation table.
    #[serde(default)]
    pub variables: Vec<VariableConfig>,
}

fn default_time_tolerance_hours() -> f64 { defaults::TIME_TOLERANCE_HOURS }

impl Default for ReanalysisConfig {
    fn default() -> Self {
        Self {
            time_tolerance_hours: default_time_tolerance_hours(),
            variables: Vec::new(),
        }
    }
}

impl ReanalysisConfig {
    /// Tolerance in whole seconds.
    pub fn time_tolerance_secs(&self) -> i64 {
        (self.time_tolerance_hours * 3600.0).round() as i64
    }
}

/// A single reanalysis variable archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableConfig {
    /// Variable name (also the covariate column in the observation table).
    pub name: String,

    /// Grid archive: NetCDF, or long-form CSV for `.csv`/`.txt` paths.
    pub path: PathBuf,

    /// Vertical level to keep when the archive carries a level axis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
}

// ============================================================================
// Cross-Validation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvConfig {
    /// Number of grouped folds.
    #[serde(default = "default_n_splits")]
    pub n_splits: usize,
}

fn default_n_splits() -> usize { defaults::CV_SPLITS }

impl Default for CvConfig {
    fn default() -> Self {
        Self { n_splits: default_n_splits() }
    }
}

// ============================================================================
// Model Menu
// ============================================================================

fn default_models() -> Vec<ModelConfig> {
    vec![
        ModelConfig {
            name: "ridge".to_string(),
            spec: ModelSpec::Ridge { alpha: 1.0 },
        },
        ModelConfig {
            name: "knn".to_string(),
            spec: ModelSpec::Knn {
                k: 10,
                weighting: KnnWeighting::Distance,
            },
        },
        ModelConfig {
            name: "random_forest".to_string(),
            spec: ModelSpec::RandomForest {
                n_trees: 100,
                max_depth: 12,
                min_samples_leaf: 2,
                max_features: 0.6,
            },
        },
        ModelConfig {
            name: "gradient_boosting".to_string(),
            spec: ModelSpec::GradientBoosting {
                n_estimators: 200,
                learning_rate: 0.05,
                max_depth: 4,
                min_samples_leaf: 5,
                subsample: 0.8,
            },
        },
    ]
}

// ============================================================================
// Tuning
// ============================================================================

/// Tree-structured Parzen estimator search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Total trials to run (failed trials count toward this).
    #[serde(default = "default_n_trials")]
    pub n_trials: usize,

    /// Trials sampled uniformly before the Parzen estimators take over.
    #[serde(default = "default_n_startup_trials")]
    pub n_startup_trials: usize,

    /// Fraction of completed trials treated as "good" when fitting l(x).
    #[serde(default = "default_gamma")]
    pub gamma: f64,

    /// Candidates drawn from l(x) per suggestion.
    #[serde(default = "default_n_candidates")]
    pub n_candidates: usize,

    /// Trials evaluated concurrently per batch.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_n_trials() -> usize { 40 }
fn default_n_startup_trials() -> usize { 10 }
fn default_gamma() -> f64 { 0.25 }
fn default_n_candidates() -> usize { 24 }
fn default_parallelism() -> usize { 4 }
fn default_seed() -> u64 { defaults::DEFAULT_SEED }

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            n_trials: default_n_trials(),
            n_startup_trials: default_n_startup_trials(),
            gamma: default_gamma(),
            n_candidates: default_n_candidates(),
            parallelism: default_parallelism(),
            seed: default_seed(),
        }
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// Final held-out evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Buoys drawn at random (with `seed`) when `holdout_buoys` is empty.
    #[serde(default = "default_holdout_count")]
    pub holdout_count: usize,

    /// Explicit held-out buoy ids; takes precedence over `holdout_count`.
    #[serde(default)]
    pub holdout_buoys: Vec<String>,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_holdout_count() -> usize { 3 }

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            holdout_count: default_holdout_count(),
            holdout_buoys: Vec::new(),
            seed: default_seed(),
        }
    }
}

// ============================================================================
// Output
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving all result tables.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// Write one prediction table per (model, fold) during selection.
    #[serde(default = "default_true")]
    pub write_fold_predictions: bool,
}

fn default_output_dir() -> PathBuf { PathBuf::from("output") }

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            write_fold_predictions: default_true(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
