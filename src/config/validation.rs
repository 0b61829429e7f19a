//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.
//!
//! Arrays of tables (`[[models]]`, `[[reanalysis.variables]]`) are checked
//! as a whole; their entries are validated by serde and `DriftConfig::validate`.

use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for DriftConfig.
///
/// Maintained by hand to match the struct hierarchy in drift_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [data]
        "data",
        "data.observations_path",
        "data.buoy_id_column",
        "data.latitude_column",
        "data.longitude_column",
        "data.time_column",
        "data.displacement_column",
        "data.heading_column",
        "data.derive_missing_targets",
        // [reanalysis]
        "reanalysis",
        "reanalysis.time_tolerance_hours",
        "reanalysis.variables",
        // [cv]
        "cv",
        "cv.n_splits",
        // [[models]]
        "models",
        // [tuning]
        "tuning",
        "tuning.n_trials",
        "tuning.n_startup_trials",
        "tuning.gamma",
        "tuning.n_candidates",
        "tuning.parallelism",
        "tuning.seed",
        // [evaluation]
        "evaluation",
        "evaluation.holdout_count",
        "evaluation.holdout_buoys",
        "evaluation.seed",
        // [output]
        "output",
        "output.dir",
        "output.write_fold_predictions",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
///
/// Ties resolve to the lexicographically smallest key so suggestions are stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for &k in known {
        let dist = levenshtein(unknown, k);
        if dist > 3 {
            continue;
        }
        best = match best {
            Some((bk, bd)) if bd < dist || (bd == dist && bk <= k) => Some((bk, bd)),
            _ => Some((k, dist)),
        };
    }
    best.map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys, it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    let found = walk_toml_keys(&value, "");
    let mut warnings = Vec::new();

    for key in &found {
        if !known.contains(key.as_str()) {
            let suggestion = suggest_correction(key, &known);
            let message = format!("Unknown config key '{key}'");
            warnings.push(ValidationWarning {
                field: key.clone(),
                message,
                suggestion,
            });
        }
    }

    warnings
}

// ============================================================================
// Range Validation
// ============================================================================

/// Validate value ranges on a parsed DriftConfig.
///
/// Returns (errors, warnings). Errors are impossible settings that must
/// prevent the run; warnings are suspicious but not fatal.
pub fn validate_ranges(config: &super::DriftConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let t = &config.tuning;
    if t.n_startup_trials > t.n_trials {
        warnings.push(ValidationWarning {
            field: "tuning.n_startup_trials".to_string(),
            message: format!(
                "tuning.n_startup_trials = {} exceeds n_trials = {}; the search will be purely random",
                t.n_startup_trials, t.n_trials
            ),
            suggestion: None,
        });
    }

    // A tolerance above a week means almost any query silently maps to an edge slice
    let tol = config.reanalysis.time_tolerance_hours;
    if tol.is_finite() && tol > 168.0 {
        warnings.push(ValidationWarning {
            field: "reanalysis.time_tolerance_hours".to_string(),
            message: format!(
                "time_tolerance_hours = {tol:.1} is unusually large (> 168 h)"
            ),
            suggestion: None,
        });
    }

    let e = &config.evaluation;
    if e.holdout_buoys.iter().any(|b| b.trim().is_empty()) {
        errors.push("evaluation.holdout_buoys must not contain empty ids".to_string());
    }

    if config.data.buoy_id_column.trim().is_empty()
        || config.data.latitude_column.trim().is_empty()
        || config.data.longitude_column.trim().is_empty()
        || config.data.time_column.trim().is_empty()
    {
        errors.push("data: id, latitude, longitude and time column names must not be empty".to_string());
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================
