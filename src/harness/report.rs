//! Result tables written to the output directory.
//!
//! CSV tables use a header row and `,` separators; missing predictions are
//! written as empty fields. Summaries are pretty-printed JSON.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use super::selection::{ModelComparison, SelectionResult};
use super::tuning::TuningResult;
use crate::config::defaults;
use crate::ml_engine::ParamSet;
use crate::tabular::{csv_escape, format_timestamp};
use crate::types::PredictionRecord;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ReportError + '_ {
    move |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Finite values as-is, anything else as an empty field.
fn num(v: f64) -> String {
    if v.is_finite() {
        v.to_string()
    } else {
        String::new()
    }
}

fn write_rows(path: &Path, header: &[&str], rows: impl IntoIterator<Item = Vec<String>>) -> Result<(), ReportError> {
    let file = File::create(path).map_err(io_err(path))?;
    let mut out = BufWriter::new(file);
    let write = || -> io::Result<()> {
        writeln!(out, "{}", header.join(","))?;
        for row in rows {
            let escaped: Vec<String> = row.iter().map(|f| csv_escape(f)).collect();
            writeln!(out, "{}", escaped.join(","))?;
        }
        out.flush()
    };
    write().map_err(io_err(path))
}

/// Rollout records, optionally with the great-circle error column.
pub fn write_predictions(path: &Path, records: &[PredictionRecord], with_distance: bool) -> Result<(), ReportError> {
    let mut header = vec![
        "BuoyID",
        "datetime",
        "step",
        "true_latitude",
        "true_longitude",
        "predicted_latitude",
        "predicted_longitude",
    ];
    if with_distance {
        header.push("distance_error_km");
    }
    let rows = records.iter().map(|r| {
        let mut row = vec![
            r.buoy_id.clone(),
            format_timestamp(r.timestamp),
            r.step.to_string(),
            num(r.true_latitude),
            num(r.true_longitude),
            num(r.predicted_latitude),
            num(r.predicted_longitude),
        ];
        if with_distance {
            row.push(num(r.distance_error_km()));
        }
        row
    });
    write_rows(path, &header, rows)
}

pub fn write_comparison(path: &Path, comparisons: &[ModelComparison]) -> Result<(), ReportError> {
    let header = [
        "model",
        "kind",
        "mean_rmse",
        "std_rmse",
        "folds_scored",
        "folds_skipped",
        "fit_secs",
        "rollout_secs",
    ];
    let rows = comparisons.iter().map(|c| {
        vec![
            c.model.clone(),
            c.kind.clone(),
            num(c.mean_rmse),
            num(c.std_rmse),
            c.folds_scored.to_string(),
            c.folds_skipped.to_string(),
            format!("{:.3}", c.fit_secs),
            format!("{:.3}", c.rollout_secs),
        ]
    });
    write_rows(path, &header, rows)
}

/// One row per trial number, failed trials included with their error.
pub fn write_trials(path: &Path, result: &TuningResult) -> Result<(), ReportError> {
    let param_names: Vec<String> = result.best.params.keys().cloned().collect();
    let mut header = vec!["trial", "state", "mean_rmse", "std_rmse", "folds_scored", "duration_secs"];
    header.extend(param_names.iter().map(String::as_str));
    header.push("error");

    let params_row = |p: &ParamSet| -> Vec<String> {
        param_names
            .iter()
            .map(|n| p.get(n).map(|v| v.to_string()).unwrap_or_default())
            .collect()
    };

    let mut rows: Vec<(usize, Vec<String>)> = result
        .trials
        .iter()
        .map(|t| {
            let mut row = vec![
                t.number.to_string(),
                "complete".to_string(),
                num(t.mean_rmse),
                num(t.std_rmse),
                t.folds_scored.to_string(),
                format!("{:.3}", t.duration_secs),
            ];
            row.extend(params_row(&t.params));
            row.push(String::new());
            (t.number, row)
        })
        .collect();
    for (number, error) in &result.failed {
        let mut row = vec![number.to_string(), "failed".to_string()];
        row.extend(std::iter::repeat(String::new()).take(4 + param_names.len()));
        row.push(error.clone());
        rows.push((*number, row));
    }
    rows.sort_by_key(|(n, _)| *n);
    write_rows(path, &header, rows.into_iter().map(|(_, r)| r))
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ReportError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| ReportError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(io_err(path))
}

// ============================================================================
// Output Directory
// ============================================================================

/// Writes the standard result files into one directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    /// Create `dir` (and parents) if needed.
    pub fn create(dir: &Path) -> Result<Self, ReportError> {
        fs::create_dir_all(dir).map_err(io_err(dir))?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Comparison table plus `fold_<model>_<k>.csv` for every fold that kept
    /// its records.
    pub fn selection(&self, result: &SelectionResult) -> Result<(), ReportError> {
        let path = self.path(defaults::MODEL_COMPARISON_FILE);
        write_comparison(&path, &result.comparisons)?;
        info!(path = %path.display(), models = result.comparisons.len(), "Wrote model comparison");

        let mut written = 0usize;
        for (model, folds) in &result.folds {
            for fold in folds.iter().filter(|f| !f.records.is_empty()) {
                let name = format!("fold_{}_{}.csv", sanitize(model), fold.fold);
                write_predictions(&self.path(&name), &fold.records, false)?;
                written += 1;
            }
        }
        if written > 0 {
            info!(dir = %self.dir.display(), tables = written, "Wrote fold prediction tables");
        }
        Ok(())
    }

    pub fn tuning(&self, result: &TuningResult) -> Result<(), ReportError> {
        let path = self.path(defaults::TUNING_TRIALS_FILE);
        write_trials(&path, result)?;
        info!(path = %path.display(), trials = result.trials.len() + result.failed.len(), "Wrote tuning trials");
        Ok(())
    }

    pub fn best_model<T: Serialize + ?Sized>(&self, model: &T) -> Result<PathBuf, ReportError> {
        let path = self.path(defaults::BEST_MODEL_FILE);
        write_json(&path, model)?;
        Ok(path)
    }

    pub fn holdout(&self, report: &super::HoldoutReport) -> Result<(), ReportError> {
        let predictions = self.path(defaults::HOLDOUT_PREDICTIONS_FILE);
        write_predictions(&predictions, &report.records, true)?;
        let metrics = self.path(defaults::HOLDOUT_METRICS_FILE);
        write_json(&metrics, report)?;
        info!(
            predictions = %predictions.display(),
            metrics = %metrics.display(),
            "Wrote held-out results"
        );
        Ok(())
    }
}

/// Model names as file-name fragments.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
