//! Model selection, tuning and evaluation harness.
//!
//! Every stage scores a model the same way: fit on whole training buoys,
//! roll the fitted model out over whole validation buoys with the
//! [`IterativePredictor`], and measure position RMSE of the rollout against
//! the observations. One-step residuals are never used for scoring.
//!
//! ```text
//! ObservationTable ──GroupKFold──► folds ──fit/rollout──► fold RMSE
//!        │                                                   │
//!        │               selection (model menu) ◄────────────┤
//!        │               tuning (TPE trials)    ◄────────────┘
//!        └──holdout buoys──► evaluation ──► DriftMetrics + seasons
//! ```
//!
//! Shared state lives in [`DriftContext`]: the reanalysis fields, the
//! observation table and the configuration, all borrowed immutably so that
//! tuning trials can share them across rayon workers.

pub mod cv;
pub mod evaluation;
pub mod metrics;
pub mod report;
pub mod selection;
pub mod tuning;

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DriftConfig;
use crate::dataset::ObservationTable;
use crate::ml_engine::{ModelError, ModelSpec};
use crate::predictor::IterativePredictor;
use crate::reanalysis::{CovariateSampler, FieldSet};
use crate::types::PredictionRecord;

pub use cv::{CvError, Fold, GroupKFold};
pub use evaluation::{evaluate_holdout, select_holdout, HoldoutReport};
pub use metrics::{evaluate, evaluate_by_season, rmse, DriftMetrics, MetricError, Season};
pub use report::ReportError;
pub use selection::{select_model, ModelComparison, SelectionResult};
pub use tuning::{tune, TpeSampler, Trial, TuningResult};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Cross-validation: {0}")]
    Cv(#[from] CvError),

    #[error("Model: {0}")]
    Model(#[from] ModelError),

    #[error("Metrics: {0}")]
    Metric(#[from] MetricError),

    #[error("No fold could be scored for model '{0}'")]
    NoScoredFolds(String),

    #[error("Every candidate model failed cross-validation")]
    NoViableModel,

    #[error("Every tuning trial failed")]
    NoSuccessfulTrials,

    #[error("Held-out buoy '{0}' is not in the observation table")]
    UnknownBuoy(String),

    #[error("Cannot hold out {requested} of {available} buoys and keep a training set")]
    NotEnoughBuoys { requested: usize, available: usize },
}

// ============================================================================
// Shared Context
// ============================================================================

/// Immutable inputs shared by every harness stage.
#[derive(Clone, Copy)]
pub struct DriftContext<'a> {
    pub fields: &'a FieldSet,
    pub table: &'a ObservationTable,
    pub config: &'a DriftConfig,
}

impl<'a> DriftContext<'a> {
    pub fn new(fields: &'a FieldSet, table: &'a ObservationTable, config: &'a DriftConfig) -> Self {
        Self { fields, table, config }
    }

    pub fn sampler(&self) -> CovariateSampler<'a> {
        CovariateSampler::new(self.fields, self.config.reanalysis.time_tolerance_secs())
    }

    /// Observation count of each buoy, in table order.
    pub fn group_sizes(&self) -> Vec<usize> {
        self.table.tracks().iter().map(|t| t.len()).collect()
    }
}

// ============================================================================
// Fit + Rollout Scoring
// ============================================================================

/// Result of fitting on one table and rolling out over another.
#[derive(Debug, Clone)]
pub struct RolloutScore {
    pub metrics: DriftMetrics,
    pub records: Vec<PredictionRecord>,
    pub fit_secs: f64,
    pub rollout_secs: f64,
}

/// Fit `spec` on `train` and score its rollout over `validation`.
pub fn fit_and_score(
    ctx: &DriftContext<'_>,
    spec: &ModelSpec,
    train: &ObservationTable,
    validation: &ObservationTable,
    seed: u64,
) -> Result<RolloutScore, HarnessError> {
    let started = Instant::now();
    let model = spec.fit(&train.training_set(), seed)?;
    let fit_secs = started.elapsed().as_secs_f64();

    let started = Instant::now();
    let predictor = IterativePredictor::new(model.as_ref(), ctx.sampler(), ctx.table.layout());
    let records = predictor.predict_table(validation);
    let rollout_secs = started.elapsed().as_secs_f64();

    let metrics = metrics::evaluate(&records)?;
    Ok(RolloutScore {
        metrics,
        records,
        fit_secs,
        rollout_secs,
    })
}

/// Score of one cross-validation fold.
#[derive(Debug, Clone)]
pub struct FoldScore {
    pub fold: usize,
    pub rmse: f64,
    pub fit_secs: f64,
    pub rollout_secs: f64,
    /// Rollout records, kept only when requested.
    pub records: Vec<PredictionRecord>,
}

/// Grouped cross-validation of one model specification.
#[derive(Debug, Clone)]
pub struct CvOutcome {
    pub folds: Vec<FoldScore>,
    pub skipped: usize,
}

impl CvOutcome {
    pub fn rmses(&self) -> Vec<f64> {
        self.folds.iter().map(|f| f.rmse).collect()
    }

    pub fn mean_rmse(&self) -> f64 {
        statrs::statistics::Statistics::mean(self.rmses().iter())
    }

    /// Sample standard deviation; 0 with a single scored fold.
    pub fn std_rmse(&self) -> f64 {
        if self.folds.len() < 2 {
            return 0.0;
        }
        statrs::statistics::Statistics::std_dev(self.rmses().iter())
    }

    pub fn fit_secs(&self) -> f64 {
        self.folds.iter().map(|f| f.fit_secs).sum()
    }

    pub fn rollout_secs(&self) -> f64 {
        self.folds.iter().map(|f| f.rollout_secs).sum()
    }
}

/// Cross-validate `spec` over the context's buoys.
///
/// A fold whose fit or scoring fails is logged and skipped. Fails only when
/// the buoys cannot be split or no fold could be scored.
pub fn cross_validate(
    ctx: &DriftContext<'_>,
    label: &str,
    spec: &ModelSpec,
    seed: u64,
    keep_records: bool,
) -> Result<CvOutcome, HarnessError> {
    let folds = GroupKFold::new(ctx.config.cv.n_splits).split(&ctx.group_sizes())?;

    let mut outcome = CvOutcome {
        folds: Vec::with_capacity(folds.len()),
        skipped: 0,
    };
    for fold in &folds {
        let train = ctx.table.select(&fold.train);
        let validation = ctx.table.select(&fold.validation);
        match fit_and_score(ctx, spec, &train, &validation, seed) {
            Ok(score) => {
                debug!(
                    model = label,
                    fold = fold.index,
                    rmse = score.metrics.rmse_deg,
                    missing = score.metrics.n_missing,
                    "Fold scored"
                );
                outcome.folds.push(FoldScore {
                    fold: fold.index,
                    rmse: score.metrics.rmse_deg,
                    fit_secs: score.fit_secs,
                    rollout_secs: score.rollout_secs,
                    records: if keep_records { score.records } else { Vec::new() },
                });
            }
            Err(e) => {
                warn!(model = label, fold = fold.index, error = %e, "Fold skipped");
                outcome.skipped += 1;
            }
        }
    }

    if outcome.folds.is_empty() {
        return Err(HarnessError::NoScoredFolds(label.to_string()));
    }
    Ok(outcome)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::dataset::{Observation, ObservationTable};
    use crate::types::TrajectoryPoint;

    /// Buoys drifting north at a steady ~1 km/h, each from its own longitude.
    pub fn steady_drift_table(n_buoys: usize, n_points: usize) -> ObservationTable {
        let mut obs = Vec::new();
        for b in 0..n_buoys {
            for i in 0..n_points {
                let lat = 80.0 + i as f64 * 0.009;
                let lon = -30.0 + b as f64 * 7.0;
                let ts = 1_546_300_800 + i as i64 * 3600;
                obs.push(Observation::new(TrajectoryPoint::new(format!("buoy{b}"), lat, lon, ts), vec![]));
            }
        }
        ObservationTable::from_observations(vec![], obs, true)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::steady_drift_table;
    use super::*;

    fn config(n_splits: usize) -> DriftConfig {
        let mut c = DriftConfig::default();
        c.cv.n_splits = n_splits;
        c
    }

    #[test]
    fn test_cross_validate_scores_every_fold() {
        let fields = FieldSet::empty();
        let table = steady_drift_table(6, 8);
        let cfg = config(3);
        let ctx = DriftContext::new(&fields, &table, &cfg);
        let out = cross_validate(&ctx, "ridge", &ModelSpec::Ridge { alpha: 1e-3 }, 0, true).unwrap();
        assert_eq!(out.folds.len(), 3);
        assert_eq!(out.skipped, 0);
        // Constant drift is learnt almost exactly
        assert!(out.mean_rmse() < 0.05, "rmse = {}", out.mean_rmse());
        assert!(out.folds.iter().all(|f| !f.records.is_empty()));
    }

    #[test]
    fn test_too_few_buoys_is_fatal() {
        let fields = FieldSet::empty();
        let table = steady_drift_table(2, 5);
        let cfg = config(5);
        let ctx = DriftContext::new(&fields, &table, &cfg);
        let err = cross_validate(&ctx, "ridge", &ModelSpec::Ridge { alpha: 1.0 }, 0, false).unwrap_err();
        assert!(matches!(err, HarnessError::Cv(CvError::TooFewGroups { .. })));
    }

    #[test]
    fn test_failed_fits_are_skipped_then_fatal() {
        let fields = FieldSet::empty();
        let table = steady_drift_table(4, 5);
        let cfg = config(2);
        let ctx = DriftContext::new(&fields, &table, &cfg);
        // k = 0 is rejected at fit time in every fold
        let spec = ModelSpec::Knn {
            k: 0,
            weighting: crate::ml_engine::KnnWeighting::Uniform,
        };
        let err = cross_validate(&ctx, "knn", &spec, 0, false).unwrap_err();
        assert!(matches!(err, HarnessError::NoScoredFolds(ref m) if m == "knn"));
    }

    #[test]
    fn test_std_single_fold_is_zero() {
        let outcome = CvOutcome {
            folds: vec![FoldScore {
                fold: 0,
                rmse: 0.4,
                fit_secs: 0.0,
                rollout_secs: 0.0,
                records: vec![],
            }],
            skipped: 1,
        };
        assert_eq!(outcome.std_rmse(), 0.0);
        assert!((outcome.mean_rmse() - 0.4).abs() < 1e-12);
    }
}
