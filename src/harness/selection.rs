//! Model selection over the configured regressor menu.

use serde::Serialize;
use tracing::{info, warn};

use super::{cross_validate, DriftContext, FoldScore, HarnessError};
use crate::ml_engine::ModelConfig;

/// One row of the comparison table.
#[derive(Debug, Clone, Serialize)]
pub struct ModelComparison {
    pub model: String,
    pub kind: String,
    pub mean_rmse: f64,
    pub std_rmse: f64,
    pub folds_scored: usize,
    pub folds_skipped: usize,
    pub fit_secs: f64,
    pub rollout_secs: f64,
}

#[derive(Debug, Clone)]
pub struct SelectionResult {
    /// Menu order; models with no scoreable fold are absent.
    pub comparisons: Vec<ModelComparison>,
    /// Per-model fold scores (with records when fold tables were requested).
    pub folds: Vec<(String, Vec<FoldScore>)>,
    pub best: ModelConfig,
}

impl SelectionResult {
    pub fn best_comparison(&self) -> Option<&ModelComparison> {
        self.comparisons.iter().find(|c| c.model == self.best.name)
    }
}

/// Cross-validate every menu entry and keep the lowest mean RMSE.
///
/// Ties go to the entry listed first.
pub fn select_model(ctx: &DriftContext<'_>) -> Result<SelectionResult, HarnessError> {
    let keep_records = ctx.config.output.write_fold_predictions;
    let seed = ctx.config.tuning.seed;

    let mut comparisons = Vec::new();
    let mut folds = Vec::new();
    let mut best: Option<(f64, &ModelConfig)> = None;

    for candidate in &ctx.config.models {
        let outcome = match cross_validate(ctx, &candidate.name, &candidate.spec, seed, keep_records) {
            Ok(o) => o,
            Err(HarnessError::NoScoredFolds(name)) => {
                warn!(model = %name, "Model dropped: no fold could be scored");
                continue;
            }
            Err(e) => return Err(e),
        };

        let row = ModelComparison {
            model: candidate.name.clone(),
            kind: candidate.spec.kind().to_string(),
            mean_rmse: outcome.mean_rmse(),
            std_rmse: outcome.std_rmse(),
            folds_scored: outcome.folds.len(),
            folds_skipped: outcome.skipped,
            fit_secs: outcome.fit_secs(),
            rollout_secs: outcome.rollout_secs(),
        };
        info!(
            model = %row.model,
            mean_rmse = row.mean_rmse,
            std_rmse = row.std_rmse,
            folds = row.folds_scored,
            "Model cross-validated"
        );

        if best.map_or(true, |(score, _)| row.mean_rmse < score) {
            best = Some((row.mean_rmse, candidate));
        }
        comparisons.push(row);
        folds.push((candidate.name.clone(), outcome.folds));
    }

    let (score, winner) = best.ok_or(HarnessError::NoViableModel)?;
    info!(model = %winner.name, mean_rmse = score, "Selected model");

    Ok(SelectionResult {
        comparisons,
        folds,
        best: winner.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriftConfig;
    use crate::harness::test_support::steady_drift_table;
    use crate::ml_engine::{KnnWeighting, ModelSpec};
    use crate::reanalysis::FieldSet;

    fn menu() -> Vec<ModelConfig> {
        vec![
            ModelConfig {
                name: "broken".to_string(),
                spec: ModelSpec::Knn {
                    k: 0,
                    weighting: KnnWeighting::Uniform,
                },
            },
            ModelConfig {
                name: "ridge".to_string(),
                spec: ModelSpec::Ridge { alpha: 1e-3 },
            },
            ModelConfig {
                name: "knn".to_string(),
                spec: ModelSpec::Knn {
                    k: 3,
                    weighting: KnnWeighting::Uniform,
                },
            },
        ]
    }

    #[test]
    fn test_failed_models_dropped_and_best_picked() {
        let fields = FieldSet::empty();
        let table = steady_drift_table(6, 6);
        let mut cfg = DriftConfig::default();
        cfg.cv.n_splits = 3;
        cfg.models = menu();
        cfg.output.write_fold_predictions = false;
        let ctx = DriftContext::new(&fields, &table, &cfg);

        let result = select_model(&ctx).unwrap();
        assert_eq!(result.comparisons.len(), 2);
        assert!(result.comparisons.iter().all(|c| c.model != "broken"));
        let min = result
            .comparisons
            .iter()
            .map(|c| c.mean_rmse)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(result.best_comparison().unwrap().mean_rmse, min);
        assert!(result.folds.iter().all(|(_, f)| f.iter().all(|s| s.records.is_empty())));
    }

    #[test]
    fn test_all_models_failing_is_an_error() {
        let fields = FieldSet::empty();
        let table = steady_drift_table(4, 4);
        let mut cfg = DriftConfig::default();
        cfg.cv.n_splits = 2;
        cfg.models = vec![menu().remove(0)];
        let ctx = DriftContext::new(&fields, &table, &cfg);
        assert!(matches!(select_model(&ctx), Err(HarnessError::NoViableModel)));
    }
}
