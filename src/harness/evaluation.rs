//! Final held-out evaluation on whole buoys.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use tracing::info;

use super::metrics::{evaluate, evaluate_by_season, DriftMetrics};
use super::{fit_and_score, DriftContext, HarnessError};
use crate::config::EvaluationConfig;
use crate::dataset::ObservationTable;
use crate::ml_engine::ModelConfig;
use crate::types::PredictionRecord;

/// Metrics of the final model on the held-out buoys.
#[derive(Debug, Clone, Serialize)]
pub struct HoldoutReport {
    pub model: ModelConfig,
    pub holdout_buoys: Vec<String>,
    pub training_buoys: usize,
    pub overall: DriftMetrics,
    /// Keyed by season code (`DJF`, `MAM`, `JJA`, `SON`).
    pub by_season: BTreeMap<String, DriftMetrics>,
    pub by_buoy: BTreeMap<String, DriftMetrics>,
    pub fit_secs: f64,
    pub rollout_secs: f64,
    #[serde(skip)]
    pub records: Vec<PredictionRecord>,
}

/// Held-out buoy ids, sorted.
///
/// An explicit list must name known buoys. Otherwise `holdout_count` buoys
/// are drawn with the configured seed. At least one buoy always remains for
/// training.
pub fn select_holdout(table: &ObservationTable, config: &EvaluationConfig) -> Result<Vec<String>, HarnessError> {
    let available = table.n_buoys();
    let mut ids: Vec<String> = if config.holdout_buoys.is_empty() {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let requested = config.holdout_count;
        if requested == 0 || requested >= available {
            return Err(HarnessError::NotEnoughBuoys { requested, available });
        }
        table
            .buoy_ids()
            .choose_multiple(&mut rng, requested)
            .map(|id| id.to_string())
            .collect()
    } else {
        if let Some(unknown) = config.holdout_buoys.iter().find(|id| table.track(id).is_none()) {
            return Err(HarnessError::UnknownBuoy(unknown.clone()));
        }
        let mut ids = config.holdout_buoys.clone();
        ids.sort();
        ids.dedup();
        if ids.len() >= available {
            return Err(HarnessError::NotEnoughBuoys {
                requested: ids.len(),
                available,
            });
        }
        ids
    };
    ids.sort();
    Ok(ids)
}

/// Fit `model` on every buoy outside the holdout and score the rollout over
/// the held-out buoys.
pub fn evaluate_holdout(ctx: &DriftContext<'_>, model: &ModelConfig) -> Result<HoldoutReport, HarnessError> {
    let holdout_buoys = select_holdout(ctx.table, &ctx.config.evaluation)?;
    let (holdout, train) = ctx.table.partition_by_ids(&holdout_buoys);
    info!(
        model = %model.name,
        holdout = ?holdout_buoys,
        training_buoys = train.n_buoys(),
        "Evaluating on held-out buoys"
    );

    let score = fit_and_score(ctx, &model.spec, &train, &holdout, ctx.config.evaluation.seed)?;

    let by_season = evaluate_by_season(&score.records)
        .into_iter()
        .map(|(season, m)| (season.code().to_string(), m))
        .collect();

    let mut by_buoy = BTreeMap::new();
    for id in &holdout_buoys {
        let subset: Vec<PredictionRecord> = score.records.iter().filter(|r| &r.buoy_id == id).cloned().collect();
        if let Ok(m) = evaluate(&subset) {
            by_buoy.insert(id.clone(), m);
        }
    }

    info!(
        rmse_deg = score.metrics.rmse_deg,
        mae_deg = score.metrics.mae_deg,
        median_distance_km = score.metrics.median_distance_km,
        points = score.metrics.n_points,
        missing = score.metrics.n_missing,
        "Held-out evaluation complete"
    );

    Ok(HoldoutReport {
        model: model.clone(),
        holdout_buoys,
        training_buoys: train.n_buoys(),
        overall: score.metrics,
        by_season,
        by_buoy,
        fit_secs: score.fit_secs,
        rollout_secs: score.rollout_secs,
        records: score.records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriftConfig;
    use crate::harness::test_support::steady_drift_table;
    use crate::ml_engine::ModelSpec;
    use crate::reanalysis::FieldSet;

    fn eval_config(count: usize, ids: &[&str]) -> EvaluationConfig {
        EvaluationConfig {
            holdout_count: count,
            holdout_buoys: ids.iter().map(|s| s.to_string()).collect(),
            seed: 5,
        }
    }

    #[test]
    fn test_random_holdout_is_seeded_and_sorted() {
        let table = steady_drift_table(8, 3);
        let a = select_holdout(&table, &eval_config(3, &[])).unwrap();
        let b = select_holdout(&table, &eval_config(3, &[])).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_explicit_holdout() {
        let table = steady_drift_table(4, 3);
        let ids = select_holdout(&table, &eval_config(0, &["buoy3", "buoy1", "buoy3"])).unwrap();
        assert_eq!(ids, vec!["buoy1".to_string(), "buoy3".to_string()]);
        assert!(matches!(
            select_holdout(&table, &eval_config(0, &["nope"])),
            Err(HarnessError::UnknownBuoy(ref id)) if id == "nope"
        ));
    }

    #[test]
    fn test_holdout_must_leave_training_buoys() {
        let table = steady_drift_table(3, 3);
        assert!(matches!(
            select_holdout(&table, &eval_config(3, &[])),
            Err(HarnessError::NotEnoughBuoys { requested: 3, available: 3 })
        ));
    }

    #[test]
    fn test_evaluate_holdout_reports_metrics() {
        let fields = FieldSet::empty();
        let table = steady_drift_table(5, 6);
        let mut cfg = DriftConfig::default();
        cfg.evaluation = eval_config(2, &[]);
        let ctx = DriftContext::new(&fields, &table, &cfg);
        let model = ModelConfig {
            name: "ridge".to_string(),
            spec: ModelSpec::Ridge { alpha: 1e-3 },
        };
        let report = evaluate_holdout(&ctx, &model).unwrap();
        assert_eq!(report.holdout_buoys.len(), 2);
        assert_eq!(report.training_buoys, 3);
        // 2 buoys × 5 rollout steps
        assert_eq!(report.overall.n_points, 10);
        assert_eq!(report.by_buoy.len(), 2);
        // All points fall on 2019-01-01
        assert_eq!(report.by_season.keys().collect::<Vec<_>>(), vec!["DJF"]);
        assert!(report.overall.median_distance_km < 1.0);
    }
}
