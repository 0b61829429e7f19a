//! Trajectory error metrics.
//!
//! Position errors are computed on (latitude, longitude) in degrees, one
//! column per coordinate, then averaged across the two columns. Longitude
//! differences are wrapped into [-180, 180] so a track crossing the
//! antimeridian is not charged 360°. The great-circle distance is reported
//! separately in kilometres.
//!
//! Only rollout steps (step >= 1) are scored: the initial condition is copied
//! from the observation and carries no information about the model. Pairs
//! with a missing prediction are dropped before scoring.

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, Statistics};
use thiserror::Error;

use crate::types::PredictionRecord;

#[derive(Debug, Error, PartialEq)]
pub enum MetricError {
    #[error("Prediction/observation length mismatch: {observed} observed vs {predicted} predicted")]
    LengthMismatch { observed: usize, predicted: usize },

    #[error("No finite prediction/observation pairs to score")]
    NoFinitePairs,
}

/// Aggregate error of a set of predicted trajectories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftMetrics {
    /// Scored pairs.
    pub n_points: usize,
    /// Pairs dropped because the prediction was missing.
    pub n_missing: usize,
    pub rmse_deg: f64,
    pub mae_deg: f64,
    pub median_ae_deg: f64,
    pub mean_distance_km: f64,
    pub median_distance_km: f64,
    pub max_distance_km: f64,
}

/// Signed coordinate errors `[Δlat, Δlon]` for one pair, longitude wrapped.
fn coordinate_errors(observed: [f64; 2], predicted: [f64; 2]) -> [f64; 2] {
    let dlat = predicted[0] - observed[0];
    let dlon = (predicted[1] - observed[1] + 180.0).rem_euclid(360.0) - 180.0;
    [dlat, dlon]
}

/// Column-averaged RMSE over finite `(lat, lon)` pairs.
pub fn rmse(observed: &[[f64; 2]], predicted: &[[f64; 2]]) -> Result<f64, MetricError> {
    let errors = paired_errors(observed, predicted)?;
    let col = |c: usize| (errors.iter().map(|e| e[c] * e[c]).sum::<f64>() / errors.len() as f64).sqrt();
    Ok((col(0) + col(1)) / 2.0)
}

fn paired_errors(observed: &[[f64; 2]], predicted: &[[f64; 2]]) -> Result<Vec<[f64; 2]>, MetricError> {
    if observed.len() != predicted.len() {
        return Err(MetricError::LengthMismatch {
            observed: observed.len(),
            predicted: predicted.len(),
        });
    }
    let errors: Vec<[f64; 2]> = observed
        .iter()
        .zip(predicted)
        .filter(|(o, p)| o.iter().chain(p.iter()).all(|v| v.is_finite()))
        .map(|(o, p)| coordinate_errors(*o, *p))
        .collect();
    if errors.is_empty() {
        return Err(MetricError::NoFinitePairs);
    }
    Ok(errors)
}

/// Full metric set over rollout records.
pub fn evaluate(records: &[PredictionRecord]) -> Result<DriftMetrics, MetricError> {
    let steps: Vec<&PredictionRecord> = records.iter().filter(|r| r.step > 0).collect();
    let scored: Vec<&PredictionRecord> = steps.iter().copied().filter(|r| r.is_scoreable()).collect();
    if scored.is_empty() {
        return Err(MetricError::NoFinitePairs);
    }

    let observed: Vec<[f64; 2]> = scored.iter().map(|r| [r.true_latitude, r.true_longitude]).collect();
    let predicted: Vec<[f64; 2]> = scored
        .iter()
        .map(|r| [r.predicted_latitude, r.predicted_longitude])
        .collect();
    let rmse_deg = rmse(&observed, &predicted)?;
    let errors = paired_errors(&observed, &predicted)?;

    let n = errors.len() as f64;
    let per_col = |f: &dyn Fn(&[f64]) -> f64| {
        let lat: Vec<f64> = errors.iter().map(|e| e[0]).collect();
        let lon: Vec<f64> = errors.iter().map(|e| e[1]).collect();
        (f(&lat) + f(&lon)) / 2.0
    };
    let mae_deg = per_col(&|c: &[f64]| c.iter().map(|e| e.abs()).sum::<f64>() / n);
    let median_ae_deg = per_col(&|c: &[f64]| Data::new(c.iter().map(|e| e.abs()).collect::<Vec<_>>()).median());

    let distances: Vec<f64> = scored.iter().map(|r| r.distance_error_km()).collect();
    let max_distance_km = distances.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    Ok(DriftMetrics {
        n_points: scored.len(),
        n_missing: steps.len() - scored.len(),
        rmse_deg,
        mae_deg,
        median_ae_deg,
        mean_distance_km: distances.iter().mean(),
        median_distance_km: Data::new(distances.clone()).median(),
        max_distance_km,
    })
}

// ============================================================================
// Seasonal Breakdown
// ============================================================================

/// Meteorological season of a timestamp (Northern Hemisphere naming).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Season {
    #[serde(rename = "DJF")]
    Winter,
    #[serde(rename = "MAM")]
    Spring,
    #[serde(rename = "JJA")]
    Summer,
    #[serde(rename = "SON")]
    Autumn,
}

impl Season {
    pub const ALL: [Season; 4] = [Season::Winter, Season::Spring, Season::Summer, Season::Autumn];

    pub fn from_timestamp(epoch_secs: i64) -> Option<Season> {
        let dt = chrono::DateTime::from_timestamp(epoch_secs, 0)?;
        Some(match dt.month() {
            12 | 1 | 2 => Season::Winter,
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            _ => Season::Autumn,
        })
    }

    pub fn code(&self) -> &'static str {
        match self {
            Season::Winter => "DJF",
            Season::Spring => "MAM",
            Season::Summer => "JJA",
            Season::Autumn => "SON",
        }
    }
}

/// Metrics per season; seasons without a scoreable point are omitted.
pub fn evaluate_by_season(records: &[PredictionRecord]) -> Vec<(Season, DriftMetrics)> {
    Season::ALL
        .iter()
        .filter_map(|&season| {
            let subset: Vec<PredictionRecord> = records
                .iter()
                .filter(|r| Season::from_timestamp(r.timestamp) == Some(season))
                .cloned()
                .collect();
            evaluate(&subset).ok().map(|m| (season, m))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(step: usize, t: i64, obs: (f64, f64), pred: (f64, f64)) -> PredictionRecord {
        PredictionRecord {
            buoy_id: "b".to_string(),
            timestamp: t,
            step,
            true_latitude: obs.0,
            true_longitude: obs.1,
            predicted_latitude: pred.0,
            predicted_longitude: pred.1,
        }
    }

    #[test]
    fn test_rmse_column_average() {
        // lat errors 3, 3 → 3 ; lon errors 4, 0 → sqrt(8)
        let obs = [[0.0, 0.0], [0.0, 0.0]];
        let pred = [[3.0, 4.0], [-3.0, 0.0]];
        let r = rmse(&obs, &pred).unwrap();
        assert!((r - (3.0 + 8f64.sqrt()) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_rmse_skips_nan_pairs() {
        let obs = [[0.0, 0.0], [0.0, 0.0]];
        let pred = [[1.0, 1.0], [f64::NAN, f64::NAN]];
        assert_eq!(rmse(&obs, &pred).unwrap(), 1.0);
    }

    #[test]
    fn test_rmse_errors() {
        assert_eq!(
            rmse(&[[0.0, 0.0]], &[]).unwrap_err(),
            MetricError::LengthMismatch { observed: 1, predicted: 0 }
        );
        assert_eq!(rmse(&[[0.0, 0.0]], &[[f64::NAN, 0.0]]).unwrap_err(), MetricError::NoFinitePairs);
    }

    #[test]
    fn test_longitude_error_wraps() {
        let r = rmse(&[[80.0, 179.5]], &[[80.0, -179.5]]).unwrap();
        // 1° of longitude, averaged with 0° of latitude
        assert!((r - 0.5).abs() < 1e-9, "r = {r}");
    }

    #[test]
    fn test_evaluate_ignores_initial_condition_and_counts_missing() {
        let records = vec![
            rec(0, 0, (80.0, 0.0), (80.0, 0.0)),
            rec(1, 3600, (80.0, 0.0), (80.1, 0.0)),
            rec(2, 7200, (80.0, 0.0), (80.3, 0.0)),
            rec(3, 10800, (80.0, 0.0), (f64::NAN, f64::NAN)),
        ];
        let m = evaluate(&records).unwrap();
        assert_eq!(m.n_points, 2);
        assert_eq!(m.n_missing, 1);
        // lat MAE 0.2, lon MAE 0
        assert!((m.mae_deg - 0.1).abs() < 1e-9);
        assert!(m.max_distance_km > m.mean_distance_km);
        assert!((m.mean_distance_km - m.median_distance_km).abs() < 1e-9);
    }

    #[test]
    fn test_evaluate_nothing_scoreable() {
        let records = vec![rec(0, 0, (80.0, 0.0), (80.0, 0.0))];
        assert_eq!(evaluate(&records).unwrap_err(), MetricError::NoFinitePairs);
    }

    #[test]
    fn test_seasons() {
        let jan = 1_546_300_800; // 2019-01-01
        let jul = 1_561_939_200; // 2019-07-01
        assert_eq!(Season::from_timestamp(jan), Some(Season::Winter));
        assert_eq!(Season::from_timestamp(jul), Some(Season::Summer));
        let records = vec![
            rec(1, jan, (80.0, 0.0), (80.1, 0.0)),
            rec(1, jul, (80.0, 0.0), (80.2, 0.0)),
        ];
        let by = evaluate_by_season(&records);
        assert_eq!(by.len(), 2);
        assert_eq!(by[0].0, Season::Winter);
        assert_eq!(by[1].0.code(), "JJA");
    }
}
