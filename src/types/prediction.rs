//! Observed-vs-predicted rollout output.

use serde::{Deserialize, Serialize};

use crate::geodesy::haversine_distance;

/// One step of a rollout paired with the observation it predicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub buoy_id: String,
    pub timestamp: i64,
    /// Position in the buoy's sequence (0 = initial condition).
    pub step: usize,
    pub true_latitude: f64,
    pub true_longitude: f64,
    pub predicted_latitude: f64,
    pub predicted_longitude: f64,
}

impl PredictionRecord {
    /// Great-circle distance between observed and predicted positions (km).
    ///
    /// NaN when the prediction is missing.
    pub fn distance_error_km(&self) -> f64 {
        haversine_distance(
            self.true_latitude,
            self.true_longitude,
            self.predicted_latitude,
            self.predicted_longitude,
        ) / 1000.0
    }

    /// True when all four coordinates are finite.
    pub fn is_scoreable(&self) -> bool {
        self.true_latitude.is_finite()
            && self.true_longitude.is_finite()
            && self.predicted_latitude.is_finite()
            && self.predicted_longitude.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_error_zero_for_exact_prediction() {
        let r = PredictionRecord {
            buoy_id: "b1".to_string(),
            timestamp: 0,
            step: 0,
            true_latitude: 80.0,
            true_longitude: 10.0,
            predicted_latitude: 80.0,
            predicted_longitude: 10.0,
        };
        assert!(r.is_scoreable());
        assert!(r.distance_error_km().abs() < 1e-9);
    }

    #[test]
    fn test_missing_prediction_not_scoreable() {
        let r = PredictionRecord {
            buoy_id: "b1".to_string(),
            timestamp: 0,
            step: 1,
            true_latitude: 80.0,
            true_longitude: 10.0,
            predicted_latitude: f64::NAN,
            predicted_longitude: f64::NAN,
        };
        assert!(!r.is_scoreable());
        assert!(r.distance_error_km().is_nan());
    }
}
