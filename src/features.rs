//! Model input layout shared by training and rollout.
//!
//! `[latitude, longitude, elapsed_secs, covariate_0, covariate_1, ...]`
//!
//! `elapsed_secs` is the time to the next observation, i.e. the length of the
//! step whose displacement and heading the model predicts. Covariates follow
//! field-set order.

use serde::{Deserialize, Serialize};

/// Fixed columns ahead of the covariates.
pub const BASE_FEATURES: [&str; 3] = ["latitude", "longitude", "elapsed_secs"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureLayout {
    covariates: Vec<String>,
}

impl FeatureLayout {
    pub fn new(covariates: Vec<String>) -> Self {
        Self { covariates }
    }

    pub fn covariates(&self) -> &[String] {
        &self.covariates
    }

    /// Total input width.
    pub fn width(&self) -> usize {
        BASE_FEATURES.len() + self.covariates.len()
    }

    /// Column names in input order.
    pub fn names(&self) -> Vec<String> {
        BASE_FEATURES
            .iter()
            .map(|s| s.to_string())
            .chain(self.covariates.iter().cloned())
            .collect()
    }

    /// Assemble one input row.
    ///
    /// Missing covariates are padded with `NaN` so the width never changes.
    pub fn row(&self, lat: f64, lon: f64, elapsed_secs: f64, covariates: &[f64]) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.width());
        row.extend_from_slice(&[lat, lon, elapsed_secs]);
        row.extend(
            (0..self.covariates.len()).map(|i| covariates.get(i).copied().unwrap_or(f64::NAN)),
        );
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_order() {
        let layout = FeatureLayout::new(vec!["u10".into(), "v10".into()]);
        assert_eq!(layout.width(), 5);
        assert_eq!(layout.names(), vec!["latitude", "longitude", "elapsed_secs", "u10", "v10"]);
        assert_eq!(layout.row(80.0, 5.0, 3600.0, &[1.0, 2.0]), vec![80.0, 5.0, 3600.0, 1.0, 2.0]);
    }

    #[test]
    fn test_short_covariates_padded() {
        let layout = FeatureLayout::new(vec!["u10".into(), "v10".into()]);
        let row = layout.row(80.0, 5.0, 3600.0, &[1.0]);
        assert_eq!(row.len(), 5);
        assert!(row[4].is_nan());
    }
}
