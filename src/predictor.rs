//! Iterative trajectory predictor.
//!
//! Rolls a buoy forward one observation interval at a time, feeding each
//! predicted position back in as the next input:
//!
//! ```text
//! sample(p₀, t₀) → predict → propagate → p₁ → sample(p₁, t₁) → predict → ...
//! ```
//!
//! The first output point is the observed initial condition. Every later
//! point carries the timestamp of the observation it stands in for, so the
//! output is exactly as long as the input. A missing covariate or a failed
//! prediction turns the position into `NaN` and every later step stays
//! `NaN`; nothing is retried.

use tracing::debug;

use crate::dataset::{BuoyTrack, ObservationTable};
use crate::features::FeatureLayout;
use crate::geodesy::destination_point;
use crate::ml_engine::Regressor;
use crate::reanalysis::CovariateSampler;
use crate::types::{PredictionRecord, TrajectoryPoint};

/// Couples a fitted model to the reanalysis sampler.
pub struct IterativePredictor<'a> {
    model: &'a dyn Regressor,
    sampler: CovariateSampler<'a>,
    layout: FeatureLayout,
}

impl<'a> IterativePredictor<'a> {
    pub fn new(model: &'a dyn Regressor, sampler: CovariateSampler<'a>, layout: FeatureLayout) -> Self {
        Self { model, sampler, layout }
    }

    /// Predicted trajectory for a time-ordered observation sequence.
    pub fn rollout(&self, observed: &[TrajectoryPoint]) -> Vec<TrajectoryPoint> {
        let Some(first) = observed.first() else {
            return Vec::new();
        };

        let mut out = Vec::with_capacity(observed.len());
        out.push(first.clone());

        let (mut lat, mut lon) = (first.latitude, first.longitude);
        let mut covariates = self.sampler.sample(lat, lon, first.timestamp);
        let mut row = Vec::with_capacity(self.layout.width());

        for pair in observed.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            let elapsed = next.timestamp.checked_sub(prev.timestamp).map_or(f64::NAN, |d| d as f64);

            row.clear();
            row.extend(self.layout.row(lat, lon, elapsed, &covariates));
            let [displacement, heading] = self.model.predict(&row);
            (lat, lon) = destination_point(lat, lon, displacement, heading);

            covariates.clear();
            self.sampler.sample_into(lat, lon, next.timestamp, &mut covariates);

            out.push(TrajectoryPoint {
                buoy_id: first.buoy_id.clone(),
                latitude: lat,
                longitude: lon,
                timestamp: next.timestamp,
            });
        }

        debug!(
            buoy = %first.buoy_id,
            steps = out.len(),
            missing = out.iter().filter(|p| !p.is_valid()).count(),
            "Rollout complete"
        );
        out
    }

    /// Roll out one track and pair each step with its observation.
    pub fn predict_track(&self, track: &BuoyTrack) -> Vec<PredictionRecord> {
        let observed: Vec<TrajectoryPoint> = track.observations.iter().map(|o| o.point.clone()).collect();
        let predicted = self.rollout(&observed);
        observed
            .iter()
            .zip(predicted)
            .enumerate()
            .map(|(step, (obs, pred))| PredictionRecord {
                buoy_id: obs.buoy_id.clone(),
                timestamp: obs.timestamp,
                step,
                true_latitude: obs.latitude,
                true_longitude: obs.longitude,
                predicted_latitude: pred.latitude,
                predicted_longitude: pred.longitude,
            })
            .collect()
    }

    /// Every track of a table, in table order.
    pub fn predict_table(&self, table: &ObservationTable) -> Vec<PredictionRecord> {
        table.tracks().iter().flat_map(|t| self.predict_track(t)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::haversine_distance;
    use crate::reanalysis::{FieldSet, GridField};
    use std::sync::Mutex;

    /// Fixed output regardless of input.
    struct Constant([f64; 2]);

    impl Regressor for Constant {
        fn predict(&self, _features: &[f64]) -> [f64; 2] {
            self.0
        }
        fn n_features(&self) -> usize {
            3
        }
    }

    /// Records every input row it sees.
    struct Recording {
        seen: Mutex<Vec<Vec<f64>>>,
        out: [f64; 2],
    }

    impl Regressor for Recording {
        fn predict(&self, features: &[f64]) -> [f64; 2] {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(features.to_vec());
            }
            self.out
        }
        fn n_features(&self) -> usize {
            4
        }
    }

    fn points(n: usize) -> Vec<TrajectoryPoint> {
        (0..n)
            .map(|i| TrajectoryPoint::new("b1", 80.0 + i as f64 * 0.01, 10.0, i as i64 * 3600))
            .collect()
    }

    #[test]
    fn test_length_and_first_point() {
        let set = FieldSet::empty();
        let model = Constant([1000.0, 90.0]);
        let p = IterativePredictor::new(&model, CovariateSampler::new(&set, 0), FeatureLayout::new(vec![]));
        let obs = points(5);
        let out = p.rollout(&obs);
        assert_eq!(out.len(), 5);
        assert_eq!(out[0], obs[0]);
        for (o, q) in obs.iter().zip(&out) {
            assert_eq!(o.timestamp, q.timestamp);
        }
    }

    #[test]
    fn test_each_step_moves_from_previous_prediction() {
        let set = FieldSet::empty();
        let model = Constant([5000.0, 0.0]);
        let p = IterativePredictor::new(&model, CovariateSampler::new(&set, 0), FeatureLayout::new(vec![]));
        let out = p.rollout(&points(4));
        for w in out.windows(2) {
            let d = haversine_distance(w[0].latitude, w[0].longitude, w[1].latitude, w[1].longitude);
            assert!((d - 5000.0).abs() < 1e-3, "d = {d}");
            assert!(w[1].latitude > w[0].latitude);
        }
    }

    #[test]
    fn test_covariates_resampled_at_predicted_position() {
        // u10 = 1 south of 80.5, 2 north of it
        let grid = GridField::new("u10", vec![0], vec![80.0, 81.0], vec![10.0], vec![1.0, 2.0]).unwrap();
        let set = FieldSet::new(vec![grid]).unwrap();
        let model = Recording {
            seen: Mutex::new(Vec::new()),
            // Jump ~1° north each step
            out: [111_195.0, 0.0],
        };
        let p = IterativePredictor::new(
            &model,
            CovariateSampler::new(&set, 100 * 3600),
            FeatureLayout::new(vec!["u10".into()]),
        );
        let out = p.rollout(&points(3));
        assert_eq!(out.len(), 3);
        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0][3], 1.0);
        assert_eq!(seen[1][3], 2.0);
        // Model input uses the predicted, not the observed, position
        assert!((seen[1][0] - out[1].latitude).abs() < 1e-12);
        assert_eq!(seen[1][2], 3600.0);
    }

    #[test]
    fn test_missing_covariate_propagates_nan() {
        let grid = GridField::new("u10", vec![0], vec![80.0], vec![10.0], vec![1.0]).unwrap();
        let set = FieldSet::new(vec![grid]).unwrap();
        let data = crate::dataset::TrainingSet {
            features: vec![vec![80.0, 10.0, 3600.0, 1.0], vec![80.1, 10.0, 3600.0, 1.0]],
            targets: vec![[100.0, 0.0], [100.0, 0.0]],
            feature_names: FeatureLayout::new(vec!["u10".into()]).names(),
        };
        let model = crate::ml_engine::ModelSpec::Ridge { alpha: 1.0 }.fit(&data, 0).unwrap();
        // Zero tolerance: the second query time is past the only slice
        let p = IterativePredictor::new(
            model.as_ref(),
            CovariateSampler::new(&set, 0),
            FeatureLayout::new(vec!["u10".into()]),
        );
        let out = p.rollout(&points(3));
        assert!(out[1].is_valid());
        assert!(!out[2].is_valid());
    }

    #[test]
    fn test_unrepresentable_interval_is_missing() {
        let set = FieldSet::empty();
        let model = Recording {
            seen: Mutex::new(Vec::new()),
            out: [1000.0, 0.0],
        };
        let p = IterativePredictor::new(&model, CovariateSampler::new(&set, 0), FeatureLayout::new(vec![]));
        let obs = vec![
            TrajectoryPoint::new("b1", 80.0, 10.0, i64::MIN),
            TrajectoryPoint::new("b1", 80.1, 10.0, i64::MAX),
        ];
        let out = p.rollout(&obs);
        assert_eq!(out.len(), 2);
        assert!(model.seen.lock().unwrap()[0][2].is_nan());
    }

    #[test]
    fn test_empty_input() {
        let set = FieldSet::empty();
        let model = Constant([0.0, 0.0]);
        let p = IterativePredictor::new(&model, CovariateSampler::new(&set, 0), FeatureLayout::new(vec![]));
        assert!(p.rollout(&[]).is_empty());
    }

    #[test]
    fn test_predict_track_pairs_records() {
        let set = FieldSet::empty();
        let model = Constant([0.0, 0.0]);
        let p = IterativePredictor::new(&model, CovariateSampler::new(&set, 0), FeatureLayout::new(vec![]));
        let obs = points(3);
        let table = ObservationTable::from_observations(
            vec![],
            obs.iter()
                .cloned()
                .map(|pt| crate::dataset::Observation::new(pt, vec![]))
                .collect(),
            true,
        );
        let records = p.predict_table(&table);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].step, 2);
        // Zero displacement keeps the start position
        assert_eq!(records[2].predicted_latitude, 80.0);
        assert_eq!(records[2].true_latitude, obs[2].latitude);
    }
}
