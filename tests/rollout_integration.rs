//! Rollout Integration Tests
//!
//! Propagator, sampler and iterative predictor exercised together through
//! the public API, with stub regressors standing in for fitted models.

use icedrift::dataset::Observation;
use icedrift::geodesy::{destination_point, haversine_distance};
use icedrift::reanalysis::{CovariateSampler, FieldSet, GridField};
use icedrift::{FeatureLayout, IterativePredictor, ObservationTable, Regressor, TrajectoryPoint};

/// Always predicts the same step.
struct FixedStep {
    displacement: f64,
    heading: f64,
}

impl Regressor for FixedStep {
    fn predict(&self, _features: &[f64]) -> [f64; 2] {
        [self.displacement, self.heading]
    }

    fn n_features(&self) -> usize {
        4
    }
}

fn wind_field() -> FieldSet {
    // 3 daily slices on a 0.5° grid north of Svalbard
    let times = vec![1_551_398_400, 1_551_484_800, 1_551_571_200];
    let lats = vec![80.0, 80.5, 81.0, 81.5];
    let lons = vec![0.0, 5.0, 10.0, 15.0];
    let n_cells = lats.len() * lons.len();
    let values: Vec<f64> = (0..times.len() * n_cells).map(|i| i as f64 * 0.1).collect();
    let field = GridField::new("u10", times, lats, lons, values).unwrap();
    FieldSet::new(vec![field]).unwrap()
}

fn track(id: &str, n: usize, start: i64) -> Vec<TrajectoryPoint> {
    (0..n)
        .map(|i| TrajectoryPoint::new(id, 80.2 + 0.02 * i as f64, 5.0 + 0.1 * i as f64, start + i as i64 * 10_800))
        .collect()
}

// ============================================================================
// Propagator
// ============================================================================

#[test]
fn zero_displacement_returns_input_position() {
    for &(lat, lon) in &[(80.0, 10.0), (-65.0, -170.0), (0.0, 179.9)] {
        for heading in [0.0, 90.0, 271.5] {
            let (la, lo) = destination_point(lat, lon, 0.0, heading);
            assert!((la - lat).abs() < 1e-12 && (lo - lon).abs() < 1e-12);
        }
    }
}

#[test]
fn propagated_longitude_always_wrapped() {
    for i in 0..200 {
        let lon = -180.0 + i as f64 * 1.8;
        let heading = (i * 37 % 720) as f64 - 180.0;
        let (_, lo) = destination_point(75.0, lon, 250_000.0, heading);
        assert!((-180.0..=180.0).contains(&lo), "lon = {lo}");
    }
}

#[test]
fn propagated_distance_matches_displacement() {
    let (la, lo) = destination_point(82.0, -30.0, 12_345.0, 222.0);
    let d = haversine_distance(82.0, -30.0, la, lo);
    assert!((d - 12_345.0).abs() < 1e-3, "d = {d}");
}

// ============================================================================
// Sampler
// ============================================================================

#[test]
fn sampler_is_deterministic() {
    let fields = wind_field();
    let sampler = CovariateSampler::new(&fields, 3 * 3600);
    let a = sampler.sample(80.7, 6.1, 1_551_400_000);
    let b = sampler.sample(80.7, 6.1, 1_551_400_000);
    assert_eq!(a, b);
    assert_eq!(a.len(), 1);
    assert!(a[0].is_finite());
}

#[test]
fn sampler_outside_time_range_is_missing() {
    let fields = wind_field();
    let sampler = CovariateSampler::new(&fields, 3 * 3600);
    // A week after the last slice
    assert!(sampler.sample(80.7, 6.1, 1_552_176_000)[0].is_nan());
    assert!(sampler.sample(f64::NAN, 6.1, 1_551_400_000)[0].is_nan());
}

// ============================================================================
// Iterative Predictor
// ============================================================================

#[test]
fn two_point_track_with_zero_step_repeats_first_point() {
    let fields = FieldSet::empty();
    let model = FixedStep {
        displacement: 0.0,
        heading: 0.0,
    };
    let predictor = IterativePredictor::new(&model, CovariateSampler::new(&fields, 0), FeatureLayout::new(vec![]));
    let observed = vec![
        TrajectoryPoint::new("300234", 81.25, -12.5, 1_551_398_400),
        TrajectoryPoint::new("300234", 81.31, -12.2, 1_551_409_200),
    ];
    let predicted = predictor.rollout(&observed);
    assert_eq!(predicted.len(), 2);
    assert_eq!(predicted[0], observed[0]);
    assert_eq!(predicted[1].latitude, observed[0].latitude);
    assert_eq!(predicted[1].longitude, observed[0].longitude);
    assert_eq!(predicted[1].timestamp, observed[1].timestamp);
    assert_eq!(predicted[1].buoy_id, "300234");
}

#[test]
fn output_length_matches_every_buoy() {
    let fields = wind_field();
    let sampler = CovariateSampler::new(&fields, 3 * 3600);
    let mut obs = Vec::new();
    for (id, n) in [("a", 2usize), ("b", 7), ("c", 13)] {
        for p in track(id, n, 1_551_398_400) {
            let covs = sampler.sample(p.latitude, p.longitude, p.timestamp);
            obs.push(Observation::new(p, covs));
        }
    }
    let table = ObservationTable::from_observations(vec!["u10".to_string()], obs, true);

    let model = FixedStep {
        displacement: 800.0,
        heading: 45.0,
    };
    let predictor = IterativePredictor::new(&model, sampler, table.layout());
    for t in table.tracks() {
        let records = predictor.predict_track(t);
        assert_eq!(records.len(), t.len());
        assert_eq!(records[0].predicted_latitude, t.observations[0].point.latitude);
        assert_eq!(records[0].predicted_longitude, t.observations[0].point.longitude);
        assert!(records.iter().all(|r| r.predicted_latitude.is_finite()));
    }
}

#[test]
fn rollout_past_reanalysis_coverage_stays_missing() {
    let fields = wind_field();
    let sampler = CovariateSampler::new(&fields, 3 * 3600);
    // Last grid slice is 2019-03-03; this track runs on for several days
    let observed: Vec<TrajectoryPoint> = (0..6)
        .map(|i| TrajectoryPoint::new("late", 80.5, 5.0, 1_551_571_200 + i * 86_400))
        .collect();

    /// Rejects rows with missing covariates, as fitted models do.
    struct Strict;
    impl Regressor for Strict {
        fn predict(&self, features: &[f64]) -> [f64; 2] {
            if features.iter().all(|v| v.is_finite()) {
                [1000.0, 0.0]
            } else {
                [f64::NAN, f64::NAN]
            }
        }
        fn n_features(&self) -> usize {
            4
        }
    }

    let predictor = IterativePredictor::new(&Strict, sampler, FeatureLayout::new(vec!["u10".to_string()]));
    let out = predictor.rollout(&observed);
    assert_eq!(out.len(), 6);
    assert!(out[1].is_valid());
    assert!(out[2..].iter().all(|p| !p.is_valid()));
}
