//! k-nearest-neighbour regression on standardized features.
//!
//! Brute-force search; training sets are a few thousand buoy steps at most.

use std::cmp::Ordering;

use super::{reject_input, KnnWeighting, Regressor, StandardScaler};
use crate::dataset::TrainingSet;

#[derive(Debug, Clone)]
pub struct KnnRegressor {
    scaler: StandardScaler,
    points: Vec<Vec<f64>>,
    targets: Vec<[f64; 2]>,
    k: usize,
    weighting: KnnWeighting,
}

impl KnnRegressor {
    pub fn fit(data: &TrainingSet, k: usize, weighting: KnnWeighting) -> Self {
        let scaler = StandardScaler::fit(&data.features);
        let points = data.features.iter().map(|r| scaler.transform(r)).collect();
        Self {
            scaler,
            points,
            targets: data.targets.clone(),
            k: k.max(1),
            weighting,
        }
    }

    /// Indices and squared distances of the `k` nearest training points,
    /// nearest first; equal distances keep training order.
    fn neighbours(&self, z: &[f64]) -> Vec<(usize, f64)> {
        let mut dists: Vec<(usize, f64)> = self
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| (i, p.iter().zip(z).map(|(a, b)| (a - b) * (a - b)).sum()))
            .collect();
        let cmp = |a: &(usize, f64), b: &(usize, f64)| match a.1.total_cmp(&b.1) {
            Ordering::Equal => a.0.cmp(&b.0),
            other => other,
        };
        let k = self.k.min(dists.len());
        if k < dists.len() {
            dists.select_nth_unstable_by(k - 1, cmp);
            dists.truncate(k);
        }
        dists.sort_by(cmp);
        dists
    }
}

impl Regressor for KnnRegressor {
    fn predict(&self, features: &[f64]) -> [f64; 2] {
        if let Some(missing) = reject_input(features, self.n_features()) {
            return missing;
        }
        let z = self.scaler.transform(features);
        let nn = self.neighbours(&z);
        if nn.is_empty() {
            return [f64::NAN, f64::NAN];
        }

        let weights: Vec<f64> = match self.weighting {
            KnnWeighting::Uniform => vec![1.0; nn.len()],
            KnnWeighting::Distance => {
                // Exact matches take all the weight
                if nn.iter().any(|&(_, d)| d == 0.0) {
                    nn.iter().map(|&(_, d)| if d == 0.0 { 1.0 } else { 0.0 }).collect()
                } else {
                    nn.iter().map(|&(_, d)| 1.0 / d.sqrt()).collect()
                }
            }
        };

        let total: f64 = weights.iter().sum();
        let mut out = [0.0; 2];
        for (&(i, _), w) in nn.iter().zip(&weights) {
            out[0] += w * self.targets[i][0];
            out[1] += w * self.targets[i][1];
        }
        [out[0] / total, out[1] / total]
    }

    fn n_features(&self) -> usize {
        self.scaler.width()
    }
}
