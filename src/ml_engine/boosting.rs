//! Gradient-boosted regression trees (squared loss).
//!
//! Stages are inherently sequential: each tree fits the residual of the
//! ensemble so far on a fresh row subsample.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;

use super::{reject_input, Regressor, RegressionTree, StandardScaler, TreeParams};
use crate::dataset::TrainingSet;

#[derive(Debug, Clone)]
pub struct GradientBoosting {
    stages: Vec<RegressionTree>,
    learning_rate: f64,
    target_scaler: StandardScaler,
    n_features: usize,
}

impl GradientBoosting {
    pub fn fit(
        data: &TrainingSet,
        n_estimators: usize,
        learning_rate: f64,
        params: TreeParams,
        subsample: f64,
        seed: u64,
    ) -> Self {
        let target_scaler = StandardScaler::fit(&data.targets);
        let y: Vec<[f64; 2]> = data.targets.iter().map(|t| target_scaler.transform2(*t)).collect();
        let n = data.len();
        let n_sub = ((subsample * n as f64).round() as usize).clamp(1, n.max(1));
        let mut rng = StdRng::seed_from_u64(seed);

        // Standardized targets have zero mean, so the initial prediction is 0
        let mut current = vec![[0.0; 2]; n];
        let mut residual = vec![[0.0; 2]; n];
        let mut stages = Vec::with_capacity(n_estimators);

        for _ in 0..n_estimators {
            for i in 0..n {
                residual[i] = [y[i][0] - current[i][0], y[i][1] - current[i][1]];
            }
            let rows: Vec<usize> = if n_sub < n {
                let mut r = sample(&mut rng, n, n_sub).into_vec();
                r.sort_unstable();
                r
            } else {
                (0..n).collect()
            };
            let tree = RegressionTree::fit(&data.features, &residual, &rows, params, &mut rng);
            for (i, row) in data.features.iter().enumerate() {
                let step = tree.predict(row);
                current[i][0] += learning_rate * step[0];
                current[i][1] += learning_rate * step[1];
            }
            stages.push(tree);
        }

        Self {
            stages,
            learning_rate,
            target_scaler,
            n_features: data.n_features(),
        }
    }

    pub fn n_stages(&self) -> usize {
        self.stages.len()
    }
}

impl Regressor for GradientBoosting {
    fn predict(&self, features: &[f64]) -> [f64; 2] {
        if let Some(missing) = reject_input(features, self.n_features) {
            return missing;
        }
        let mut z = [0.0; 2];
        for tree in &self.stages {
            let step = tree.predict(features);
            z[0] += self.learning_rate * step[0];
            z[1] += self.learning_rate * step[1];
        }
        self.target_scaler.inverse_transform2(z)
    }

    fn n_features(&self) -> usize {
        self.n_features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> TrainingSet {
        let mut set = TrainingSet {
            feature_names: vec!["x".into()],
            ..Default::default()
        };
        for i in 0..40 {
            let x = i as f64;
            set.features.push(vec![x]);
            set.targets.push([50.0 * x, 360.0 - x]);
        }
        set
    }

    fn params() -> TreeParams {
        TreeParams {
            max_depth: 3,
            min_samples_leaf: 1,
            max_features: 1,
        }
    }

    #[test]
    fn test_training_error_decreases_with_stages() {
        let d = data();
        let err = |m: &GradientBoosting| -> f64 {
            d.features
                .iter()
                .zip(&d.targets)
                .map(|(x, t)| {
                    let p = m.predict(x);
                    (p[0] - t[0]).powi(2)
                })
                .sum::<f64>()
        };
        let few = GradientBoosting::fit(&d, 2, 0.3, params(), 1.0, 0);
        let many = GradientBoosting::fit(&d, 60, 0.3, params(), 1.0, 0);
        assert_eq!(many.n_stages(), 60);
        assert!(err(&many) < err(&few));
    }

    #[test]
    fn test_subsample_deterministic_per_seed() {
        let d = data();
        let a = GradientBoosting::fit(&d, 20, 0.1, params(), 0.5, 9);
        let b = GradientBoosting::fit(&d, 20, 0.1, params(), 0.5, 9);
        assert_eq!(a.predict(&[13.0]), b.predict(&[13.0]));
    }
}
