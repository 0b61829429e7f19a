//! Random forest: bootstrap-sampled CART trees with feature subsampling.
//!
//! Each tree draws from its own `StdRng` seeded from the forest seed and the
//! tree index, so results do not depend on how rayon schedules the trees.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::{reject_input, Regressor, RegressionTree, StandardScaler, TreeParams};
use crate::dataset::TrainingSet;

#[derive(Debug, Clone)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    target_scaler: StandardScaler,
    n_features: usize,
}

impl RandomForest {
    pub fn fit(data: &TrainingSet, n_trees: usize, params: TreeParams, seed: u64) -> Self {
        let target_scaler = StandardScaler::fit(&data.targets);
        let y: Vec<[f64; 2]> = data.targets.iter().map(|t| target_scaler.transform2(*t)).collect();
        let n = data.len();

        let trees = (0..n_trees.max(1))
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(tree_seed(seed, t));
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(&data.features, &y, &bootstrap, params, &mut rng)
            })
            .collect();

        Self {
            trees,
            target_scaler,
            n_features: data.n_features(),
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

/// Per-tree seed (splitmix-style mixing keeps neighbouring seeds apart).
fn tree_seed(seed: u64, tree: usize) -> u64 {
    let mut z = seed.wrapping_add((tree as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

impl Regressor for RandomForest {
    fn predict(&self, features: &[f64]) -> [f64; 2] {
        if let Some(missing) = reject_input(features, self.n_features) {
            return missing;
        }
        let mut sum = [0.0; 2];
        for tree in &self.trees {
            let p = tree.predict(features);
            sum[0] += p[0];
            sum[1] += p[1];
        }
        let n = self.trees.len() as f64;
        self.target_scaler.inverse_transform2([sum[0] / n, sum[1] / n])
    }

    fn n_features(&self) -> usize {
        self.n_features
    }
}
