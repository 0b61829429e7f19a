//! Two-output CART regression tree.
//!
//! Splits minimise the summed squared error of both outputs. Callers pass
//! standardized targets so displacement (metres) does not swamp heading
//! (degrees) in the split criterion.

use rand::rngs::StdRng;
use rand::seq::index::sample;

/// Growth limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Features tried per split (all when >= the feature count).
    pub max_features: usize,
}

#[derive(Debug, Clone)]
enum TreeNode {
    Leaf([f64; 2]),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
    n_features: usize,
}

struct Builder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [[f64; 2]],
    params: TreeParams,
    n_features: usize,
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    /// Grow a tree on the rows listed in `indices` (repeats allowed, as in a
    /// bootstrap sample).
    pub fn fit(
        x: &[Vec<f64>],
        y: &[[f64; 2]],
        indices: &[usize],
        params: TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let n_features = x.first().map(|r| r.len()).unwrap_or(0);
        let mut builder = Builder {
            x,
            y,
            params: TreeParams {
                max_depth: params.max_depth,
                min_samples_leaf: params.min_samples_leaf.max(1),
                max_features: params.max_features.clamp(1, n_features.max(1)),
            },
            n_features,
            nodes: Vec::new(),
        };
        let mut idx = indices.to_vec();
        builder.grow(&mut idx, 0, rng);
        Self {
            nodes: builder.nodes,
            n_features,
        }
    }

    pub fn predict(&self, features: &[f64]) -> [f64; 2] {
        let mut id = 0;
        loop {
            match self.nodes.get(id) {
                Some(TreeNode::Leaf(v)) => return *v,
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    id = if features.get(*feature).is_some_and(|v| v <= threshold) {
                        *left
                    } else {
                        *right
                    };
                }
                None => return [f64::NAN, f64::NAN],
            }
        }
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    #[cfg(test)]
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, TreeNode::Leaf(_))).count()
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], id: usize) -> usize {
            match nodes.get(id) {
                Some(TreeNode::Split { left, right, .. }) => 1 + walk(nodes, *left).max(walk(nodes, *right)),
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

impl Builder<'_> {
    fn grow(&mut self, idx: &mut [usize], depth: usize, rng: &mut StdRng) -> usize {
        let id = self.nodes.len();
        let mean = self.mean(idx);
        self.nodes.push(TreeNode::Leaf(mean));

        let n = idx.len();
        if depth >= self.params.max_depth || n < 2 * self.params.min_samples_leaf {
            return id;
        }
        let Some((feature, threshold)) = self.best_split(idx, rng) else {
            return id;
        };

        // Partition in place: rows going left first
        let mut split = 0;
        for i in 0..n {
            if self.x[idx[i]][feature] <= threshold {
                idx.swap(i, split);
                split += 1;
            }
        }
        if split == 0 || split == n {
            return id;
        }

        let (left_idx, right_idx) = idx.split_at_mut(split);
        let left = self.grow(left_idx, depth + 1, rng);
        let right = self.grow(right_idx, depth + 1, rng);
        self.nodes[id] = TreeNode::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn mean(&self, idx: &[usize]) -> [f64; 2] {
        if idx.is_empty() {
            return [0.0, 0.0];
        }
        let mut s = [0.0; 2];
        for &i in idx {
            s[0] += self.y[i][0];
            s[1] += self.y[i][1];
        }
        let n = idx.len() as f64;
        [s[0] / n, s[1] / n]
    }

    /// Feature and threshold with the largest squared-error reduction.
    fn best_split(&self, idx: &[usize], rng: &mut StdRng) -> Option<(usize, f64)> {
        let n = idx.len();
        let min_leaf = self.params.min_samples_leaf;

        let mut total = [0.0; 2];
        let mut total_sq = 0.0;
        for &i in idx {
            for o in 0..2 {
                total[o] += self.y[i][o];
                total_sq += self.y[i][o] * self.y[i][o];
            }
        }
        let parent_score = (total[0] * total[0] + total[1] * total[1]) / n as f64;
        // Pure node
        if total_sq - parent_score <= 1e-12 {
            return None;
        }

        let mut candidates: Vec<usize> = if self.params.max_features < self.n_features {
            sample(rng, self.n_features, self.params.max_features).into_vec()
        } else {
            (0..self.n_features).collect()
        };
        candidates.sort_unstable();

        let mut best: Option<(f64, usize, f64)> = None;
        let mut order = idx.to_vec();
        for &f in &candidates {
            order.sort_by(|&a, &b| self.x[a][f].total_cmp(&self.x[b][f]));

            let mut left = [0.0; 2];
            for i in 1..n {
                let prev = order[i - 1];
                left[0] += self.y[prev][0];
                left[1] += self.y[prev][1];

                if i < min_leaf || n - i < min_leaf {
                    continue;
                }
                let lo = self.x[prev][f];
                let hi = self.x[order[i]][f];
                if lo >= hi {
                    continue;
                }

                let nl = i as f64;
                let nr = (n - i) as f64;
                let right = [total[0] - left[0], total[1] - left[1]];
                // Maximising Σ s²/n over children is equivalent to minimising SSE
                let score = (left[0] * left[0] + left[1] * left[1]) / nl
                    + (right[0] * right[0] + right[1] * right[1]) / nr;
                if score > parent_score + 1e-12 && best.map_or(true, |(b, _, _)| score > b) {
                    let mid = lo + (hi - lo) / 2.0;
                    let threshold = if mid < hi { mid } else { lo };
                    best = Some((score, f, threshold));
                }
            }
        }
        best.map(|(_, f, t)| (f, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn params(depth: usize) -> TreeParams {
        TreeParams {
            max_depth: depth,
            min_samples_leaf: 1,
            max_features: 10,
        }
    }

    #[test]
    fn test_step_function_learned_exactly() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let y: Vec<[f64; 2]> = (0..10).map(|i| if i < 5 { [0.0, 1.0] } else { [1.0, -1.0] }).collect();
        let idx: Vec<usize> = (0..10).collect();
        let mut rng = StdRng::seed_from_u64(0);
        let tree = RegressionTree::fit(&x, &y, &idx, params(3), &mut rng);
        assert_eq!(tree.predict(&[2.0]), [0.0, 1.0]);
        assert_eq!(tree.predict(&[7.0]), [1.0, -1.0]);
        // One split suffices
        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn test_depth_zero_is_mean() {
        let x = vec![vec![0.0], vec![1.0]];
        let y = vec![[0.0, 2.0], [4.0, 6.0]];
        let mut rng = StdRng::seed_from_u64(0);
        let tree = RegressionTree::fit(&x, &y, &[0, 1], params(0), &mut rng);
        assert_eq!(tree.predict(&[100.0]), [2.0, 4.0]);
    }

    #[test]
    fn test_min_samples_leaf_respected() {
        let x: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64]).collect();
        let y: Vec<[f64; 2]> = vec![[10.0, 0.0], [0.0, 0.0], [0.0, 0.0], [0.0, 0.0], [0.0, 0.0], [0.0, 0.0]];
        let mut rng = StdRng::seed_from_u64(0);
        let p = TreeParams {
            max_depth: 5,
            min_samples_leaf: 3,
            max_features: 1,
        };
        let tree = RegressionTree::fit(&x, &y, &[0, 1, 2, 3, 4, 5], p, &mut rng);
        // The outlier cannot be isolated in a leaf of one
        let v = tree.predict(&[0.0]);
        assert!((v[0] - 10.0 / 3.0).abs() < 1e-12, "{:?}", v);
    }

    #[test]
    fn test_constant_features_give_single_leaf() {
        let x = vec![vec![1.0], vec![1.0], vec![1.0]];
        let y = vec![[0.0, 0.0], [3.0, 0.0], [6.0, 0.0]];
        let mut rng = StdRng::seed_from_u64(0);
        let tree = RegressionTree::fit(&x, &y, &[0, 1, 2], params(4), &mut rng);
        assert_eq!(tree.n_leaves(), 1);
        assert_eq!(tree.predict(&[1.0]), [3.0, 0.0]);
    }
}
