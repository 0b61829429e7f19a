//! Grouped k-fold cross-validation.
//!
//! Groups (buoys) are never split: every buoy lands wholly in one validation
//! fold. Assignment follows the usual greedy balancing: largest groups first,
//! each to the fold with the fewest samples so far (lowest fold index on ties).

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CvError {
    #[error("Cannot make {n_splits} folds from {n_groups} groups")]
    TooFewGroups { n_splits: usize, n_groups: usize },

    #[error("n_splits must be >= 2, got {0}")]
    TooFewSplits(usize),
}

/// Train/validation group indices for one fold.
#[derive(Debug, Clone, PartialEq)]
pub struct Fold {
    pub index: usize,
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct GroupKFold {
    n_splits: usize,
}

impl GroupKFold {
    pub fn new(n_splits: usize) -> Self {
        Self { n_splits }
    }

    /// Split groups given each group's sample count.
    ///
    /// Returned indices refer to positions in `group_sizes`; both lists of
    /// each fold are ascending.
    pub fn split(&self, group_sizes: &[usize]) -> Result<Vec<Fold>, CvError> {
        if self.n_splits < 2 {
            return Err(CvError::TooFewSplits(self.n_splits));
        }
        if group_sizes.len() < self.n_splits {
            return Err(CvError::TooFewGroups {
                n_splits: self.n_splits,
                n_groups: group_sizes.len(),
            });
        }

        let mut order: Vec<usize> = (0..group_sizes.len()).collect();
        // Stable sort: equal sizes keep index order
        order.sort_by(|&a, &b| group_sizes[b].cmp(&group_sizes[a]));

        let mut fold_load = vec![0usize; self.n_splits];
        let mut assignment = vec![0usize; group_sizes.len()];
        for g in order {
            let lightest = (0..self.n_splits)
                .min_by_key(|&f| (fold_load[f], f))
                .unwrap_or(0);
            fold_load[lightest] += group_sizes[g];
            assignment[g] = lightest;
        }

        Ok((0..self.n_splits)
            .map(|f| {
                let (validation, train): (Vec<usize>, Vec<usize>) =
                    (0..group_sizes.len()).partition(|&g| assignment[g] == f);
                Fold {
                    index: f,
                    train,
                    validation,
                }
            })
            .collect())
    }
}
