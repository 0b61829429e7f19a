//! Ridge regression, both outputs solved against one Gram matrix.
//!
//! Features are standardized and targets centred, so the intercept is the
//! target mean and is not penalized.

use nalgebra::DMatrix;

use super::{reject_input, ModelError, Regressor, StandardScaler};
use crate::dataset::TrainingSet;

#[derive(Debug, Clone)]
pub struct RidgeRegression {
    scaler: StandardScaler,
    /// `weights[j]` = coefficients of standardized feature `j` for each output.
    weights: Vec<[f64; 2]>,
    intercept: [f64; 2],
}

impl RidgeRegression {
    pub fn fit(data: &TrainingSet, alpha: f64) -> Result<Self, ModelError> {
        if data.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        let (n, p) = (data.len(), data.n_features());
        let scaler = StandardScaler::fit(&data.features);

        let intercept = [
            data.targets.iter().map(|t| t[0]).sum::<f64>() / n as f64,
            data.targets.iter().map(|t| t[1]).sum::<f64>() / n as f64,
        ];

        let x = DMatrix::from_row_iterator(n, p, data.features.iter().flat_map(|r| scaler.transform(r)));
        let y = DMatrix::from_row_iterator(
            n,
            2,
            data.targets.iter().flat_map(|t| [t[0] - intercept[0], t[1] - intercept[1]]),
        );

        // (XᵀX + αI) W = XᵀY
        let gram = x.tr_mul(&x) + DMatrix::<f64>::identity(p, p) * alpha;
        let rhs = x.tr_mul(&y);
        let solution = solve(gram, &rhs)?;
        let weights = solution.row_iter().map(|w| [w[0], w[1]]).collect();

        Ok(Self {
            scaler,
            weights,
            intercept,
        })
    }

    pub fn intercept(&self) -> [f64; 2] {
        self.intercept
    }
}

impl Regressor for RidgeRegression {
    fn predict(&self, features: &[f64]) -> [f64; 2] {
        if let Some(missing) = reject_input(features, self.n_features()) {
            return missing;
        }
        let z = self.scaler.transform(features);
        let mut out = self.intercept;
        for (zj, w) in z.iter().zip(&self.weights) {
            out[0] += zj * w[0];
            out[1] += zj * w[1];
        }
        out
    }

    fn n_features(&self) -> usize {
        self.weights.len()
    }
}

/// Solve `a · w = b` for a symmetric system: Cholesky first, LU when `a` is
/// not positive definite.
fn solve(a: DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>, ModelError> {
    let solution = match a.clone().cholesky() {
        Some(chol) => chol.solve(b),
        None => a.lu().solve(b).ok_or(ModelError::Singular)?,
    };
    if solution.iter().all(|v| v.is_finite()) {
        Ok(solution)
    } else {
        Err(ModelError::Singular)
    }
}
