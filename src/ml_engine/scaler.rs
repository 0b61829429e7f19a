//! Per-column standardization.
//!
//! Mean and variance are accumulated with Welford's algorithm so wide value
//! ranges (latitudes next to elapsed seconds) do not lose precision.

/// Floor on the standard deviation of a constant column.
const MIN_STD: f64 = 1e-8;

#[derive(Debug, Clone, Default)]
pub struct StandardScaler {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl StandardScaler {
    /// Fit on rows of equal width.
    pub fn fit<R: AsRef<[f64]>>(rows: &[R]) -> Self {
        let width = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut mean = vec![0.0; width];
        let mut m2 = vec![0.0; width];
        let mut count = 0.0;

        for row in rows {
            count += 1.0;
            for (i, &x) in row.as_ref().iter().enumerate().take(width) {
                let delta = x - mean[i];
                mean[i] += delta / count;
                m2[i] += delta * (x - mean[i]);
            }
        }

        // Population variance, matching the usual standard-scaler convention
        let std = m2
            .iter()
            .map(|&s| if count > 0.0 { (s / count).sqrt().max(MIN_STD) } else { 1.0 })
            .collect();
        Self { mean, std }
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(&x, (&m, &s))| (x - m) / s)
            .collect()
    }

    pub fn inverse_transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(&z, (&m, &s))| z * s + m)
            .collect()
    }

    /// Two-column convenience for targets.
    pub fn transform2(&self, y: [f64; 2]) -> [f64; 2] {
        [(y[0] - self.mean[0]) / self.std[0], (y[1] - self.mean[1]) / self.std[1]]
    }

    pub fn inverse_transform2(&self, z: [f64; 2]) -> [f64; 2] {
        [z[0] * self.std[0] + self.mean[0], z[1] * self.std[1] + self.mean[1]]
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn std(&self) -> &[f64] {
        &self.std
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_transform() {
        let rows = vec![vec![1.0, 10.0], vec![3.0, 10.0]];
        let s = StandardScaler::fit(&rows);
        assert_eq!(s.mean(), &[2.0, 10.0]);
        assert!((s.std()[0] - 1.0).abs() < 1e-12);
        // Constant column floors instead of dividing by zero
        assert_eq!(s.std()[1], MIN_STD);
        assert_eq!(s.transform(&[3.0, 10.0]), vec![1.0, 0.0]);
        assert_eq!(s.inverse_transform(&[1.0, 0.0]), vec![3.0, 10.0]);
    }

    #[test]
    fn test_two_column_helpers() {
        let rows = vec![[0.0, 100.0], [10.0, 300.0]];
        let s = StandardScaler::fit(&rows);
        let z = s.transform2([10.0, 100.0]);
        assert!((z[0] - 1.0).abs() < 1e-12);
        assert!((z[1] + 1.0).abs() < 1e-12);
        let y = s.inverse_transform2(z);
        assert!((y[0] - 10.0).abs() < 1e-9 && (y[1] - 100.0).abs() < 1e-9);
    }
}
