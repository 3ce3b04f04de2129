// Feature standardization
//
// Column-wise zero-mean/unit-variance scaling fitted on the training split
// only. Drift calibration produces a shifted copy whose mean is offset by
// the estimated baseline drift while the trained scale is preserved; the
// fitted scaler itself is never mutated.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Column-wise standardization scaler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit mean and standard deviation per column
    ///
    /// Columns with zero variance get scale 1.0 so transforming them is a
    /// plain mean shift instead of a division by zero.
    pub fn fit(data: &Array2<f64>) -> Self {
        let n_rows = data.nrows() as f64;
        let n_cols = data.ncols();

        let mut mean = vec![0.0; n_cols];
        let mut scale = vec![0.0; n_cols];

        for (j, column) in data.columns().into_iter().enumerate() {
            let m = column.sum() / n_rows;
            let var = column.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / n_rows;
            mean[j] = m;
            let std = var.sqrt();
            scale[j] = if std > 1e-12 { std } else { 1.0 };
        }

        Self { mean, scale }
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Standardize a single feature row
    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    /// Standardize a matrix row by row
    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        let mut out = data.clone();
        for mut row in out.rows_mut() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (*v - self.mean[j]) / self.scale[j];
            }
        }
        out
    }

    /// Copy of this scaler with the mean offset by `drift`
    pub fn shifted(&self, drift: &[f64]) -> Self {
        Self {
            mean: self
                .mean
                .iter()
                .zip(drift.iter())
                .map(|(m, d)| m + d)
                .collect(),
            scale: self.scale.clone(),
        }
    }

    /// Drift magnitude in units of the trained scale
    pub fn drift_norm(&self, drift: &[f64]) -> f64 {
        drift
            .iter()
            .zip(self.scale.iter())
            .map(|(d, s)| (d / s) * (d / s))
            .sum::<f64>()
            .sqrt()
    }
}
