//! A module for missing-data-aware per-column standardization of output data.

use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};

/// Per-column standardization fitted on data with missing entries.
///
/// Column means and standard deviations are computed over present entries
/// only (`f64::NAN` marks missing); a column with zero or undefined spread
/// keeps scale one so that transforms stay invertible. Missing entries pass
/// through all transforms unchanged.
///
/// The inverse transform is the plain affine un-scaling, applicable to
/// predicted means and to credible bounds alike.
#[derive(Clone, Debug)]
pub struct Normalizer {
    mean: Array1<f64>,
    std: Array1<f64>,
}

impl Normalizer {
    /// Fits column means and standard deviations on `y`, ignoring missing
    /// entries. An all-missing column gets mean zero and scale one.
    pub fn fit(y: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Normalizer {
        let p = y.ncols();
        let mut mean = Array1::zeros(p);
        let mut std = Array1::ones(p);
        for (j, column) in y.columns().into_iter().enumerate() {
            let present: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
            if present.is_empty() {
                continue;
            }
            let n = present.len() as f64;
            let m = present.iter().sum::<f64>() / n;
            let var = present.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / n;
            let sd = var.sqrt();
            mean[j] = m;
            std[j] = if sd > 0.0 && sd.is_finite() { sd } else { 1.0 };
        }
        Normalizer { mean, std }
    }

    /// Standardizes `y` column-wise
    pub fn transform(&self, y: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Array2<f64> {
        (y - &self.mean) / &self.std
    }

    /// Undoes the standardization column-wise
    pub fn inverse_transform(&self, y: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Array2<f64> {
        y * &self.std + &self.mean
    }

    /// Fitted column means
    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Fitted column scales
    pub fn std(&self) -> &Array1<f64> {
        &self.std
    }
}
