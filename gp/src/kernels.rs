//! A module for covariance kernels of scalar-input Gaussian processes.
//!
//! The following kernels are implemented:
//! * squared exponential,
//! * matern 3/2,
//! * matern 5/2,
//! * white noise (Dirac delta).

use ndarray::{Array1, Array2};
use std::fmt;

/// A trait for covariance kernels usable as process priors in a graph.
///
/// Only the pointwise covariance [`Kernel::value`] has to be provided;
/// matrix and diagonal builders are derived from it.
pub trait Kernel: fmt::Debug + fmt::Display {
    /// Covariance between two input locations `a` and `b`.
    fn value(&self, a: f64, b: f64) -> f64;

    /// Covariance matrix between two sets of input locations,
    /// with shape `(xa.len(), xb.len())`.
    fn matrix(&self, xa: &Array1<f64>, xb: &Array1<f64>) -> Array2<f64> {
        let mut k = Array2::zeros((xa.len(), xb.len()));
        for (i, a) in xa.iter().enumerate() {
            for (j, b) in xb.iter().enumerate() {
                k[[i, j]] = self.value(*a, *b);
            }
        }
        k
    }

    /// Variances at the given input locations, the diagonal of [`Kernel::matrix`].
    fn diag(&self, x: &Array1<f64>) -> Array1<f64> {
        x.mapv(|v| self.value(v, v))
    }
}

/// Squared exponential kernel
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SquaredExponential {
    variance: f64,
    lengthscale: f64,
}

impl Default for SquaredExponential {
    fn default() -> Self {
        SquaredExponential {
            variance: 1.0,
            lengthscale: 1.0,
        }
    }
}

impl SquaredExponential {
    /// Sets the process variance (covariance at zero distance)
    pub fn variance(mut self, variance: f64) -> Self {
        self.variance = variance;
        self
    }

    /// Sets the lengthscale
    pub fn lengthscale(mut self, lengthscale: f64) -> Self {
        self.lengthscale = lengthscale;
        self
    }
}

impl Kernel for SquaredExponential {
    /// variance * exp( - (a - b)^2 / (2 * lengthscale^2) )
    fn value(&self, a: f64, b: f64) -> f64 {
        let r = (a - b) / self.lengthscale;
        self.variance * f64::exp(-0.5 * r * r)
    }
}

impl fmt::Display for SquaredExponential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "SquaredExponential(variance={}, lengthscale={})",
            self.variance, self.lengthscale
        )
    }
}

/// Matern 3/2 kernel
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Matern32 {
    variance: f64,
    lengthscale: f64,
}

impl Default for Matern32 {
    fn default() -> Self {
        Matern32 {
            variance: 1.0,
            lengthscale: 1.0,
        }
    }
}

impl Matern32 {
    /// Sets the process variance (covariance at zero distance)
    pub fn variance(mut self, variance: f64) -> Self {
        self.variance = variance;
        self
    }

    /// Sets the lengthscale
    pub fn lengthscale(mut self, lengthscale: f64) -> Self {
        self.lengthscale = lengthscale;
        self
    }
}

impl Kernel for Matern32 {
    /// variance * (1 + sqrt(3)*r) * exp( - sqrt(3)*r ) with r = |a - b| / lengthscale
    fn value(&self, a: f64, b: f64) -> f64 {
        let r = (a - b).abs() / self.lengthscale;
        let sqrt3_r = 3f64.sqrt() * r;
        self.variance * (1. + sqrt3_r) * f64::exp(-sqrt3_r)
    }
}

impl fmt::Display for Matern32 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Matern32(variance={}, lengthscale={})",
            self.variance, self.lengthscale
        )
    }
}

/// Matern 5/2 kernel
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Matern52 {
    variance: f64,
    lengthscale: f64,
}

impl Default for Matern52 {
    fn default() -> Self {
        Matern52 {
            variance: 1.0,
            lengthscale: 1.0,
        }
    }
}

impl Matern52 {
    /// Sets the process variance (covariance at zero distance)
    pub fn variance(mut self, variance: f64) -> Self {
        self.variance = variance;
        self
    }

    /// Sets the lengthscale
    pub fn lengthscale(mut self, lengthscale: f64) -> Self {
        self.lengthscale = lengthscale;
        self
    }
}

impl Kernel for Matern52 {
    /// variance * (1 + sqrt(5)*r + 5*r^2/3) * exp( - sqrt(5)*r ) with r = |a - b| / lengthscale
    fn value(&self, a: f64, b: f64) -> f64 {
        let r = (a - b).abs() / self.lengthscale;
        let sqrt5_r = 5f64.sqrt() * r;
        self.variance * (1. + sqrt5_r + 5. * r * r / 3.) * f64::exp(-sqrt5_r)
    }
}

impl fmt::Display for Matern52 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Matern52(variance={}, lengthscale={})",
            self.variance, self.lengthscale
        )
    }
}

/// White noise kernel (Dirac delta).
///
/// Covariance is `variance` when the two locations are exactly equal and zero
/// otherwise. Two evaluations of the same white noise process at the same
/// location refer to the same noise realization.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct White {
    variance: f64,
}

impl Default for White {
    fn default() -> Self {
        White { variance: 1.0 }
    }
}

impl White {
    /// White noise kernel with the given variance
    pub fn new(variance: f64) -> Self {
        White { variance }
    }

    /// Sets the noise variance
    pub fn variance(mut self, variance: f64) -> Self {
        self.variance = variance;
        self
    }
}

impl Kernel for White {
    /// variance if a == b (exact equality), 0 otherwise
    fn value(&self, a: f64, b: f64) -> f64 {
        if a == b {
            self.variance
        } else {
            0.0
        }
    }
}

impl fmt::Display for White {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "White(variance={})", self.variance)
    }
}
