//! This library implements the Instantaneous Linear Mixing Model (ILMM) for
//! multi-output [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process)
//! regression: `p` observed outputs are modeled as noisy instantaneous linear
//! combinations of `m` independent latent processes through a `p x m` mixing
//! matrix.
//!
//! The model performs exact Bayesian inference through the shared computation
//! graph of the [ilmm_gp] engine: [Ilmm::logpdf] is the exact joint Gaussian
//! log-density across outputs, [Ilmm::condition] is closed-form conditioning
//! producing a new independent model, and [Ilmm::predict] / [Ilmm::sample]
//! compute per-output marginals and correlated joint samples. Missing data is
//! handled per output column (`f64::NAN` marks a missing entry).
//!
//! The orthogonal variant (OILMM) is available through
//! [Ilmm::with_orthogonal_mixing], which constrains the mixing matrix to
//! `U * diag(sqrt(s))` with orthonormal `U`. The [Normalizer] adapter
//! standardizes real data column-wise before fitting, ignoring missing
//! entries.
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod errors;
mod model;

pub mod mixing;
pub mod normalize;

pub use errors::*;
pub use model::*;
pub use normalize::Normalizer;
