//! This library implements a small [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process)
//! graph engine: processes live in a shared, append-only [Graph] so that joint
//! log-densities, exact Bayesian conditioning and correlated joint sampling can be
//! computed across any set of processes derived from common ancestors.
//!
//! A process is created from a covariance kernel with [Graph::gp], evaluated at a
//! finite set of input locations with [Process::at], and combined with other
//! processes of the same graph either with `+` or with [Graph::combine] (weighted
//! sums). Observations of evaluated processes are gathered in an [Observations]
//! set; [Graph::logpdf] computes the exact joint Gaussian log-density of the set
//! and [Process::condition] returns the exact posterior process.
//!
//! All computations are closed form; no approximation is involved. Handles are
//! reference counted and not thread safe: one graph is meant to be driven from a
//! single thread.
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod errors;
mod graph;
mod obs;

pub mod kernels;

pub use errors::*;
pub use graph::*;
pub use obs::*;
