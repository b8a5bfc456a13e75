use crate::errors::{IlmmError, Result};

use ilmm_gp::kernels::{Kernel, White};
use ilmm_gp::{Fdd, Graph, Observations, Process};

use log::debug;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
use ndarray_rand::rand::{Rng, thread_rng};

use std::fmt;

/// The Instantaneous Linear Mixing Model.
///
/// `p` observed outputs are modeled as noisy instantaneous linear combinations
/// of `m` independent latent Gaussian processes through a `p x m` mixing
/// matrix `H`:
///
/// `y_j(t) = sum_i H[j, i] * (x_i(t) + e_i(t)) + e_obs(t)`
///
/// where:
/// * `x_i` is the i-th latent process, defined by its covariance kernel
/// * `e_i` is white noise with per-latent variance `noises_latent[i]`
/// * `e_obs` is white observation noise with variance `noise_obs`, one
///   independent realization per output
///
/// All processes live in one shared [Graph], so [Ilmm::logpdf] is the exact
/// joint Gaussian log-density across outputs, [Ilmm::condition] is exact
/// Bayesian conditioning, and [Ilmm::sample] draws jointly correlated outputs.
/// Missing entries of the observed data are marked with `f64::NAN` and handled
/// per output column.
///
/// # Example
///
/// ```
/// use ilmm::Ilmm;
/// use ilmm_gp::kernels::{Kernel, SquaredExponential};
/// use ndarray::{array, Array1};
///
/// let kernels: Vec<Box<dyn Kernel>> = vec![
///     Box::new(SquaredExponential::default().lengthscale(0.5)),
///     Box::new(SquaredExponential::default().lengthscale(2.0)),
/// ];
/// let h = array![[1.0, 0.5], [0.5, 1.0], [1.0, -1.0]];
/// let model = Ilmm::from_kernels(kernels, h, 0.1, array![0.01, 0.01]).expect("ILMM model");
///
/// let x = Array1::linspace(0.0, 1.0, 10);
/// let y = model.sample(&x).expect("ILMM sample");
/// let model = model.condition(&x, &y).expect("ILMM conditioning");
/// let (means, lowers, uppers) = model.predict(&x).expect("ILMM prediction");
/// ```
#[derive(Clone)]
pub struct Ilmm {
    /// Shared computation context of all processes below
    graph: Graph,
    /// Latent processes, length m
    latents: Vec<Process>,
    /// Mixing matrix, shape (p, m)
    h: Array2<f64>,
    /// Observation noise variance, shared across outputs
    noise_obs: f64,
    /// Per-latent noise variances, length m
    noises_latent: Array1<f64>,
    /// Noiseless output processes H * latents, length p
    fs: Vec<Process>,
    /// Noisy output processes H * (latents + latent noise) + observation noise, length p
    ys: Vec<Process>,
}

impl fmt::Display for Ilmm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ILMM(p={}, m={}, noise_obs={})",
            self.nb_outputs(),
            self.nb_latents(),
            self.noise_obs
        )
    }
}

impl Ilmm {
    /// Builds a model from latent covariance kernels.
    ///
    /// Creates a fresh graph, instantiates one latent process per kernel and
    /// delegates to [Ilmm::from_processes].
    pub fn from_kernels(
        kernels: Vec<Box<dyn Kernel>>,
        h: Array2<f64>,
        noise_obs: f64,
        noises_latent: Array1<f64>,
    ) -> Result<Ilmm> {
        let graph = Graph::new();
        let latents = kernels.into_iter().map(|k| graph.gp(k)).collect();
        Ilmm::from_processes(graph, latents, h, noise_obs, noises_latent)
    }

    /// Builds a model from pre-built latent processes of an existing graph.
    ///
    /// Used by [Ilmm::condition] to rebuild a model around posterior latents;
    /// the mixing matrix and noises are validated and stored, noisy latent
    /// variants and output processes are derived in the graph.
    ///
    /// Errors if `h` is not `p x m` with `m` the latent count, if the latent
    /// noise vector length differs from `m`, or if any noise is negative.
    pub fn from_processes(
        graph: Graph,
        latents: Vec<Process>,
        h: Array2<f64>,
        noise_obs: f64,
        noises_latent: Array1<f64>,
    ) -> Result<Ilmm> {
        let m = latents.len();
        if h.ncols() != m {
            return Err(IlmmError::MixingShape(format!(
                "mixing matrix has {} columns but {} latent processes were given",
                h.ncols(),
                m
            )));
        }
        if noises_latent.len() != m {
            return Err(IlmmError::LatentNoiseLength {
                expected: m,
                actual: noises_latent.len(),
            });
        }
        if !(noise_obs >= 0.0) {
            return Err(IlmmError::NegativeNoise(format!(
                "observation noise must be non-negative, got {noise_obs}"
            )));
        }
        if let Some(v) = noises_latent.iter().find(|v| !(**v >= 0.0)) {
            return Err(IlmmError::NegativeNoise(format!(
                "latent noises must be non-negative, got {v}"
            )));
        }
        for latent in &latents {
            assert!(
                graph.same_graph(latent.graph()),
                "latent processes must live in the given graph"
            );
        }

        // Create noisy latent processes
        let latents_noisy: Vec<Process> = latents
            .iter()
            .zip(noises_latent.iter())
            .map(|(latent, noise)| latent + &graph.gp(Box::new(White::new(*noise))))
            .collect();

        // Create noiseless output processes
        let fs = mix(&graph, &h, &latents);

        // Create noisy output processes, one independent observation noise per output
        let ys = mix(&graph, &h, &latents_noisy)
            .iter()
            .map(|f| f + &graph.gp(Box::new(White::new(noise_obs))))
            .collect();

        Ok(Ilmm {
            graph,
            latents,
            h,
            noise_obs,
            noises_latent,
            fs,
            ys,
        })
    }

    /// Builds a model with an orthogonal mixing matrix `H = U * diag(sqrt(s))`
    /// (the OILMM parameterization). See [crate::mixing::orthogonal_mixing].
    pub fn with_orthogonal_mixing(
        kernels: Vec<Box<dyn Kernel>>,
        u: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        s: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        noise_obs: f64,
        noises_latent: Array1<f64>,
    ) -> Result<Ilmm> {
        let h = crate::mixing::orthogonal_mixing(u, s)?;
        Ilmm::from_kernels(kernels, h, noise_obs, noises_latent)
    }

    /// Number of outputs `p`
    pub fn nb_outputs(&self) -> usize {
        self.h.nrows()
    }

    /// Number of latent processes `m`
    pub fn nb_latents(&self) -> usize {
        self.h.ncols()
    }

    /// The mixing matrix
    pub fn h(&self) -> &Array2<f64> {
        &self.h
    }

    /// The observation noise variance
    pub fn noise_obs(&self) -> f64 {
        self.noise_obs
    }

    /// The per-latent noise variances
    pub fn noises_latent(&self) -> &Array1<f64> {
        &self.noises_latent
    }

    /// The shared graph of the model
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The latent processes
    pub fn latent_processes(&self) -> &[Process] {
        &self.latents
    }

    /// The noiseless output processes `fs`
    pub fn noiseless_outputs(&self) -> &[Process] {
        &self.fs
    }

    /// The noisy output processes `ys`
    pub fn noisy_outputs(&self) -> &[Process] {
        &self.ys
    }

    /// Assembles the joint observation set of data `y` at locations `x`,
    /// one observation per output column restricted to its present entries.
    fn observations(
        &self,
        x: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        y: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<Observations> {
        if y.nrows() != x.len() {
            return Err(IlmmError::DataShape(format!(
                "data has {} rows but {} input locations were given",
                y.nrows(),
                x.len()
            )));
        }
        if y.ncols() != self.nb_outputs() {
            return Err(IlmmError::DataShape(format!(
                "data has {} columns but the model has {} outputs",
                y.ncols(),
                self.nb_outputs()
            )));
        }
        let mut pairs = Vec::with_capacity(self.nb_outputs());
        for (xi, i, yi) in per_output(x, y) {
            // an all-missing column contributes no observation
            if xi.is_empty() {
                continue;
            }
            pairs.push((self.ys[i].at(&xi), yi));
        }
        debug!(
            "observing {} of {} output columns at {} input locations",
            pairs.len(),
            self.nb_outputs(),
            x.len()
        );
        Ok(Observations::new(&self.graph, pairs)?)
    }

    /// Exact joint Gaussian log-density of data `y` at input locations `x`.
    ///
    /// `y` has shape `(x.len(), p)`; missing entries are marked `f64::NAN`
    /// independently per column and excluded from the joint observation set.
    /// Correlations among outputs induced by the shared latent processes are
    /// fully accounted for; no approximation is involved.
    pub fn logpdf(
        &self,
        x: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        y: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<f64> {
        let obs = self.observations(x, y)?;
        Ok(self.graph.logpdf(&obs))
    }

    /// Conditions the model on data `y` at input locations `x`, with the same
    /// missing-data handling as [Ilmm::logpdf].
    ///
    /// Returns a brand-new model over the same graph whose latent processes
    /// are the exact posteriors of the originals given the joint observation
    /// set; the mixing matrix and noise parameters are carried over unchanged
    /// and nothing is mutated in `self`.
    pub fn condition(
        &self,
        x: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        y: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<Ilmm> {
        let obs = self.observations(x, y)?;
        debug!(
            "conditioning {} latent processes on {} observed points",
            self.nb_latents(),
            obs.len()
        );
        let posteriors = self
            .latents
            .iter()
            .map(|latent| latent.condition(&obs))
            .collect();
        Ilmm::from_processes(
            self.graph.clone(),
            posteriors,
            self.h.clone(),
            self.noise_obs,
            self.noises_latent.clone(),
        )
    }

    /// Marginal predictions of the noisy output processes `ys` at locations `x`.
    ///
    /// Returns `(means, lowers, uppers)`, each of shape `(x.len(), p)` with
    /// columns in output order; the bounds delimit the 95% central credible
    /// interval `mean +/- 1.96 * sd` of the per-point normal marginals.
    pub fn predict(
        &self,
        x: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> Result<(Array2<f64>, Array2<f64>, Array2<f64>)> {
        Ok(self.predict_processes(&self.ys, x))
    }

    /// Marginal predictions of the noiseless (denoised) output processes `fs`
    /// at locations `x`. Same conventions as [Ilmm::predict].
    pub fn predict_latent(
        &self,
        x: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> Result<(Array2<f64>, Array2<f64>, Array2<f64>)> {
        Ok(self.predict_processes(&self.fs, x))
    }

    fn predict_processes(
        &self,
        processes: &[Process],
        x: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> (Array2<f64>, Array2<f64>, Array2<f64>) {
        let n = x.len();
        let p = processes.len();
        let mut means = Array2::zeros((n, p));
        let mut lowers = Array2::zeros((n, p));
        let mut uppers = Array2::zeros((n, p));
        for (j, process) in processes.iter().enumerate() {
            let (mean, lower, upper) = process.at(x).marginals();
            means.column_mut(j).assign(&mean);
            lowers.column_mut(j).assign(&lower);
            uppers.column_mut(j).assign(&upper);
        }
        (means, lowers, uppers)
    }

    /// Draws one joint sample of the noisy output processes `ys` at locations
    /// `x` as an `(x.len(), p)` matrix.
    ///
    /// Outputs are sampled jointly, not independently: one draw over the
    /// joint covariance respects all cross-output correlations induced by
    /// the shared latent processes.
    pub fn sample_using<R: Rng>(
        &self,
        rng: &mut R,
        x: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> Result<Array2<f64>> {
        self.sample_processes(rng, &self.ys, x)
    }

    /// Draws one joint sample of the noiseless output processes `fs` at
    /// locations `x`. Same conventions as [Ilmm::sample_using].
    pub fn sample_latent_using<R: Rng>(
        &self,
        rng: &mut R,
        x: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> Result<Array2<f64>> {
        self.sample_processes(rng, &self.fs, x)
    }

    /// [Ilmm::sample_using] with the thread-local random number generator
    pub fn sample(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> Result<Array2<f64>> {
        self.sample_using(&mut thread_rng(), x)
    }

    /// [Ilmm::sample_latent_using] with the thread-local random number generator
    pub fn sample_latent(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> Result<Array2<f64>> {
        self.sample_latent_using(&mut thread_rng(), x)
    }

    fn sample_processes<R: Rng>(
        &self,
        rng: &mut R,
        processes: &[Process],
        x: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> Result<Array2<f64>> {
        let fdds: Vec<Fdd> = processes.iter().map(|p| p.at(x)).collect();
        let samples = self.graph.sample_using(rng, &fdds)?;
        let mut out = Array2::zeros((x.len(), processes.len()));
        for (j, sample) in samples.into_iter().enumerate() {
            out.column_mut(j).assign(&sample);
        }
        Ok(out)
    }
}

/// Builds the `p` output processes of mixing matrix `h` applied to `m`
/// processes: row `j` yields the process `sum_i h[j, i] * processes[i]`.
///
/// The sums are genuine nodes of the shared graph, so the correlation
/// structure among outputs is preserved exactly; zero weights are omitted
/// without changing the resulting distribution.
pub fn mix(graph: &Graph, h: &Array2<f64>, processes: &[Process]) -> Vec<Process> {
    h.rows()
        .into_iter()
        .map(|row| graph.combine(&row, processes))
        .collect()
}

/// Per-output iteration over data with missing entries.
///
/// For each output column `i` of `y` in increasing order, yields the triple
/// `(subset of x where column i is present, i, present values of y[:, i])`,
/// preserving the relative order of rows within each subset. Missing entries
/// are marked `f64::NAN`; a fully missing column yields empty subsets.
///
/// Panics if `y` does not have one row per input location.
pub fn per_output(
    x: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    y: &ArrayBase<impl Data<Elem = f64>, Ix2>,
) -> Vec<(Array1<f64>, usize, Array1<f64>)> {
    assert_eq!(
        x.len(),
        y.nrows(),
        "per-output iteration requires one data row per input location, got {} rows for {} locations",
        y.nrows(),
        x.len()
    );
    let mut out = Vec::with_capacity(y.ncols());
    for (i, column) in y.columns().into_iter().enumerate() {
        // Only return available observations
        let available: Vec<usize> = column
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nan())
            .map(|(r, _)| r)
            .collect();
        let xi = x.select(Axis(0), &available);
        let yi = column.select(Axis(0), &available);
        out.push((xi, i, yi));
    }
    out
}
