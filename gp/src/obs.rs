use std::rc::Rc;

use linfa_linalg::cholesky::*;
use linfa_linalg::triangular::*;
use log::debug;
use ndarray::{Array1, Array2, Axis, s};

use crate::errors::{GpError, Result};
use crate::graph::{Fdd, Graph, Process};

/// Fixed diagonal jitter added to joint observation covariances before
/// factorization, for numerical stability.
pub(crate) const JITTER: f64 = 1e-10;

/// Cached joint-observation state shared by every posterior conditioned on it.
pub(crate) struct ObsCore {
    /// Observed evaluations as (node, input locations), in registration order
    pub(crate) fdds: Vec<(usize, Array1<f64>)>,
    /// Observed values minus prior means, stacked in registration order
    pub(crate) residual: Array1<f64>,
    /// Lower Cholesky factor of the joint covariance (with jitter)
    pub(crate) l_chol: Array2<f64>,
    /// Joint covariance inverse applied to the residual
    pub(crate) alpha: Array1<f64>,
}

impl ObsCore {
    /// Total number of observed points
    pub(crate) fn len(&self) -> usize {
        self.residual.len()
    }

    /// Applies the inverse of the joint covariance to `rhs` through the
    /// cached Cholesky factor. The empty observation set is the identity
    /// on an empty right-hand side.
    pub(crate) fn solve(&self, rhs: Array2<f64>) -> Array2<f64> {
        if self.len() == 0 {
            return rhs;
        }
        let v = self.l_chol.solve_triangular(&rhs, UPLO::Lower).unwrap();
        self.l_chol
            .t()
            .solve_triangular_into(v, UPLO::Upper)
            .unwrap()
    }
}

/// A joint observation set: a collection of (evaluated process, observed
/// values) pairs of one graph, with the joint covariance Cholesky factor
/// computed once and cached.
///
/// Conditioning any process of the graph on the set ([Process::condition]) and
/// evaluating the joint log-density ([Graph::logpdf]) both reuse the cache.
pub struct Observations {
    graph: Graph,
    pub(crate) core: Rc<ObsCore>,
}

impl Observations {
    /// Builds a joint observation set from (evaluation, values) pairs.
    ///
    /// An empty set is valid: its log-density is zero and conditioning on it
    /// returns the prior.
    ///
    /// Errors if values and evaluation lengths disagree; surfaces the backend
    /// error unchanged if the joint covariance is not positive definite.
    /// Panics if an evaluation belongs to another graph.
    pub fn new(graph: &Graph, pairs: Vec<(Fdd, Array1<f64>)>) -> Result<Observations> {
        for (fdd, values) in &pairs {
            assert!(
                fdd.graph().same_graph(graph),
                "cannot observe an evaluation from another graph"
            );
            if fdd.len() != values.len() {
                return Err(GpError::ShapeMismatch(format!(
                    "observation of {} values at {} input locations",
                    values.len(),
                    fdd.len()
                )));
            }
        }

        let fdds: Vec<(usize, Array1<f64>)> = pairs
            .iter()
            .map(|(fdd, _)| (fdd.node(), fdd.x().to_owned()))
            .collect();
        let total: usize = fdds.iter().map(|(_, x)| x.len()).sum();

        let mut residual = Array1::zeros(total);
        let mut offset = 0;
        for (fdd, values) in &pairs {
            let prior_mean = fdd.mean();
            residual
                .slice_mut(s![offset..offset + values.len()])
                .assign(&(values - &prior_mean));
            offset += values.len();
        }

        let (l_chol, alpha) = if total == 0 {
            (Array2::zeros((0, 0)), Array1::zeros(0))
        } else {
            let mut koo = Array2::zeros((total, total));
            let mut ro = 0;
            for (anode, ax) in &fdds {
                let mut co = 0;
                for (bnode, bx) in &fdds {
                    let block = graph.node_cov(*anode, ax, *bnode, bx);
                    koo.slice_mut(s![ro..ro + ax.len(), co..co + bx.len()])
                        .assign(&block);
                    co += bx.len();
                }
                ro += ax.len();
            }
            for d in 0..total {
                koo[[d, d]] += JITTER;
            }
            let l_chol = koo.cholesky()?;
            let v = l_chol.solve_triangular(&residual.clone().insert_axis(Axis(1)), UPLO::Lower)?;
            let alpha = l_chol
                .t()
                .solve_triangular_into(v, UPLO::Upper)?
                .remove_axis(Axis(1));
            (l_chol, alpha)
        };

        debug!(
            "assembled joint observation set: {} evaluations, {} points",
            fdds.len(),
            total
        );

        Ok(Observations {
            graph: graph.clone(),
            core: Rc::new(ObsCore {
                fdds,
                residual,
                l_chol,
                alpha,
            }),
        })
    }

    /// Total number of observed points
    pub fn len(&self) -> usize {
        self.core.len()
    }

    /// Whether the set holds no observation
    pub fn is_empty(&self) -> bool {
        self.core.len() == 0
    }

    pub(crate) fn graph(&self) -> &Graph {
        &self.graph
    }
}

impl Graph {
    /// Exact joint Gaussian log-density of an observation set.
    ///
    /// The empty set has log-density zero. Panics if the set was built
    /// against another graph.
    pub fn logpdf(&self, obs: &Observations) -> f64 {
        assert!(
            self.same_graph(obs.graph()),
            "cannot evaluate observations from another graph"
        );
        let n = obs.core.len();
        if n == 0 {
            return 0.0;
        }
        let quad = obs.core.residual.dot(&obs.core.alpha);
        // determinant from the Cholesky diagonal
        let logdet = obs.core.l_chol.diag().mapv(f64::ln).sum() * 2.0;
        -0.5 * (quad + logdet + n as f64 * (2.0 * std::f64::consts::PI).ln())
    }
}

impl Process {
    /// Exact posterior of this process given a joint observation set,
    /// as a new process of the same graph. The prior is left untouched.
    ///
    /// Panics if the set was built against another graph.
    pub fn condition(&self, obs: &Observations) -> Process {
        assert!(
            self.graph.same_graph(obs.graph()),
            "cannot condition on observations from another graph"
        );
        self.graph.push_posterior(self.node, Rc::clone(&obs.core))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{SquaredExponential, White};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_logpdf_single_point_closed_form() {
        let graph = Graph::new();
        let f = graph.gp(Box::new(SquaredExponential::default().variance(2.0)));
        let y = 0.7;
        let obs = Observations::new(&graph, vec![(f.at(&array![0.0]), array![y])]).unwrap();
        let var = 2.0;
        let expected = -0.5 * (y * y / var + var.ln() + (2.0 * std::f64::consts::PI).ln());
        assert_abs_diff_eq!(graph.logpdf(&obs), expected, epsilon = 1e-6);
    }

    #[test]
    fn test_posterior_interpolates_observations() {
        let graph = Graph::new();
        let f = graph.gp(Box::new(SquaredExponential::default().lengthscale(0.4)));
        let x = array![0.0, 0.3, 0.6, 0.9];
        let y = array![0.5, -0.2, 0.1, 0.8];
        let obs = Observations::new(&graph, vec![(f.at(&x), y.clone())]).unwrap();
        let post = f.condition(&obs);
        assert_abs_diff_eq!(post.at(&x).mean(), y, epsilon = 1e-4);
        for v in post.at(&x).var() {
            assert!(v < 1e-6, "posterior variance at observed point: {v}");
        }
    }

    #[test]
    fn test_conditioning_reduces_variance() {
        let graph = Graph::new();
        let f = graph.gp(Box::new(SquaredExponential::default()));
        let noisy = &f + &graph.gp(Box::new(White::new(0.1)));
        let x = array![0.0, 0.5, 1.0];
        let obs = Observations::new(&graph, vec![(noisy.at(&x), array![0.1, 0.2, 0.0])]).unwrap();
        let post = f.condition(&obs);
        let xs = array![0.25, 0.75];
        let prior_var = f.at(&xs).var();
        let post_var = post.at(&xs).var();
        for (pv, qv) in prior_var.iter().zip(post_var.iter()) {
            assert!(qv < pv, "posterior variance {qv} not below prior {pv}");
        }
    }

    #[test]
    fn test_empty_observation_set() {
        let graph = Graph::new();
        let f = graph.gp(Box::new(SquaredExponential::default()));
        let obs = Observations::new(&graph, vec![]).unwrap();
        assert!(obs.is_empty());
        assert_abs_diff_eq!(graph.logpdf(&obs), 0.0, epsilon = 1e-14);
        // conditioning on nothing returns the prior
        let post = f.condition(&obs);
        let x = array![0.0, 0.7];
        assert_abs_diff_eq!(post.at(&x).mean(), f.at(&x).mean(), epsilon = 1e-14);
        assert_abs_diff_eq!(post.at(&x).cov(), f.at(&x).cov(), epsilon = 1e-14);
    }

    #[test]
    fn test_sequential_conditioning_matches_joint() {
        let graph = Graph::new();
        let f = graph.gp(Box::new(SquaredExponential::default().lengthscale(0.5)));
        let noisy = &f + &graph.gp(Box::new(White::new(0.01)));
        let x1 = array![0.0, 0.4];
        let y1 = array![0.3, -0.1];
        let x2 = array![0.8];
        let y2 = array![0.5];

        // condition in one joint step
        let joint = Observations::new(
            &graph,
            vec![(noisy.at(&x1), y1.clone()), (noisy.at(&x2), y2.clone())],
        )
        .unwrap();
        let post_joint = f.condition(&joint);

        // condition in two steps; the second step observes the posterior noisy process
        let first = Observations::new(&graph, vec![(noisy.at(&x1), y1)]).unwrap();
        let noisy_post = noisy.condition(&first);
        let second = Observations::new(&graph, vec![(noisy_post.at(&x2), y2)]).unwrap();
        let post_seq = f.condition(&first).condition(&second);

        let xs = Array1::linspace(0., 1., 9);
        assert_abs_diff_eq!(
            post_seq.at(&xs).mean(),
            post_joint.at(&xs).mean(),
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            post_seq.at(&xs).var(),
            post_joint.at(&xs).var(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        let graph = Graph::new();
        let f = graph.gp(Box::new(SquaredExponential::default()));
        let res = Observations::new(&graph, vec![(f.at(&array![0.0, 1.0]), array![0.5])]);
        assert!(matches!(res, Err(GpError::ShapeMismatch(_))));
    }

    #[test]
    #[should_panic(expected = "another graph")]
    fn test_cross_graph_observation_panics() {
        let g1 = Graph::new();
        let g2 = Graph::new();
        let f = g2.gp(Box::new(SquaredExponential::default()));
        let _ = Observations::new(&g1, vec![(f.at(&array![0.0]), array![0.0])]);
    }
}
