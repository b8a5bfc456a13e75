use std::cell::RefCell;
use std::fmt;
use std::ops::Add;
use std::rc::Rc;

use linfa_linalg::eigh::*;
use ndarray::{Array, Array1, Array2, ArrayBase, Data, Ix1, s};
use ndarray_rand::RandomExt;
use ndarray_rand::rand::{Rng, thread_rng};
use ndarray_rand::rand_distr::Normal;

use crate::errors::Result;
use crate::kernels::Kernel;
use crate::obs::ObsCore;

/// Half-width of the 95% central credible interval of a normal marginal,
/// in standard deviations.
const CI95_FACTOR: f64 = 1.96;

pub(crate) enum Node {
    /// Zero-mean process with the given covariance kernel
    Prior(Box<dyn Kernel>),
    /// Weighted sum of other nodes
    Combine(Vec<(f64, usize)>),
    /// A node conditioned on a joint observation set
    Posterior { base: usize, obs: Rc<ObsCore> },
}

/// Lightweight copy of a node used to drive recursion without holding
/// the arena borrow across recursive calls.
#[derive(Clone)]
enum Kind {
    Prior,
    Combine(Vec<(f64, usize)>),
    Posterior(usize, Rc<ObsCore>),
}

/// A shared, append-only computation context in which processes live.
///
/// The graph is a cheap-to-clone handle with shared identity: clones refer to
/// the same node arena. Nodes are immutable once created, so a model and the
/// posteriors descended from it share the graph without sharing mutable state.
/// Handles are reference counted and must stay on one thread.
#[derive(Clone, Default)]
pub struct Graph {
    nodes: Rc<RefCell<Vec<Node>>>,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Graph({} nodes)", self.nodes.borrow().len())
    }
}

impl Graph {
    /// Creates an empty graph
    pub fn new() -> Graph {
        Graph::default()
    }

    /// Number of processes created in this graph
    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    /// Whether no process was created yet
    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    /// Whether `other` is a handle to the same graph
    pub fn same_graph(&self, other: &Graph) -> bool {
        Rc::ptr_eq(&self.nodes, &other.nodes)
    }

    pub(crate) fn push(&self, node: Node) -> usize {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(node);
        nodes.len() - 1
    }

    /// Instantiates a zero-mean process with the given covariance kernel
    pub fn gp(&self, kernel: Box<dyn Kernel>) -> Process {
        let node = self.push(Node::Prior(kernel));
        Process {
            graph: self.clone(),
            node,
        }
    }

    /// Builds the weighted sum of the given processes.
    ///
    /// Zero weights are skipped; this does not change the resulting
    /// distribution. The correlation structure with every summand is
    /// preserved exactly, as the sum is a genuine node of the graph.
    ///
    /// Panics if the weight and process counts differ or if a process
    /// belongs to another graph.
    pub fn combine(
        &self,
        weights: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        processes: &[Process],
    ) -> Process {
        assert_eq!(
            weights.len(),
            processes.len(),
            "combine requires one weight per process, got {} weights for {} processes",
            weights.len(),
            processes.len()
        );
        let mut terms = Vec::with_capacity(processes.len());
        for (w, p) in weights.iter().zip(processes) {
            assert!(
                self.same_graph(&p.graph),
                "cannot combine processes from different graphs"
            );
            if *w != 0.0 {
                terms.push((*w, p.node));
            }
        }
        let node = self.push(Node::Combine(terms));
        Process {
            graph: self.clone(),
            node,
        }
    }

    /// Draws one joint sample across all given evaluated processes.
    ///
    /// The sample respects every cross-process correlation: a single joint
    /// covariance over all points is factorized by symmetric eigendecomposition
    /// with small negative eigenvalues clipped to zero, so that rank-deficient
    /// joint covariances sample cleanly.
    ///
    /// Panics if an evaluation belongs to another graph.
    pub fn sample_using<R: Rng>(&self, rng: &mut R, fdds: &[Fdd]) -> Result<Vec<Array1<f64>>> {
        for fdd in fdds {
            assert!(
                self.same_graph(&fdd.graph),
                "cannot sample an evaluation from another graph"
            );
        }
        let total: usize = fdds.iter().map(|f| f.len()).sum();
        if total == 0 {
            return Ok(fdds.iter().map(|f| Array1::zeros(f.len())).collect());
        }

        let mut mean = Array1::zeros(total);
        let mut cov = Array2::zeros((total, total));
        let mut ro = 0;
        for fa in fdds {
            mean.slice_mut(s![ro..ro + fa.len()]).assign(&fa.mean());
            let mut co = 0;
            for fb in fdds {
                let block = self.node_cov(fa.node, &fa.x, fb.node, &fb.x);
                cov.slice_mut(s![ro..ro + fa.len(), co..co + fb.len()])
                    .assign(&block);
                co += fb.len();
            }
            ro += fa.len();
        }

        let (vals, vecs) = cov.eigh_into()?;
        let vals = vals.mapv(|v| {
            // We lower bound the eigenvalues at 1e-9
            if v < 1e-9 {
                return 0.0;
            }
            v.sqrt()
        });
        let factor = vecs.dot(&Array2::from_diag(&vals));

        let normal = Normal::new(0., 1.).unwrap();
        let z: Array1<f64> = Array::random_using(total, normal, rng);
        let joint = mean + factor.dot(&z);

        let mut out = Vec::with_capacity(fdds.len());
        let mut off = 0;
        for fdd in fdds {
            out.push(joint.slice(s![off..off + fdd.len()]).to_owned());
            off += fdd.len();
        }
        Ok(out)
    }

    /// Draws one joint sample across all given evaluated processes using
    /// the thread-local random number generator. See [Graph::sample_using].
    pub fn sample(&self, fdds: &[Fdd]) -> Result<Vec<Array1<f64>>> {
        self.sample_using(&mut thread_rng(), fdds)
    }

    fn kind(&self, node: usize) -> Kind {
        match &self.nodes.borrow()[node] {
            Node::Prior(_) => Kind::Prior,
            Node::Combine(terms) => Kind::Combine(terms.clone()),
            Node::Posterior { base, obs } => Kind::Posterior(*base, Rc::clone(obs)),
        }
    }

    fn prior_matrix(&self, node: usize, xa: &Array1<f64>, xb: &Array1<f64>) -> Array2<f64> {
        match &self.nodes.borrow()[node] {
            Node::Prior(kernel) => kernel.matrix(xa, xb),
            _ => unreachable!("prior_matrix called on a non-prior node"),
        }
    }

    /// Mean of a node at the given input locations, under the measure the
    /// node lives in (posterior nodes include their conditioning correction).
    pub(crate) fn node_mean(&self, node: usize, x: &Array1<f64>) -> Array1<f64> {
        match self.kind(node) {
            Kind::Prior => Array1::zeros(x.len()),
            Kind::Combine(terms) => {
                let mut mean = Array1::zeros(x.len());
                for (w, term) in terms {
                    mean = mean + self.node_mean(term, x).mapv(|v| w * v);
                }
                mean
            }
            Kind::Posterior(base, obs) => {
                let k = self.obs_cross(&obs, base, x);
                self.node_mean(base, x) + k.t().dot(&obs.alpha)
            }
        }
    }

    /// Cross-covariance between two nodes at the given input locations,
    /// with shape `(xa.len(), xb.len())`.
    ///
    /// Covariance is bilinear through sums, zero across distinct priors, and
    /// corrected by the observation set through posterior nodes. Posteriors
    /// sharing one observation set are handled jointly so that correlations
    /// induced by common conditioning are exact.
    pub(crate) fn node_cov(
        &self,
        a: usize,
        xa: &Array1<f64>,
        b: usize,
        xb: &Array1<f64>,
    ) -> Array2<f64> {
        match (self.kind(a), self.kind(b)) {
            (Kind::Combine(terms), _) => {
                let mut cov = Array2::zeros((xa.len(), xb.len()));
                for (w, term) in terms {
                    cov = cov + self.node_cov(term, xa, b, xb).mapv(|v| w * v);
                }
                cov
            }
            (_, Kind::Combine(terms)) => {
                let mut cov = Array2::zeros((xa.len(), xb.len()));
                for (w, term) in terms {
                    cov = cov + self.node_cov(a, xa, term, xb).mapv(|v| w * v);
                }
                cov
            }
            (Kind::Posterior(base, obs), kind_b) => {
                // A posterior on the same observation set is reduced to its
                // base; its correction is carried by the joint term below.
                let b_eff = match kind_b {
                    Kind::Posterior(pb, ref ob) if Rc::ptr_eq(&obs, ob) => pb,
                    _ => b,
                };
                let ka = self.obs_cross(&obs, base, xa);
                let kb = self.obs_cross(&obs, b_eff, xb);
                self.node_cov(base, xa, b_eff, xb) - ka.t().dot(&obs.solve(kb))
            }
            (_, Kind::Posterior(..)) => self.node_cov(b, xb, a, xa).reversed_axes(),
            (Kind::Prior, Kind::Prior) => {
                if a == b {
                    self.prior_matrix(a, xa, xb)
                } else {
                    // distinct priors are independent
                    Array2::zeros((xa.len(), xb.len()))
                }
            }
        }
    }

    /// Cross-covariance between all observed points of `obs` (stacked in
    /// observation order) and a target node, with shape `(obs.len(), x.len())`.
    pub(crate) fn obs_cross(&self, obs: &ObsCore, node: usize, x: &Array1<f64>) -> Array2<f64> {
        let mut k = Array2::zeros((obs.len(), x.len()));
        let mut row = 0;
        for (onode, ox) in &obs.fdds {
            let block = self.node_cov(*onode, ox, node, x);
            k.slice_mut(s![row..row + ox.len(), ..]).assign(&block);
            row += ox.len();
        }
        k
    }

    pub(crate) fn push_posterior(&self, base: usize, obs: Rc<ObsCore>) -> Process {
        let node = self.push(Node::Posterior { base, obs });
        Process {
            graph: self.clone(),
            node,
        }
    }
}

/// A handle to a stochastic process living in a [Graph].
#[derive(Clone, Debug)]
pub struct Process {
    pub(crate) graph: Graph,
    pub(crate) node: usize,
}

impl Process {
    /// The graph this process lives in
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Evaluates the process at a finite set of input locations,
    /// yielding its finite-dimensional distribution
    pub fn at(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> Fdd {
        Fdd {
            graph: self.graph.clone(),
            node: self.node,
            x: x.to_owned(),
        }
    }
}

/// Exact sum of two processes of the same graph.
///
/// Panics if the processes live in different graphs.
impl Add<&Process> for &Process {
    type Output = Process;

    fn add(self, rhs: &Process) -> Process {
        assert!(
            self.graph.same_graph(&rhs.graph),
            "cannot add processes from different graphs"
        );
        let node = self
            .graph
            .push(Node::Combine(vec![(1.0, self.node), (1.0, rhs.node)]));
        Process {
            graph: self.graph.clone(),
            node,
        }
    }
}

/// The finite-dimensional distribution of a process evaluated at a
/// finite set of input locations.
#[derive(Clone, Debug)]
pub struct Fdd {
    pub(crate) graph: Graph,
    pub(crate) node: usize,
    pub(crate) x: Array1<f64>,
}

impl Fdd {
    /// Input locations of the evaluation
    pub fn x(&self) -> &Array1<f64> {
        &self.x
    }

    /// Number of evaluation points
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Whether the evaluation holds no point
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub(crate) fn node(&self) -> usize {
        self.node
    }

    pub(crate) fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Mean vector of the distribution
    pub fn mean(&self) -> Array1<f64> {
        self.graph.node_mean(self.node, &self.x)
    }

    /// Covariance matrix of the distribution
    pub fn cov(&self) -> Array2<f64> {
        self.graph.node_cov(self.node, &self.x, self.node, &self.x)
    }

    /// Marginal variances, the diagonal of [Fdd::cov].
    ///
    /// Variances might be slightly negative depending on machine precision:
    /// set to zero in that case.
    pub fn var(&self) -> Array1<f64> {
        self.cov()
            .diag()
            .mapv(|v| if v < 0.0 { 0.0 } else { v })
    }

    /// Per-point marginal summary as `(mean, lower, upper)` where the bounds
    /// delimit the 95% central credible interval `mean +/- 1.96 * sd` of the
    /// normal marginal.
    pub fn marginals(&self) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
        let mean = self.mean();
        let half = self.var().mapv(|v| CI95_FACTOR * v.sqrt());
        let lower = &mean - &half;
        let upper = &mean + &half;
        (mean, lower, upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{SquaredExponential, White};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ndarray_rand::rand::SeedableRng;
    use rand_xoshiro::Xoshiro256Plus;

    #[test]
    fn test_prior_moments_match_kernel() {
        let graph = Graph::new();
        let kernel = SquaredExponential::default().variance(2.0).lengthscale(0.5);
        let f = graph.gp(Box::new(kernel));
        let x = array![0.0, 0.3, 1.0];
        let fdd = f.at(&x);
        assert_abs_diff_eq!(fdd.mean(), Array1::zeros(3), epsilon = 1e-14);
        assert_abs_diff_eq!(fdd.cov(), kernel.matrix(&x, &x), epsilon = 1e-14);
    }

    #[test]
    fn test_distinct_priors_are_independent() {
        let graph = Graph::new();
        let a = graph.gp(Box::new(SquaredExponential::default()));
        let b = graph.gp(Box::new(SquaredExponential::default()));
        let x = array![0.0, 1.0];
        let cross = graph.node_cov(a.node, &x, b.node, &x);
        assert_abs_diff_eq!(cross, Array2::zeros((2, 2)), epsilon = 1e-14);
    }

    #[test]
    fn test_add_matches_unit_combine() {
        let graph = Graph::new();
        let a = graph.gp(Box::new(SquaredExponential::default()));
        let b = graph.gp(Box::new(White::new(0.1)));
        let sum = &a + &b;
        let combined = graph.combine(&array![1.0, 1.0], &[a, b]);
        let x = array![0.0, 0.4, 0.9];
        assert_abs_diff_eq!(sum.at(&x).cov(), combined.at(&x).cov(), epsilon = 1e-12);
        assert_abs_diff_eq!(sum.at(&x).mean(), combined.at(&x).mean(), epsilon = 1e-12);
    }

    #[test]
    fn test_zero_weight_omission() {
        let graph = Graph::new();
        let a = graph.gp(Box::new(SquaredExponential::default()));
        let b = graph.gp(Box::new(SquaredExponential::default().variance(5.0)));
        let x = array![0.0, 0.5];
        let only_a = graph.combine(&array![1.0, 0.0], &[a.clone(), b]);
        assert_abs_diff_eq!(only_a.at(&x).cov(), a.at(&x).cov(), epsilon = 1e-14);
    }

    #[test]
    fn test_combine_variance_scales_quadratically() {
        let graph = Graph::new();
        let a = graph.gp(Box::new(SquaredExponential::default()));
        let scaled = graph.combine(&array![3.0], &[a.clone()]);
        let x = array![0.2];
        assert_abs_diff_eq!(scaled.at(&x).var()[0], 9.0 * a.at(&x).var()[0], epsilon = 1e-12);
    }

    #[test]
    fn test_marginals_bounds() {
        let graph = Graph::new();
        let f = graph.gp(Box::new(SquaredExponential::default().variance(4.0)));
        let (mean, lower, upper) = f.at(&array![0.0]).marginals();
        // sd = 2, 95% interval is mean +/- 3.92
        assert_abs_diff_eq!(mean[0], 0.0, epsilon = 1e-14);
        assert_abs_diff_eq!(lower[0], -3.92, epsilon = 1e-12);
        assert_abs_diff_eq!(upper[0], 3.92, epsilon = 1e-12);
    }

    #[test]
    fn test_joint_sampling_correlation() {
        // two unit-weight copies of the same latent are perfectly correlated,
        // so one joint draw yields identical values for both
        let graph = Graph::new();
        let latent = graph.gp(Box::new(SquaredExponential::default().lengthscale(0.3)));
        let y0 = graph.combine(&array![1.0], &[latent.clone()]);
        let y1 = graph.combine(&array![1.0], &[latent]);
        let x = Array1::linspace(0., 1., 7);
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let samples = graph
            .sample_using(&mut rng, &[y0.at(&x), y1.at(&x)])
            .unwrap();
        assert_abs_diff_eq!(samples[0], samples[1], epsilon = 1e-6);
    }

    #[test]
    fn test_sample_shapes() {
        let graph = Graph::new();
        let f = graph.gp(Box::new(SquaredExponential::default()));
        let g = graph.gp(Box::new(White::new(0.5)));
        let x = Array1::linspace(0., 1., 5);
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let samples = graph.sample_using(&mut rng, &[f.at(&x), g.at(&x)]).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].len(), 5);
        assert_eq!(samples[1].len(), 5);
    }

    #[test]
    #[should_panic(expected = "different graphs")]
    fn test_cross_graph_add_panics() {
        let g1 = Graph::new();
        let g2 = Graph::new();
        let a = g1.gp(Box::new(SquaredExponential::default()));
        let b = g2.gp(Box::new(SquaredExponential::default()));
        let _ = &a + &b;
    }
}
