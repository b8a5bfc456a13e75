//! EEG-style experiment: fit an ILMM to correlated multi-channel data with a
//! hidden test window, by maximizing the joint log-density with COBYLA.
//!
//! The channels are synthesized from a ground-truth ILMM (a few slow and fast
//! latent processes mixed into every channel), a time window of the first
//! channels is hidden from training, and the fitted model is scored by the
//! standardized mean squared error (SMSE) of its predictions on the hidden
//! window. Predicted means and credible bounds are written as `.npy` files.

use cobyla::{Func, RhoBeg, StopTols, minimize};
use ilmm::{Ilmm, Normalizer};
use ilmm_gp::kernels::{Kernel, SquaredExponential};
use ndarray::{Array1, Array2};
use ndarray_npy::write_npy;
use ndarray_rand::RandomExt;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Normal;
use rand_xoshiro::Xoshiro256Plus;

/// Number of channels
const P: usize = 5;
/// Number of latent processes
const M: usize = 2;
/// Number of time points
const N: usize = 80;

/// Hidden test window: `x` in this range is removed from the first channels
const TEST_WINDOW: (f64, f64) = (0.5, 0.75);
/// Channels whose test window is hidden
const TEST_CHANNELS: usize = 2;

/// Parameter vector layout, all positive parameters on log10 scale:
/// `[log10 var_i; m] [log10 scale_i; m] [log10 noise_obs]
///  [log10 noise_latent_i; m] [h_ji; p*m]`
fn construct_model(params: &[f64]) -> ilmm::Result<Ilmm> {
    let base: f64 = 10.;
    let kernels: Vec<Box<dyn Kernel>> = (0..M)
        .map(|i| {
            Box::new(
                SquaredExponential::default()
                    .variance(base.powf(params[i]))
                    .lengthscale(base.powf(params[M + i])),
            ) as Box<dyn Kernel>
        })
        .collect();
    let noise_obs = base.powf(params[2 * M]);
    let noises_latent = Array1::from_iter((0..M).map(|i| base.powf(params[2 * M + 1 + i])));
    let h = Array2::from_shape_vec((P, M), params[3 * M + 1..].to_vec())
        .expect("mixing entries count");
    Ilmm::from_kernels(kernels, h, noise_obs, noises_latent)
}

fn main() {
    env_logger::init();
    let mut rng = Xoshiro256Plus::seed_from_u64(42);

    // Ground truth: slow and fast latents mixed into every channel
    let x = Array1::linspace(0., 1., N);
    let truth_kernels: Vec<Box<dyn Kernel>> = vec![
        Box::new(SquaredExponential::default().lengthscale(0.08)),
        Box::new(SquaredExponential::default().lengthscale(0.25)),
    ];
    let h_true = Array2::random_using((P, M), Normal::new(0., 1.).unwrap(), &mut rng)
        .mapv(|v: f64| v / (M as f64).sqrt());
    let truth = Ilmm::from_kernels(truth_kernels, h_true, 0.05, Array1::zeros(M))
        .expect("ground-truth model");
    let y_full = truth.sample_using(&mut rng, &x).expect("ground-truth sample");

    // Hide the test window of the first channels
    let mut y_train = y_full.clone();
    for (r, t) in x.iter().enumerate() {
        if *t >= TEST_WINDOW.0 && *t <= TEST_WINDOW.1 {
            for c in 0..TEST_CHANNELS {
                y_train[[r, c]] = f64::NAN;
            }
        }
    }

    // Normalize channels over the present training entries
    let normalizer = Normalizer::fit(&y_train);
    let y_norm = normalizer.transform(&y_train);

    let objective = |params: &[f64], _: &mut ()| -> f64 {
        match construct_model(params) {
            Ok(model) => match model.logpdf(&x, &y_norm) {
                Ok(lp) if lp.is_finite() => -lp,
                _ => f64::INFINITY,
            },
            Err(_) => f64::INFINITY,
        }
    };

    let mut bounds = Vec::with_capacity(3 * M + 1 + P * M);
    bounds.extend(std::iter::repeat((-3.0, 1.0)).take(M)); // variances
    bounds.extend(std::iter::repeat((-2.5, 0.5)).take(M)); // lengthscales
    bounds.push((-4.0, 0.0)); // observation noise
    bounds.extend(std::iter::repeat((-5.0, -0.5)).take(M)); // latent noises
    bounds.extend(std::iter::repeat((-3.0, 3.0)).take(P * M)); // mixing entries

    // Multistart over randomized mixing matrix initializations
    let n_start = 3;
    let cons: Vec<&dyn Func<()>> = vec![];
    let mut best: Option<(f64, Vec<f64>)> = None;
    for start in 0..n_start {
        let mut init = Vec::with_capacity(bounds.len());
        init.extend(std::iter::repeat(0.0).take(M)); // variances = 1
        init.extend(std::iter::repeat(-1.0).take(M)); // lengthscales = 0.1
        init.push(-2.0); // noise_obs = 1e-2
        init.extend(std::iter::repeat(-2.0).take(M)); // latent noises = 1e-2
        let h_init: Array1<f64> =
            Array1::random_using(P * M, Normal::new(0., 1.).unwrap(), &mut rng);
        init.extend(h_init.iter());

        match minimize(
            |params, u| objective(params, u),
            &init,
            &bounds,
            &cons,
            (),
            200,
            RhoBeg::All(0.5),
            Some(StopTols {
                ftol_rel: 1e-4,
                ..StopTols::default()
            }),
        ) {
            Ok((_, params_opt, fval)) => {
                log::info!("start {start}: neg-logpdf = {fval}");
                if best.as_ref().map_or(true, |(b, _)| fval < *b) {
                    best = Some((fval, params_opt));
                }
            }
            Err((status, _, _)) => {
                log::warn!("start {start}: COBYLA failed with status {status:?}");
            }
        }
    }
    let (fval, params_opt) = best.expect("at least one COBYLA start succeeded");
    println!("fitted neg-logpdf: {fval:.3}");

    // Condition the fitted model and predict over the full time axis
    let model = construct_model(&params_opt).expect("fitted model");
    let model = model.condition(&x, &y_norm).expect("conditioning");
    let (means, lowers, uppers) = model.predict(&x).expect("prediction");
    let means = normalizer.inverse_transform(&means);
    let lowers = normalizer.inverse_transform(&lowers);
    let uppers = normalizer.inverse_transform(&uppers);

    // SMSE over the hidden entries against the ground-truth draw
    let mut hidden = Vec::new();
    for r in 0..N {
        for c in 0..P {
            if y_train[[r, c]].is_nan() {
                hidden.push((means[[r, c]], y_full[[r, c]]));
            }
        }
    }
    let actual_mean = hidden.iter().map(|(_, a)| a).sum::<f64>() / hidden.len() as f64;
    let mse = hidden.iter().map(|(p, a)| (p - a) * (p - a)).sum::<f64>() / hidden.len() as f64;
    let var = hidden
        .iter()
        .map(|(_, a)| (a - actual_mean) * (a - actual_mean))
        .sum::<f64>()
        / hidden.len() as f64;
    println!("SMSE on hidden window: {:.4}", mse / var);

    write_npy("eeg_means.npy", &means).expect("cannot save means");
    write_npy("eeg_lowers.npy", &lowers).expect("cannot save lower bounds");
    write_npy("eeg_uppers.npy", &uppers).expect("cannot save upper bounds");
}
