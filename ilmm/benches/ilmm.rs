use criterion::{Criterion, criterion_group, criterion_main};
use ilmm::Ilmm;
use ilmm_gp::kernels::{Kernel, SquaredExponential};
use ndarray::{Array1, Array2};
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

fn model(p: usize, m: usize) -> Ilmm {
    let kernels: Vec<Box<dyn Kernel>> = (0..m)
        .map(|i| {
            Box::new(SquaredExponential::default().lengthscale(0.1 * (i + 1) as f64))
                as Box<dyn Kernel>
        })
        .collect();
    let mut h = Array2::zeros((p, m));
    for j in 0..p {
        for i in 0..m {
            h[[j, i]] = ((j + i) as f64).cos();
        }
    }
    Ilmm::from_kernels(kernels, h, 0.05, Array1::from_elem(m, 0.01)).expect("ILMM model")
}

fn criterion_ilmm(c: &mut Criterion) {
    let mut group = c.benchmark_group("ilmm");
    group.sample_size(10);
    for n in [50, 100] {
        let model = model(5, 2);
        let x = Array1::linspace(0., 1., n);
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let y = model.sample_using(&mut rng, &x).expect("ILMM sample");

        group.bench_function(format!("ilmm logpdf {n}"), |b| {
            b.iter(|| std::hint::black_box(model.logpdf(&x, &y).expect("ILMM logpdf")));
        });
        group.bench_function(format!("ilmm condition-predict {n}"), |b| {
            b.iter(|| {
                let conditioned = model.condition(&x, &y).expect("ILMM conditioning");
                std::hint::black_box(conditioned.predict(&x).expect("ILMM prediction"))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_ilmm);
criterion_main!(benches);
