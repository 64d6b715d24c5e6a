use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::{Array, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use simpls_pls::{center_and_store, count_lines, fit, ExecutionMode, LayoutPolicy, PlsConfig, DEFAULT_DELIMITER};

// Uniform random data in [0, 10)
fn generate_data(n_samples: usize, n_features: usize) -> Array2<f64> {
    Array::random((n_samples, n_features), Uniform::new(0., 10.))
}

// In-memory vs out-of-core SIMPLS fit
fn bench_pls_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("PLS_fit");
    group.sample_size(10);
    let n_components = 10;

    for &(n_samples, n_features) in [(200, 50), (500, 200), (200, 1000)].iter() {
        let x = generate_data(n_samples, n_features);
        let y = generate_data(n_samples, 3);
        group.throughput(Throughput::Elements((n_samples * n_features) as u64));

        for execution in [ExecutionMode::InMemory, ExecutionMode::OutOfCore] {
            let config = PlsConfig {
                n_components,
                execution,
                ..PlsConfig::default()
            };
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", execution), format!("{}x{}", n_samples, n_features)),
                &(&x, &y),
                |b, (x, y)| b.iter(|| fit(*x, y.view(), &config).unwrap()),
            );
        }
    }
    group.finish();
}

// Streaming X·B and Xᵗ·B against a stored centered matrix
fn bench_stored_products(c: &mut Criterion) {
    let mut group = c.benchmark_group("stored_products");
    let dir = tempfile::tempdir().unwrap();

    for &(n_samples, n_features) in [(1000, 100), (100, 1000)].iter() {
        let x = generate_data(n_samples, n_features);
        let path = dir.path().join(format!("x_{}x{}.txt", n_samples, n_features));
        let stored = center_and_store(&x, &path, LayoutPolicy::MinimizeLines, DEFAULT_DELIMITER).unwrap();
        let b_cols = generate_data(n_features, 1);
        let b_rows = generate_data(n_samples, 1);
        let label = format!("{}x{} {:?}", n_samples, n_features, stored.layout());
        group.throughput(Throughput::Elements((n_samples * n_features) as u64));

        group.bench_with_input(BenchmarkId::new("dot", &label), &b_cols, |b, operand| {
            b.iter(|| stored.dot(operand.view()).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("t_dot", &label), &b_rows, |b, operand| {
            b.iter(|| stored.t_dot(operand.view()).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("count_lines", &label), &path, |b, path| {
            b.iter(|| count_lines(path).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_pls_fit, bench_stored_products);
criterion_main!(benches);
