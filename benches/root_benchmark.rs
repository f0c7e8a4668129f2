use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stochroot::linalg::fractional_power_chain;
use stochroot::matrix::{DEFAULT_ROW_SUM_TOLERANCE, MatrixBuilder, TransitionMatrix};
use stochroot::root::StochasticRootEngine;
use stochroot::schema::ColumnSchema;

fn random_transition(size: usize) -> TransitionMatrix {
    let mut rng = StdRng::seed_from_u64(0x5EED_F64 + size as u64);
    let mut values = Array2::<f64>::zeros((size, size));
    for from in 0..size - 1 {
        let mut row: Vec<f64> = (0..size).map(|_| rng.gen_range(0.01..1.0)).collect();
        row[from] += 2.0;
        let total: f64 = row.iter().sum();
        for (to, value) in row.into_iter().enumerate() {
            values[[from, to]] = value / total;
        }
    }
    MatrixBuilder::new(ColumnSchema::new(size, "hrs"), DEFAULT_ROW_SUM_TOLERANCE)
        .from_rows(values)
        .expect("random rows are stochastic")
}

fn benchmark_roots(c: &mut Criterion) {
    let sizes = [6_usize, 12, 24];
    let matrices: Vec<_> = sizes
        .iter()
        .map(|&size| (size, random_transition(size)))
        .collect();
    let engine = StochasticRootEngine::default();

    let mut group = c.benchmark_group("stochastic_root");
    for (size, matrix) in matrices.iter() {
        group.throughput(Throughput::Elements((*size * *size) as u64));

        group.bench_with_input(BenchmarkId::new("engine", size), matrix, |b, input| {
            b.iter(|| {
                let outcome = engine.compute_root(black_box(input), 0.5);
                black_box(outcome.is_ok());
            });
        });

        let owned = matrix.values().to_owned();
        group.bench_with_input(BenchmarkId::new("square_root_chain", size), &owned, |b, input| {
            b.iter(|| {
                let root = fractional_power_chain(black_box(input), 0.5, 1e-13);
                black_box(root.is_ok());
            });
        });
    }
    group.finish();
}

criterion_group!(stochastic_root, benchmark_roots);
criterion_main!(stochastic_root);
