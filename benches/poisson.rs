use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use mgsolve::prelude::*;

fn build_system(n: usize) -> (DistributedMatrix<f64, SingleRank>, Vec<f64>) {
    let source = Poisson3d::new(n);
    assemble(SingleRank::new(), &source, 1).expect("assembly of a valid grid")
}

fn bench_setup(c: &mut Criterion) {
    let mut group = c.benchmark_group("amg_setup");
    for n in [8, 16] {
        group.bench_function(BenchmarkId::new("poisson3d", n * n * n), |b| {
            b.iter_batched(
                || build_system(n),
                |(a, rhs)| {
                    let _ = Solver::setup(a, rhs, Config::default(), &StripePartitioner);
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("bicgstab_solve");
    for n in [8, 16] {
        let (a, rhs) = build_system(n);
        let (mut solver, rhs) =
            Solver::setup(a, rhs, Config::default(), &StripePartitioner).expect("setup succeeds");
        group.bench_function(BenchmarkId::new("poisson3d", n * n * n), |b| {
            b.iter_batched(
                || vec![0.0; rhs.len()],
                |mut x| {
                    let _ = solver.solve(&rhs, &mut x);
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_setup, bench_solve);
criterion_main!(benches);
