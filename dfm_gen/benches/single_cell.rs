/// Benchmark of the per-cell implicit timestep loop

use criterion::{criterion_group, criterion_main, Criterion};

use std::path::Path;

use dfm_gen::{ModelConfig, NullProgressReporter};

fn run_single_cell() {
    let cfg = ModelConfig::parse(
        "NoRows 1\nNoCols 1\nNoFractureSets 2\nEhminRate -0.01\nEhmaxRate -0.005\nEpisodeDuration 5\n",
        Path::new("."),
    );
    let mut grid = cfg.build_grid().unwrap();
    let progress = NullProgressReporter;
    grid.run_implicit(&cfg.propagation_control(), 1, &progress);
}

fn my_benchmark(c: &mut Criterion) {
    c.bench_function("implicit_single_cell", |b| b.iter(|| run_single_cell()));
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = my_benchmark
}
criterion_main!(benches);
