use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use epigrid::parameters::Parameters;
use epigrid::partition::PartitionScheme;
use epigrid::simulation::{run_simulation, RunOptions, RunSummary};

static SEED: u64 = 123;
static GENERATIONS: u64 = 20;
static MATRIX_SIZE: usize = 128;

fn simulate(scheme: PartitionScheme, process_count: usize) -> RunSummary {
    let parameters = Parameters {
        number_of_generations: GENERATIONS,
        matrix_size: MATRIX_SIZE,
        ..Parameters::default()
    };
    let options = RunOptions {
        scheme,
        process_count,
        base_seed: Some(SEED),
        show_progress: false,
    };
    run_simulation(&parameters, &options, Vec::new()).expect("benchmark run failed")
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("generations");
    group.bench_function("single", |bencher| {
        bencher.iter(|| simulate(PartitionScheme::Single, 1));
    });
    for processes in [2, 4] {
        group.bench_with_input(
            BenchmarkId::new("strip", processes),
            &processes,
            |bencher, &processes| {
                bencher.iter(|| simulate(PartitionScheme::Strip1D, processes));
            },
        );
        group.bench_with_input(
            BenchmarkId::new("block", processes),
            &processes,
            |bencher, &processes| {
                bencher.iter(|| simulate(PartitionScheme::block(processes), processes));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
