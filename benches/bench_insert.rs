use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use smallworld::{Hnsw, HnswParams};

fn generate_vectors(count: usize, dim: usize) -> Vec<Vec<f32>> {
    let mut rng = fastrand::Rng::with_seed(42);
    (0..count)
        .map(|_| (0..dim).map(|_| rng.f32() * 2.0 - 1.0).collect())
        .collect()
}

fn bench_insert_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.sample_size(10);

    for size in [1000, 5000].iter() {
        let vectors = generate_vectors(*size, 128);

        group.bench_with_input(BenchmarkId::new("dim128", size), size, |b, &_size| {
            b.iter(|| {
                let mut index = Hnsw::new();
                for v in &vectors {
                    index.insert(v.clone(), None).unwrap();
                }
                black_box(index.len());
            });
        });
    }

    group.finish();
}

fn bench_insert_by_m(c: &mut Criterion) {
    let vectors = generate_vectors(2000, 64);

    let mut group = c.benchmark_group("insert_by_m");
    group.sample_size(10);

    for m in [8, 16, 24].iter() {
        group.bench_with_input(BenchmarkId::new("m", m), m, |b, &m| {
            b.iter(|| {
                let mut index = Hnsw::with_params(HnswParams::with_m(m)).unwrap();
                for v in &vectors {
                    index.insert(v.clone(), None).unwrap();
                }
                black_box(index.len());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert_throughput, bench_insert_by_m);
criterion_main!(benches);
