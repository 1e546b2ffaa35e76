//! Benchmarks for vector index operations.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use cardlens::catalog::{HnswConfig, HnswIndex};
use uuid::Uuid;

fn pseudo_vector(seed: u64, dim: usize) -> Vec<f32> {
    let mut state = seed.wrapping_mul(0x9e37_79b9_7f4a_7c15).wrapping_add(1);
    let mut v = Vec::with_capacity(dim);
    for _ in 0..dim {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        v.push(((state % 2000) as f32 / 1000.0) - 1.0);
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.into_iter().map(|x| x / norm).collect()
}

fn build_index(size: usize) -> HnswIndex {
    let mut index = HnswIndex::with_seed(HnswConfig::default(), 17);
    for i in 0..size {
        index.insert(Uuid::new_v4(), pseudo_vector(i as u64, 512));
    }
    index
}

fn build_benchmark(c: &mut Criterion) {
    c.bench_function("hnsw_build_500", |b| b.iter(|| build_index(500)));
}

fn search_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("hnsw_search");

    for size in [1_000usize, 5_000] {
        let index = build_index(size);
        let query = pseudo_vector(424_242, 512);

        group.bench_with_input(BenchmarkId::new("top10", size), &size, |b, _| {
            b.iter(|| index.search(&query, 10))
        });
    }

    group.finish();
}

criterion_group!(benches, build_benchmark, search_benchmark);
criterion_main!(benches);
