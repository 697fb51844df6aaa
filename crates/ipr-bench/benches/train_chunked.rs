// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ipr_core::{ExecutionContext, InMemoryRecordSource, Record};
use ipr_engine::{IprChecker, IprConfig, TrainableChecker};

fn wave_numbers(m: usize) -> Vec<f64> {
    (0..m).map(|i| 400.0 + 2.0 * i as f64).collect()
}

fn population(n: usize, m: usize) -> InMemoryRecordSource {
    let waves = wave_numbers(m);
    let records = (0..n)
        .map(|id| {
            let amplitudes: Vec<f64> = (0..m)
                .map(|k| ((id * 31 + k * 7) % 97) as f64 / 97.0)
                .collect();
            Record::from_points(id as u64, &waves, &amplitudes)
                .with_field("moisture", 10.0 + (id % 13) as f64)
        })
        .collect();
    InMemoryRecordSource::new(records).expect("benchmark ids should be unique")
}

fn bench_train(c: &mut Criterion, case_id: &str, n: usize, m: usize, chunk_size: usize) {
    let source = population(n, m);
    let checker = IprChecker::new(IprConfig {
        chunk_size,
        ..IprConfig::default()
    })
    .expect("benchmark config should be valid");
    let ctx = ExecutionContext::new();

    c.bench_function(case_id, |b| {
        b.iter(|| {
            checker
                .train(black_box(&source), black_box(&ctx))
                .expect("benchmark training should succeed");
        })
    });
}

fn benchmark_train_n1e4_m256(c: &mut Criterion) {
    bench_train(c, "train_n1e4_m256_chunk1000", 10_000, 256, 1_000);
}

fn benchmark_train_n1e4_m256_small_chunks(c: &mut Criterion) {
    bench_train(c, "train_n1e4_m256_chunk100", 10_000, 256, 100);
}

criterion_group!(
    benches,
    benchmark_train_n1e4_m256,
    benchmark_train_n1e4_m256_small_chunks
);
criterion_main!(benches);
