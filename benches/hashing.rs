//! Benchmarks for the hashing pipeline and block hash computation.
//!
//! Run with: `cargo bench --bench hashing`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use linked_archiver::hashing::blocks::compute_blocks;
use linked_archiver::{algorithm_by_name, hash_and_detect, HashAlgorithm, MemoryStreamFactory, PipelineSettings};

const SIZES: &[usize] = &[64 * 1024, 1024 * 1024, 16 * 1024 * 1024];

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn algorithms(names: &[&str]) -> Vec<Arc<dyn HashAlgorithm>> {
    names.iter().filter_map(|n| algorithm_by_name(n)).collect()
}

fn bench_pipeline(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("Failed to start runtime");
    let mut group = c.benchmark_group("hash_and_detect");
    group.measurement_time(Duration::from_secs(10));

    for &size in SIZES {
        let source = MemoryStreamFactory::new(sample(size));
        group.throughput(Throughput::Bytes(size as u64));

        for (label, names) in [
            ("sha-256", &["sha-256"][..]),
            ("default", &["sha-256", "md5", "sha-1"][..]),
            ("all", &["md5", "sha-1", "sha-256", "sha-512", "blake3", "crc32"][..]),
        ] {
            let algorithms = algorithms(names);
            group.bench_with_input(BenchmarkId::new(label, size), &size, |b, _| {
                b.iter(|| {
                    runtime
                        .block_on(hash_and_detect(
                            &source,
                            &algorithms,
                            PipelineSettings::default(),
                            None,
                        ))
                        .expect("hashing succeeds")
                });
            });
        }
    }
    group.finish();
}

fn bench_blocks(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_blocks");
    let data = sample(16 * 1024 * 1024);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for piece_length in [16 * 1024u64, 256 * 1024, 4 * 1024 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(piece_length), &piece_length, |b, &len| {
            b.iter(|| compute_blocks(Cursor::new(black_box(&data[..])), len).expect("blocks computed"));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_pipeline, bench_blocks);
criterion_main!(benches);
