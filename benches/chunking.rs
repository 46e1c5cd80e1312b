//! Chunk/reassemble and checksum throughput.

use acb::context::compute_checksum;
use acb::stream::Chunker;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const MIB: usize = 1024 * 1024;

fn bench_chunk_reassemble(c: &mut Criterion) {
    let chunker = match Chunker::new(MIB) {
        Ok(chunker) => chunker,
        Err(e) => panic!("chunker: {}", e),
    };
    let mut group = c.benchmark_group("chunk_reassemble");
    for size in [MIB, 8 * MIB, 32 * MIB] {
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size / MIB), &data, |b, data| {
            b.iter(|| Chunker::reassemble(chunker.chunk(black_box(data))))
        });
    }
    group.finish();
}

fn bench_checksum(c: &mut Criterion) {
    let data = vec![7u8; MIB];
    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(MIB as u64));
    group.bench_function("sha256_1mib", |b| b.iter(|| compute_checksum(black_box(&data))));
    group.finish();
}

criterion_group!(benches, bench_chunk_reassemble, bench_checksum);
criterion_main!(benches);
