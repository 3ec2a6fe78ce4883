//! Merge benchmarks

use bytes::Bytes;
use chunkyard::upload::{ChunkStore, Merger};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use std::sync::Arc;

const CHUNK_SIZE: usize = 1024 * 1024;
const CHUNKS: u32 = 8;

fn write_slots(store: &ChunkStore, data: &Bytes) {
    for index in 0..CHUNKS {
        std::fs::write(store.slot_path("bench.bin", index), data).unwrap();
    }
}

fn benchmark_merge_buffer_sizes(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ChunkStore::new(dir.path()));
    let data = Bytes::from(vec![0xA5u8; CHUNK_SIZE]);

    let mut group = c.benchmark_group("merge_buffer_sizes");
    group.sample_size(10);
    group.throughput(Throughput::Bytes(CHUNK_SIZE as u64 * CHUNKS as u64));

    for buffer_size in [4 * 1024, 64 * 1024, 1024 * 1024].iter() {
        let merger = Merger::new(Arc::clone(&store), *buffer_size);
        let merger = &merger;
        group.bench_with_input(
            format!("{}_byte_buffer", buffer_size),
            buffer_size,
            |b, _| {
                b.to_async(&rt).iter_batched(
                    || write_slots(&store, &data),
                    |_| async move {
                        let report = merger.assemble("bench.bin", CHUNKS).await.unwrap();
                        black_box(report.bytes);
                    },
                    BatchSize::PerIteration,
                );
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_merge_buffer_sizes);
criterion_main!(benches);
