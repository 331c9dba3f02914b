use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use bytebarge::pipeline::{self, NullObserver, TransferParams};
use bytebarge::retry::RetryPolicy;
use bytebarge::sources::file::{MultiFileParams, MultiFileSource};
use bytebarge::sources::TransferSource;
use bytebarge::store::memory::MemoryBlobStore;
use bytebarge::targets::block::BlockBlobTarget;

const MIB: usize = 1024 * 1024;

fn params(block_size: u64) -> TransferParams {
    TransferParams {
        block_size,
        num_readers: 4,
        num_workers: 4,
        pool_size: 8,
        md5: false,
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter_pct: 0,
        },
    }
}

fn write_input(dir: &std::path::Path, size: usize) -> std::path::PathBuf {
    let path = dir.join("input.bin");
    let mut file = File::create(&path).expect("create");
    let chunk = vec![0xA5u8; MIB];
    let mut remaining = size;
    while remaining > 0 {
        let n = remaining.min(chunk.len());
        file.write_all(&chunk[..n]).expect("write");
        remaining -= n;
    }
    file.flush().expect("flush");
    path
}

fn run_upload(path: &std::path::Path, block_size: u64) {
    let source_params = MultiFileParams {
        patterns: vec![path.to_string_lossy().into_owned()],
        target_aliases: Vec::new(),
        keep_dir_structure: false,
        block_size,
    };
    let source: Arc<dyn TransferSource> =
        Arc::new(MultiFileSource::open(&source_params).expect("source"));
    let store = Arc::new(MemoryBlobStore::new());
    let target = Arc::new(BlockBlobTarget::new(
        store,
        "bench",
        RetryPolicy::default(),
        Arc::new(std::sync::atomic::AtomicBool::new(false)),
    ));
    let stats = pipeline::run_transfer(
        source,
        target,
        &params(block_size),
        Arc::new(NullObserver),
        Arc::new(std::sync::atomic::AtomicBool::new(false)),
    )
    .expect("transfer");
    assert!(stats.all_committed());
}

fn bench_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("transfer");
    for size in [8 * MIB, 32 * MIB] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("file_to_block", size), &size, |b, &size| {
            let temp_dir = tempfile::tempdir().expect("tempdir");
            let path = write_input(temp_dir.path(), size);
            b.iter(|| run_upload(&path, MIB as u64));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_throughput);
criterion_main!(benches);
