mod common;

use std::fs;
use std::sync::Arc;

use bytebarge::pipeline::{self, CommitStatus, NullObserver};
use bytebarge::sources::blob::{BlobSource, BlobSourceParams};
use bytebarge::sources::file::{MultiFileParams, MultiFileSource};
use bytebarge::sources::TransferSource;
use bytebarge::store::memory::{MemoryBlobStore, StoreOp};
use bytebarge::targets::file::FileTarget;
use bytebarge::targets::page::{PageBlobTarget, PAGE_SIZE};

const CONTAINER: &str = "bptest";

fn file_source(path: String, block_size: u64) -> Arc<dyn TransferSource> {
    let params = MultiFileParams {
        patterns: vec![path],
        target_aliases: Vec::new(),
        keep_dir_structure: false,
        block_size,
    };
    Arc::new(MultiFileSource::open(&params).expect("source"))
}

fn page_target(store: Arc<MemoryBlobStore>) -> Arc<PageBlobTarget> {
    Arc::new(PageBlobTarget::new(
        store,
        CONTAINER,
        common::fast_retry(),
        common::no_cancel(),
    ))
}

#[test]
fn one_mib_file_is_one_create_and_one_page_write() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = common::create_page_file(dir.path(), "tb1");
    let store = Arc::new(MemoryBlobStore::new());

    let block_size = 4 * common::MIB as u64;
    let stats = pipeline::run_transfer(
        file_source(path.to_string_lossy().into_owned(), block_size),
        page_target(store.clone()),
        &common::params(block_size),
        Arc::new(NullObserver),
        common::no_cancel(),
    )
    .expect("transfer");

    assert!(stats.all_committed());
    assert_eq!(stats.bytes_transferred, common::MIB as u64);
    assert_eq!(
        store.journal(),
        vec![
            StoreOp::CreatePageBlob {
                name: "tb1".to_string(),
                size: common::MIB as u64,
            },
            StoreOp::PutPage {
                name: "tb1".to_string(),
                start: 0,
                end: common::MIB as u64 - 1,
                md5: None,
            },
        ]
    );
    let blob = store.committed_bytes(CONTAINER, "tb1").expect("blob");
    assert!(blob.iter().all(|&b| b == 1));
}

#[test]
fn every_page_write_is_aligned() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = common::create_page_file(dir.path(), "tb1");
    let store = Arc::new(MemoryBlobStore::new());

    // Smallest legal page block size exercises many writes.
    let block_size = PAGE_SIZE;
    let stats = pipeline::run_transfer(
        file_source(path.to_string_lossy().into_owned(), block_size),
        page_target(store.clone()),
        &common::params(block_size),
        Arc::new(NullObserver),
        common::no_cancel(),
    )
    .expect("transfer");

    assert!(stats.all_committed());
    let mut pages = 0;
    for op in store.journal() {
        if let StoreOp::PutPage { start, end, .. } = op {
            assert_eq!(start % PAGE_SIZE, 0);
            assert_eq!((end - start + 1) % PAGE_SIZE, 0);
            pages += 1;
        }
    }
    assert_eq!(pages, common::MIB as u64 / PAGE_SIZE);
}

#[test]
fn misaligned_source_fails_before_any_wire_call() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = common::create_file(dir.path(), "tb1");
    let store = Arc::new(MemoryBlobStore::new());

    let block_size = 4 * common::MIB as u64;
    let stats = pipeline::run_transfer(
        file_source(path.to_string_lossy().into_owned(), block_size),
        page_target(store.clone()),
        &common::params(block_size),
        Arc::new(NullObserver),
        common::no_cancel(),
    )
    .expect("transfer");

    assert!(matches!(stats.sources[0].commit, CommitStatus::Failed(_)));
    assert_eq!(stats.bytes_transferred, 0);
    assert!(store.journal().is_empty());
}

#[test]
fn page_round_trip_preserves_bytes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let dst = tempfile::tempdir().expect("tempdir");
    let path = common::create_page_file(dir.path(), "tb1");
    let original = fs::read(&path).expect("read");
    let store = Arc::new(MemoryBlobStore::new());

    let block_size = 128 * 1024;
    let mut params = common::params(block_size);
    params.md5 = true;
    let stats = pipeline::run_transfer(
        file_source(path.to_string_lossy().into_owned(), block_size),
        page_target(store.clone()),
        &params,
        Arc::new(NullObserver),
        common::no_cancel(),
    )
    .expect("upload");
    assert!(stats.all_committed());

    let source_params = BlobSourceParams {
        container: CONTAINER.to_string(),
        blob_names: vec!["tb1".to_string()],
        use_exact_name_match: true,
        target_aliases: vec!["dtb1".to_string()],
        keep_dir_structure: false,
        block_size,
    };
    let source: Arc<dyn TransferSource> =
        Arc::new(BlobSource::open(store, &source_params).expect("blob source"));
    let stats = pipeline::run_transfer(
        source,
        Arc::new(FileTarget::new(dst.path(), true)),
        &common::params(block_size),
        Arc::new(NullObserver),
        common::no_cancel(),
    )
    .expect("download");
    assert!(stats.all_committed());

    let downloaded = fs::read(dst.path().join("dtb1")).expect("read");
    assert_eq!(downloaded, original);
}
