//! # Transfer Pipeline
//!
//! Orchestrates the partition, read and write stages for one batch of
//! sources. Readers and workers are plain threads connected by bounded
//! channels; the buffer pool is the only other shared resource and provides
//! the backpressure that caps pipeline memory.

pub mod workers;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use crossbeam_channel::bounded;
use serde::Serialize;
use tracing::{info, warn};

use crate::buffer::BufferPool;
use crate::part::{build_parts, Part, SourceInfo, WorkerResult};
use crate::retry::RetryPolicy;
use crate::sources::TransferSource;
use crate::targets::{CommittedList, TargetPipeline};

/// Callback invoked once per part outcome, with the number of parts
/// committed so far and a snapshot of free buffers.
pub trait TransferObserver: Send + Sync {
    fn on_part(&self, result: &WorkerResult, committed_count: u64, buffers_free: usize);
}

/// Observer that discards everything.
pub struct NullObserver;

impl TransferObserver for NullObserver {
    fn on_part(&self, _result: &WorkerResult, _committed_count: u64, _buffers_free: usize) {}
}

#[derive(Debug, Clone)]
pub struct TransferParams {
    pub block_size: u64,
    pub num_readers: usize,
    pub num_workers: usize,
    pub pool_size: usize,
    pub md5: bool,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CommitStatus {
    Committed,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub source_name: String,
    pub target_alias: String,
    pub size: u64,
    pub commit: CommitStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferStats {
    pub bytes_transferred: u64,
    pub parts_succeeded: u64,
    pub parts_failed: u64,
    pub sources: Vec<SourceOutcome>,
}

impl TransferStats {
    pub fn all_committed(&self) -> bool {
        self.sources
            .iter()
            .all(|s| s.commit == CommitStatus::Committed)
    }
}

/// Per-source bookkeeping shared by readers and workers. The committed list
/// is single-writer in practice; the mutex funnels ordinal inserts and the
/// commit decision through one owner at a time.
pub(crate) struct SourceState {
    pub info: SourceInfo,
    pub committed: Mutex<CommittedList>,
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub bytes_written: AtomicU64,
    pub commit: Mutex<Option<CommitStatus>>,
    pub skip: AtomicBool,
}

impl SourceState {
    fn new(info: SourceInfo) -> Self {
        Self {
            info,
            committed: Mutex::new(CommittedList::default()),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            commit: Mutex::new(None),
            skip: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_commit(&self, status: CommitStatus) {
        let mut slot = self.commit.lock().unwrap();
        if slot.is_none() {
            *slot = Some(status);
        }
    }
}

/// Runs one pipeline to completion: every part of every source is read,
/// written and accounted for, and each fully written source is committed
/// exactly once. Terminal part errors do not stop the pipeline; the caller
/// sees them in the returned stats.
pub fn run_transfer(
    source: Arc<dyn TransferSource>,
    target: Arc<dyn TargetPipeline>,
    params: &TransferParams,
    observer: Arc<dyn TransferObserver>,
    cancel: Arc<AtomicBool>,
) -> Result<TransferStats> {
    let infos = source.sources().to_vec();
    let pool = Arc::new(BufferPool::new(
        params.pool_size.max(1),
        params.block_size as usize,
    ));

    // num_parts follows the pipeline's block size, whatever the enumeration
    // assumed.
    let states: Arc<Vec<SourceState>> = Arc::new(
        infos
            .iter()
            .cloned()
            .map(|mut info| {
                info.num_parts = info.size.div_ceil(params.block_size.max(1));
                SourceState::new(info)
            })
            .collect(),
    );

    // Preprocess validates and sets up each destination before any part is
    // enqueued. A failure here skips that source, not the pipeline.
    for state in states.iter() {
        match target.preprocess_source(&state.info, params.block_size) {
            Ok(()) => {
                if state.info.num_parts == 0 {
                    let list = state.committed.lock().unwrap();
                    match target.commit_list(&list, 0, &state.info.target_alias) {
                        Ok(()) => state.set_commit(CommitStatus::Committed),
                        Err(err) => state.set_commit(CommitStatus::Failed(err.to_string())),
                    }
                }
            }
            Err(err) => {
                warn!("preprocess failed for {}: {err}", state.info.source_name);
                state.skip.store(true, Ordering::Relaxed);
                state.set_commit(CommitStatus::Failed(err.to_string()));
            }
        }
    }

    let total_parts: u64 = states
        .iter()
        .filter(|s| !s.skip.load(Ordering::Relaxed))
        .map(|s| s.info.num_parts)
        .sum();
    info!(
        "transfer start: {} sources, {total_parts} parts, block_size={}",
        infos.len(),
        params.block_size
    );

    let (parts_tx, parts_rx) = bounded::<Part>(params.num_readers.max(1) * 2);
    // Sized to the pool so a worker can always requeue the part it just
    // dequeued without blocking on its own queue.
    let (write_tx, write_rx) = bounded::<Part>(params.pool_size.max(1));
    let (results_tx, results_rx) = bounded::<WorkerResult>(params.num_workers.max(1) * 4);

    // Workers keep a sender for requeues, so the write queue never
    // disconnects on its own; completion is tracked explicitly.
    let inflight = Arc::new(AtomicU64::new(0));
    let readers_done = Arc::new(AtomicBool::new(false));

    let observer_handle = workers::spawn_observer(observer, results_rx, pool.clone());

    let reader_handles = workers::spawn_readers(
        params.num_readers,
        source.clone(),
        states.clone(),
        target.clone(),
        parts_rx,
        write_tx.clone(),
        results_tx.clone(),
        pool.clone(),
        params.retry,
        params.md5,
        cancel.clone(),
        inflight.clone(),
    );

    let worker_handles = workers::spawn_workers(
        params.num_workers,
        target.clone(),
        states.clone(),
        write_rx,
        write_tx.clone(),
        results_tx.clone(),
        pool.clone(),
        cancel.clone(),
        inflight.clone(),
        readers_done.clone(),
    );

    // Partition lazily in (source_index, ordinal) order.
    let mut enqueued = 0u64;
    'producer: for (index, state) in states.iter().enumerate() {
        if state.skip.load(Ordering::Relaxed) {
            continue;
        }
        for part in build_parts(index, &state.info, params.block_size) {
            if cancel.load(Ordering::Relaxed) {
                info!("shutdown requested; no new parts will be read");
                break 'producer;
            }
            if parts_tx.send(part).is_err() {
                // Readers only hang up when cancelled.
                if cancel.load(Ordering::Relaxed) {
                    break 'producer;
                }
                bail!("parts queue closed while partitioning");
            }
            enqueued += 1;
        }
    }

    drop(parts_tx);
    for handle in reader_handles {
        let _ = handle.join();
    }
    readers_done.store(true, Ordering::SeqCst);
    drop(write_tx);
    for handle in worker_handles {
        let _ = handle.join();
    }
    drop(results_tx);
    let _ = observer_handle.join();

    let cancelled = cancel.load(Ordering::Relaxed);
    let mut outcomes = Vec::with_capacity(states.len());
    let mut bytes_transferred = 0u64;
    let mut parts_succeeded = 0u64;
    let mut parts_failed = 0u64;
    for state in states.iter() {
        bytes_transferred += state.bytes_written.load(Ordering::Relaxed);
        let failed = state.failed.load(Ordering::Relaxed);
        let processed = state.processed.load(Ordering::Relaxed);
        parts_failed += failed;
        parts_succeeded += processed - failed;

        let commit = state.commit.lock().unwrap().clone().unwrap_or_else(|| {
            if cancelled {
                CommitStatus::Cancelled
            } else {
                CommitStatus::Failed(format!(
                    "{processed} of {} parts processed",
                    state.info.num_parts
                ))
            }
        });
        outcomes.push(SourceOutcome {
            source_name: state.info.source_name.clone(),
            target_alias: state.info.target_alias.clone(),
            size: state.info.size,
            commit,
        });
    }

    let stats = TransferStats {
        bytes_transferred,
        parts_succeeded,
        parts_failed,
        sources: outcomes,
    };
    info!(
        "transfer summary: enqueued={enqueued} succeeded={} failed={} bytes={}",
        stats.parts_succeeded, stats.parts_failed, stats.bytes_transferred
    );
    Ok(stats)
}
