//! # Pipeline Workers
//!
//! Reader, writer and observer thread spawning for the transfer pipeline.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use base64::{engine::general_purpose::STANDARD, Engine};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

const WORKER_POLL: Duration = Duration::from_millis(50);

use crate::buffer::BufferPool;
use crate::part::{Part, WorkerResult};
use crate::retry::{RetryError, RetryPolicy};
use crate::sources::{SourceError, TransferSource};
use crate::targets::{TargetError, TargetPipeline, WriteStats};

use super::{CommitStatus, SourceState, TransferObserver};

/// Spawn the reader pool. Each reader drains the parts queue, borrows a slab
/// from the pool (blocking there is the pipeline's backpressure), fills it
/// from the source under the retry policy and hands the part to the write
/// queue. A terminal read failure releases the slab and surfaces a result;
/// remaining parts keep flowing.
#[allow(clippy::too_many_arguments)]
pub fn spawn_readers(
    readers: usize,
    source: Arc<dyn TransferSource>,
    states: Arc<Vec<SourceState>>,
    target: Arc<dyn TargetPipeline>,
    rx: Receiver<Part>,
    write_tx: Sender<Part>,
    results_tx: Sender<WorkerResult>,
    pool: Arc<BufferPool>,
    retry: RetryPolicy,
    md5: bool,
    cancel: Arc<AtomicBool>,
    inflight: Arc<AtomicU64>,
) -> Vec<thread::JoinHandle<()>> {
    let mut handles = Vec::new();
    let reader_count = readers.max(1);

    for _ in 0..reader_count {
        let source = source.clone();
        let states = states.clone();
        let target = target.clone();
        let rx = rx.clone();
        let write_tx = write_tx.clone();
        let results_tx = results_tx.clone();
        let pool = pool.clone();
        let cancel = cancel.clone();
        let inflight = inflight.clone();

        handles.push(thread::spawn(move || {
            for mut part in rx {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                let Some(mut buf) = pool.acquire(&cancel) else {
                    break;
                };
                buf.resize(part.bytes_to_read as usize, 0);

                let read = retry.run(
                    Some(&cancel),
                    |_| source.read_part(&part, &mut buf),
                    SourceError::is_transient,
                    |_, _| {},
                );
                match read {
                    Ok(_) => {
                        if md5 {
                            let digest = md5::compute(&buf);
                            part.md5 = Some(STANDARD.encode(digest.0));
                        }
                        part.data = Some(buf);
                        inflight.fetch_add(1, Ordering::SeqCst);
                        if write_tx.send(part).is_err() {
                            inflight.fetch_sub(1, Ordering::SeqCst);
                            break;
                        }
                    }
                    Err(RetryError::Cancelled) => {
                        pool.release(buf);
                        break;
                    }
                    Err(err) => {
                        pool.release(buf);
                        let transient = matches!(err, RetryError::Exhausted { .. });
                        let (retries, message) = read_failure(err);
                        warn!(
                            "read failed for part {} of {}: {message}",
                            part.ordinal, part.target_alias
                        );
                        let result = failure_result(&part, retries, message, transient);
                        finish_part(&states[part.source_index], &target, &result);
                        if results_tx.send(result).is_err() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    handles
}

/// Spawn the worker pool. Each worker drains the write queue, invokes the
/// target, lets the target account the written part (or ask for one
/// requeue), returns the slab to the pool and emits the result. The worker
/// that processes a source's last part triggers its commit.
///
/// Workers hold a sender to their own queue for requeues, so queue
/// disconnection can never signal completion; they exit when the readers are
/// done and no part remains in flight.
#[allow(clippy::too_many_arguments)]
pub fn spawn_workers(
    workers: usize,
    target: Arc<dyn TargetPipeline>,
    states: Arc<Vec<SourceState>>,
    rx: Receiver<Part>,
    write_tx: Sender<Part>,
    results_tx: Sender<WorkerResult>,
    pool: Arc<BufferPool>,
    cancel: Arc<AtomicBool>,
    inflight: Arc<AtomicU64>,
    readers_done: Arc<AtomicBool>,
) -> Vec<thread::JoinHandle<()>> {
    let mut handles = Vec::new();
    let worker_count = workers.max(1);

    for _ in 0..worker_count {
        let target = target.clone();
        let states = states.clone();
        let rx = rx.clone();
        let write_tx = write_tx.clone();
        let results_tx = results_tx.clone();
        let pool = pool.clone();
        let cancel = cancel.clone();
        let inflight = inflight.clone();
        let readers_done = readers_done.clone();

        handles.push(thread::spawn(move || {
            loop {
                let mut part = match rx.recv_timeout(WORKER_POLL) {
                    Ok(part) => part,
                    Err(RecvTimeoutError::Timeout) => {
                        if cancel.load(Ordering::Relaxed)
                            || (readers_done.load(Ordering::SeqCst)
                                && inflight.load(Ordering::SeqCst) == 0)
                        {
                            break;
                        }
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                };
                if cancel.load(Ordering::Relaxed) {
                    if let Some(buf) = part.data.take() {
                        pool.release(buf);
                    }
                    inflight.fetch_sub(1, Ordering::SeqCst);
                    break;
                }
                let state = &states[part.source_index];

                let mut result = match target.write_part(&part) {
                    Ok(stats) => success_result(&part, &stats),
                    Err(TargetError::Cancelled) => {
                        if let Some(buf) = part.data.take() {
                            pool.release(buf);
                        }
                        inflight.fetch_sub(1, Ordering::SeqCst);
                        break;
                    }
                    Err(err) => {
                        let transient = err.is_exhausted_transient();
                        let retries = write_retries(&err);
                        failure_result(&part, retries, err.to_string(), transient)
                    }
                };

                let post = {
                    let mut list = state.committed.lock().unwrap();
                    target.process_written_part(&result, &mut list)
                };
                let requeue = match post {
                    Ok(post) => post.requeue,
                    Err(err) => {
                        if result.error.is_none() {
                            result.error = Some(err.to_string());
                            result.transient_exhausted = false;
                        }
                        false
                    }
                };

                if requeue && part.requeues == 0 {
                    part.requeues += 1;
                    debug!(
                        "requeueing part {} of {}",
                        part.ordinal, part.target_alias
                    );
                    match write_tx.send(part) {
                        Ok(()) => continue,
                        Err(send_err) => part = send_err.into_inner(),
                    }
                }

                if let Some(buf) = part.data.take() {
                    pool.release(buf);
                }
                finish_part(state, &target, &result);
                inflight.fetch_sub(1, Ordering::SeqCst);
                if results_tx.send(result).is_err() {
                    break;
                }
            }
        }));
    }

    handles
}

/// Spawn the observer thread: forwards every result to the callback together
/// with the committed count and the pool level.
pub fn spawn_observer(
    observer: Arc<dyn TransferObserver>,
    rx: Receiver<WorkerResult>,
    pool: Arc<BufferPool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut committed_count = 0u64;
        for result in rx {
            if result.error.is_none() {
                committed_count += 1;
            }
            observer.on_part(&result, committed_count, pool.available());
        }
    })
}

/// Accounts a terminal part outcome. The caller that pushes a source over
/// the line commits it; the commit therefore happens after every write of
/// that source, exactly once, and only when no part failed.
fn finish_part(state: &SourceState, target: &Arc<dyn TargetPipeline>, result: &WorkerResult) {
    if result.error.is_some() {
        state.failed.fetch_add(1, Ordering::SeqCst);
    } else {
        state
            .bytes_written
            .fetch_add(result.bytes_written, Ordering::SeqCst);
    }

    let done = state.processed.fetch_add(1, Ordering::SeqCst) + 1;
    if done < state.info.num_parts {
        return;
    }

    let failed = state.failed.load(Ordering::SeqCst);
    if failed > 0 {
        state.set_commit(CommitStatus::Failed(format!(
            "{failed} of {} parts failed",
            state.info.num_parts
        )));
        return;
    }
    let list = state.committed.lock().unwrap();
    match target.commit_list(&list, state.info.num_parts, &state.info.target_alias) {
        Ok(()) => state.set_commit(CommitStatus::Committed),
        Err(err) => {
            warn!("commit failed for {}: {err}", state.info.target_alias);
            state.set_commit(CommitStatus::Failed(err.to_string()));
        }
    }
}

fn success_result(part: &Part, stats: &WriteStats) -> WorkerResult {
    WorkerResult {
        ordinal: part.ordinal,
        source_index: part.source_index,
        target_alias: part.target_alias.clone(),
        block_id: part.block_id.clone(),
        bytes_written: part.bytes_to_read,
        duration: stats.duration,
        started_at: stats.started_at,
        retries: stats.retries,
        error: None,
        transient_exhausted: false,
    }
}

fn failure_result(
    part: &Part,
    retries: u32,
    message: String,
    transient_exhausted: bool,
) -> WorkerResult {
    WorkerResult {
        ordinal: part.ordinal,
        source_index: part.source_index,
        target_alias: part.target_alias.clone(),
        block_id: part.block_id.clone(),
        bytes_written: 0,
        duration: Duration::ZERO,
        started_at: SystemTime::now(),
        retries,
        error: Some(message),
        transient_exhausted,
    }
}

fn read_failure(err: RetryError<SourceError>) -> (u32, String) {
    match err {
        RetryError::Exhausted { attempts, last } => (attempts.saturating_sub(1), last.to_string()),
        RetryError::Aborted(last) => (0, last.to_string()),
        RetryError::Cancelled => (0, "cancelled".to_string()),
    }
}

fn write_retries(err: &TargetError) -> u32 {
    match err {
        TargetError::Exhausted { attempts, .. } => attempts.saturating_sub(1),
        _ => 0,
    }
}
