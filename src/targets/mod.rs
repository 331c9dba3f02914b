pub mod block;
pub mod file;
pub mod page;

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use thiserror::Error;

use crate::part::{Part, SourceInfo, WorkerResult};
use crate::retry::RetryError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("{name} is too large ({size} bytes), the maximum is {max}")]
    SourceTooLarge { name: String, size: u64, max: u64 },
    #[error("{name} size {size} is not a multiple of {alignment}")]
    PageAlignment {
        name: String,
        size: u64,
        alignment: u64,
    },
    #[error("invalid block size {block_size}, must be within [{min}, {max}]")]
    BlockSizeInvalid { block_size: u64, min: u64, max: u64 },
    #[error("destination {0} already exists")]
    AlreadyExists(String),
    #[error("{alias} finished at {actual} bytes, expected {expected}")]
    SizeMismatch {
        alias: String,
        expected: u64,
        actual: u64,
    },
    #[error("part {0} carries no data")]
    EmptyPart(u64),
    #[error("commit list for {alias} has {listed} blocks, expected {expected}")]
    IncompleteCommit {
        alias: String,
        listed: u64,
        expected: u64,
    },
    #[error("unknown target alias {0}")]
    UnknownAlias(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transfer cancelled")]
    Cancelled,
    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<TargetError>,
    },
}

impl From<RetryError<StoreError>> for TargetError {
    fn from(err: RetryError<StoreError>) -> Self {
        match err {
            RetryError::Cancelled => TargetError::Cancelled,
            RetryError::Aborted(last) => TargetError::Store(last),
            RetryError::Exhausted { attempts, last } => TargetError::Exhausted {
                attempts,
                last: Box::new(TargetError::Store(last)),
            },
        }
    }
}

impl TargetError {
    /// True when the failure is a retry layer giving up on a transient
    /// fault, as opposed to a fault that was never retryable.
    pub fn is_exhausted_transient(&self) -> bool {
        matches!(self, TargetError::Exhausted { .. })
    }
}

/// Stats returned by a successful `write_part`.
#[derive(Debug, Clone, Copy)]
pub struct WriteStats {
    pub duration: Duration,
    pub started_at: SystemTime,
    pub retries: u32,
}

/// Decision returned by `process_written_part`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostWrite {
    pub requeue: bool,
}

/// Ordered (ordinal, block id) accumulator for one source. Grows as parts
/// complete in arbitrary order; iteration is always ordinal order.
#[derive(Debug, Default)]
pub struct CommittedList {
    blocks: BTreeMap<u64, String>,
}

impl CommittedList {
    pub fn insert(&mut self, ordinal: u64, block_id: String) {
        self.blocks.insert(ordinal, block_id);
    }

    pub fn ordered_ids(&self) -> Vec<String> {
        self.blocks.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Destination state machine. `write_part` owns transport retries and
/// reports per-part stats; `commit_list` runs once per source after the last
/// part has been processed.
pub trait TargetPipeline: Send + Sync {
    /// Validates the source against target limits and performs any one-time
    /// setup. Runs before any part of the source is enqueued.
    fn preprocess_source(&self, source: &SourceInfo, block_size: u64) -> Result<(), TargetError>;

    fn write_part(&self, part: &Part) -> Result<WriteStats, TargetError>;

    fn process_written_part(
        &self,
        result: &WorkerResult,
        list: &mut CommittedList,
    ) -> Result<PostWrite, TargetError>;

    fn commit_list(
        &self,
        list: &CommittedList,
        num_parts: u64,
        target_alias: &str,
    ) -> Result<(), TargetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committed_list_orders_by_ordinal() {
        let mut list = CommittedList::default();
        list.insert(2, "c".to_string());
        list.insert(0, "a".to_string());
        list.insert(1, "b".to_string());
        assert_eq!(list.ordered_ids(), ["a", "b", "c"]);
        assert_eq!(list.len(), 3);
    }
}
