use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{debug, info};

use crate::part::{Part, SourceInfo, WorkerResult};
use crate::retry::RetryPolicy;
use crate::store::{BlobStore, StoreError};

use super::{CommittedList, PostWrite, TargetError, TargetPipeline, WriteStats};

const MIB: u64 = 1024 * 1024;

/// Service caps for block blobs.
pub const MAX_BLOCK_SIZE: u64 = 100 * MIB;
pub const MAX_BLOCKS_PER_BLOB: u64 = 50_000;

/// Block-blob destination. Parts are staged server-side under their
/// pre-assigned block ids and become visible only when the ordered list is
/// committed.
pub struct BlockBlobTarget {
    store: Arc<dyn BlobStore>,
    container: String,
    policy: RetryPolicy,
    cancel: Arc<AtomicBool>,
}

impl BlockBlobTarget {
    pub fn new(
        store: Arc<dyn BlobStore>,
        container: &str,
        policy: RetryPolicy,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            container: container.to_string(),
            policy,
            cancel,
        }
    }
}

impl TargetPipeline for BlockBlobTarget {
    fn preprocess_source(&self, source: &SourceInfo, block_size: u64) -> Result<(), TargetError> {
        if block_size == 0 || block_size > MAX_BLOCK_SIZE {
            return Err(TargetError::BlockSizeInvalid {
                block_size,
                min: 1,
                max: MAX_BLOCK_SIZE,
            });
        }
        if source.num_parts > MAX_BLOCKS_PER_BLOB {
            return Err(TargetError::SourceTooLarge {
                name: source.source_name.clone(),
                size: source.size,
                max: MAX_BLOCK_SIZE.saturating_mul(MAX_BLOCKS_PER_BLOB),
            });
        }
        Ok(())
    }

    fn write_part(&self, part: &Part) -> Result<WriteStats, TargetError> {
        let data = part
            .data
            .as_deref()
            .ok_or(TargetError::EmptyPart(part.ordinal))?;
        let out = self.policy.run(
            Some(&self.cancel),
            |_| {
                self.store.put_block(
                    &self.container,
                    &part.target_alias,
                    &part.block_id,
                    data,
                    part.md5.as_deref(),
                )
            },
            StoreError::is_transient,
            |_, _| self.store.reset_client(),
        )?;
        debug!(
            "staged block {} for {} ({} bytes)",
            part.block_id, part.target_alias, part.bytes_to_read
        );
        Ok(WriteStats {
            duration: out.duration,
            started_at: out.started_at,
            retries: out.retries,
        })
    }

    fn process_written_part(
        &self,
        result: &WorkerResult,
        list: &mut CommittedList,
    ) -> Result<PostWrite, TargetError> {
        if result.error.is_none() {
            list.insert(result.ordinal, result.block_id.clone());
            return Ok(PostWrite { requeue: false });
        }
        // A transient fault that outlived the transport retry gets one more
        // trip through the write queue; anything else is surfaced.
        Ok(PostWrite {
            requeue: result.transient_exhausted,
        })
    }

    fn commit_list(
        &self,
        list: &CommittedList,
        num_parts: u64,
        target_alias: &str,
    ) -> Result<(), TargetError> {
        if list.len() as u64 != num_parts {
            return Err(TargetError::IncompleteCommit {
                alias: target_alias.to_string(),
                listed: list.len() as u64,
                expected: num_parts,
            });
        }
        let ids = list.ordered_ids();
        self.policy.run(
            Some(&self.cancel),
            |_| {
                self.store
                    .put_block_list(&self.container, target_alias, &ids)
            },
            StoreError::is_transient,
            |_, _| self.store.reset_client(),
        )?;
        info!("committed {} blocks to {target_alias}", ids.len());
        Ok(())
    }
}
