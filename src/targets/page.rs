use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::debug;

use crate::part::{Part, SourceInfo, WorkerResult};
use crate::retry::RetryPolicy;
use crate::store::{BlobStore, PageWriteAction, StoreError};

use super::{CommittedList, PostWrite, TargetError, TargetPipeline, WriteStats};

const MIB: u64 = 1024 * 1024;

/// Page blobs are written in 512-byte pages.
pub const PAGE_SIZE: u64 = 512;
pub const MAX_PAGE_WRITE: u64 = 4 * MIB;
pub const MAX_PAGE_BLOB_SIZE: u64 = 8 * 1024 * 1024 * MIB;

/// Page-blob destination. The blob is created at its full size up front and
/// parts are written in place; there is no commit step.
pub struct PageBlobTarget {
    store: Arc<dyn BlobStore>,
    container: String,
    policy: RetryPolicy,
    cancel: Arc<AtomicBool>,
}

impl PageBlobTarget {
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

impl TargetPipeline for PageBlobTarget {
    fn preprocess_source(&self, source: &SourceInfo, block_size: u64) -> Result<(), TargetError> {
        if source.size % PAGE_SIZE != 0 {
            return Err(TargetError::PageAlignment {
                name: source.source_name.clone(),
                size: source.size,
                alignment: PAGE_SIZE,
            });
        }
        if source.size > MAX_PAGE_BLOB_SIZE {
            return Err(TargetError::SourceTooLarge {
                name: source.source_name.clone(),
                size: source.size,
                max: MAX_PAGE_BLOB_SIZE,
            });
        }
        if !(PAGE_SIZE..=MAX_PAGE_WRITE).contains(&block_size) || block_size % PAGE_SIZE != 0 {
            return Err(TargetError::BlockSizeInvalid {
                block_size,
                min: PAGE_SIZE,
                max: MAX_PAGE_WRITE,
            });
        }

        self.policy.run(
            Some(&self.cancel),
            |_| {
                self.store
                    .create_page_blob(&self.container, &source.target_alias, source.size)
            },
            StoreError::is_transient,
            |_, _| self.store.reset_client(),
        )?;
        debug!(
            "created page blob {}/{} size={}",
            self.container, source.target_alias, source.size
        );
        Ok(())
    }

    fn write_part(&self, part: &Part) -> Result<WriteStats, TargetError> {
        let data = part
            .data
            .as_deref()
            .ok_or(TargetError::EmptyPart(part.ordinal))?;
        let end = part.offset + part.bytes_to_read - 1;
        let out = self.policy.run(
            Some(&self.cancel),
            |_| {
                self.store.put_page(
                    &self.container,
                    &part.target_alias,
                    part.offset,
                    end,
                    PageWriteAction::Update,
                    data,
                    part.md5.as_deref(),
                )
            },
            StoreError::is_transient,
            |_, _| self.store.reset_client(),
        )?;
        Ok(WriteStats {
            duration: out.duration,
            started_at: out.started_at,
            retries: out.retries,
        })
    }

    /// Pass-through; page writes land in place, there is nothing to track.
    fn process_written_part(
        &self,
        _result: &WorkerResult,
        _list: &mut CommittedList,
    ) -> Result<PostWrite, TargetError> {
        Ok(PostWrite { requeue: false })
    }

    /// Pass-through; page blobs are committed implicitly.
    fn commit_list(
        &self,
        _list: &CommittedList,
        _num_parts: u64,
        target_alias: &str,
    ) -> Result<(), TargetError> {
        debug!("page blob {target_alias} complete");
        Ok(())
    }
}
