use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use super::{BlobEntry, BlobStore, PageWriteAction, StoreError};

const PAGE_ALIGNMENT: u64 = 512;

/// In-process store implementing the same wire surface as the REST client.
/// Backs the integration tests and the throughput bench; enforces the same
/// range and commit rules the service would, and keeps a call journal so
/// tests can assert on the exact wire traffic.
#[derive(Default)]
pub struct MemoryBlobStore {
    containers: Mutex<HashMap<String, HashMap<String, Blob>>>,
    journal: Mutex<Vec<StoreOp>>,
    fail_remaining: AtomicU32,
    fail_by_name: Mutex<HashMap<String, u32>>,
    resets: AtomicU64,
}

#[derive(Default, Clone)]
struct Blob {
    data: Vec<u8>,
    staged: HashMap<String, Vec<u8>>,
    committed: bool,
}

/// One recorded wire call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    CreatePageBlob {
        name: String,
        size: u64,
    },
    PutBlock {
        name: String,
        block_id: String,
        md5: Option<String>,
    },
    PutBlockList {
        name: String,
        block_ids: Vec<String>,
    },
    PutPage {
        name: String,
        start: u64,
        end: u64,
        md5: Option<String>,
    },
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` mutating calls fail with a retryable status.
    pub fn fail_next(&self, n: u32) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Like `fail_next`, but only for mutating calls against one blob name.
    pub fn fail_next_for(&self, name: &str, n: u32) {
        self.fail_by_name.lock().unwrap().insert(name.to_string(), n);
    }

    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn journal(&self) -> Vec<StoreOp> {
        self.journal.lock().unwrap().clone()
    }

    /// Committed bytes of a blob, if it exists and has been committed.
    pub fn committed_bytes(&self, container: &str, name: &str) -> Option<Vec<u8>> {
        let containers = self.containers.lock().unwrap();
        containers
            .get(container)
            .and_then(|blobs| blobs.get(name))
            .filter(|blob| blob.committed)
            .map(|blob| blob.data.clone())
    }

    /// Seeds a committed blob directly, bypassing the staging flow.
    pub fn seed_blob(&self, container: &str, name: &str, data: Vec<u8>) {
        let mut containers = self.containers.lock().unwrap();
        containers.entry(container.to_string()).or_default().insert(
            name.to_string(),
            Blob {
                data,
                staged: HashMap::new(),
                committed: true,
            },
        );
    }

    fn maybe_fail(&self, operation: &'static str, name: &str) -> Result<(), StoreError> {
        if let Some(remaining) = self.fail_by_name.lock().unwrap().get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Status {
                    operation,
                    status: 503,
                });
            }
        }
        let taken = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok();
        if taken {
            return Err(StoreError::Status {
                operation,
                status: 503,
            });
        }
        Ok(())
    }

    fn record(&self, op: StoreOp) {
        self.journal.lock().unwrap().push(op);
    }
}

impl BlobStore for MemoryBlobStore {
    fn create_page_blob(&self, container: &str, name: &str, size: u64) -> Result<(), StoreError> {
        self.maybe_fail("create_page_blob", name)?;
        let mut containers = self.containers.lock().unwrap();
        containers.entry(container.to_string()).or_default().insert(
            name.to_string(),
            Blob {
                data: vec![0u8; size as usize],
                staged: HashMap::new(),
                committed: true,
            },
        );
        drop(containers);
        self.record(StoreOp::CreatePageBlob {
            name: name.to_string(),
            size,
        });
        Ok(())
    }

    fn put_block(
        &self,
        container: &str,
        name: &str,
        block_id: &str,
        data: &[u8],
        content_md5: Option<&str>,
    ) -> Result<(), StoreError> {
        self.maybe_fail("put_block", name)?;
        let mut containers = self.containers.lock().unwrap();
        let blob = containers
            .entry(container.to_string())
            .or_default()
            .entry(name.to_string())
            .or_default();
        blob.staged.insert(block_id.to_string(), data.to_vec());
        drop(containers);
        self.record(StoreOp::PutBlock {
            name: name.to_string(),
            block_id: block_id.to_string(),
            md5: content_md5.map(String::from),
        });
        Ok(())
    }

    fn put_block_list(
        &self,
        container: &str,
        name: &str,
        block_ids: &[String],
    ) -> Result<(), StoreError> {
        self.maybe_fail("put_block_list", name)?;
        let mut containers = self.containers.lock().unwrap();
        let blob = containers
            .entry(container.to_string())
            .or_default()
            .entry(name.to_string())
            .or_default();

        let mut assembled = Vec::new();
        for id in block_ids {
            match blob.staged.get(id) {
                Some(chunk) => assembled.extend_from_slice(chunk),
                None => return Err(StoreError::CommitConflict(format!("{name}: unknown block {id}"))),
            }
        }
        blob.data = assembled;
        blob.committed = true;
        blob.staged.clear();
        drop(containers);
        self.record(StoreOp::PutBlockList {
            name: name.to_string(),
            block_ids: block_ids.to_vec(),
        });
        Ok(())
    }

    fn put_page(
        &self,
        container: &str,
        name: &str,
        start: u64,
        end: u64,
        action: PageWriteAction,
        data: &[u8],
        content_md5: Option<&str>,
    ) -> Result<(), StoreError> {
        self.maybe_fail("put_page", name)?;
        let len = end.checked_sub(start).map(|d| d + 1);
        let aligned = start % PAGE_ALIGNMENT == 0 && len.is_some_and(|l| l % PAGE_ALIGNMENT == 0);
        if !aligned {
            return Err(StoreError::InvalidRange { start, end });
        }
        let mut containers = self.containers.lock().unwrap();
        let blob = containers
            .get_mut(container)
            .and_then(|blobs| blobs.get_mut(name))
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        let end_excl = (end + 1) as usize;
        if end_excl > blob.data.len() {
            return Err(StoreError::InvalidRange { start, end });
        }
        match action {
            PageWriteAction::Update => {
                if data.len() as u64 != len.unwrap_or(0) {
                    return Err(StoreError::InvalidRange { start, end });
                }
                blob.data[start as usize..end_excl].copy_from_slice(data);
            }
            PageWriteAction::Clear => {
                blob.data[start as usize..end_excl].fill(0);
            }
        }
        drop(containers);
        self.record(StoreOp::PutPage {
            name: name.to_string(),
            start,
            end,
            md5: content_md5.map(String::from),
        });
        Ok(())
    }

    fn get_blob_range(
        &self,
        container: &str,
        name: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>, StoreError> {
        let containers = self.containers.lock().unwrap();
        let blob = containers
            .get(container)
            .and_then(|blobs| blobs.get(name))
            .filter(|blob| blob.committed)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        let end_excl = (end + 1) as usize;
        if start > end || end_excl > blob.data.len() {
            return Err(StoreError::InvalidRange { start, end });
        }
        Ok(blob.data[start as usize..end_excl].to_vec())
    }

    fn list_blobs(&self, container: &str, prefix: &str) -> Result<Vec<BlobEntry>, StoreError> {
        let containers = self.containers.lock().unwrap();
        let mut entries: Vec<BlobEntry> = containers
            .get(container)
            .map(|blobs| {
                blobs
                    .iter()
                    .filter(|(name, blob)| blob.committed && name.starts_with(prefix))
                    .map(|(name, blob)| BlobEntry {
                        name: name.clone(),
                        size: blob.data.len() as u64,
                    })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn reset_client(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_commit_assembles_in_list_order() {
        let store = MemoryBlobStore::new();
        store.put_block("c", "b", "01", b"world", None).expect("put");
        store.put_block("c", "b", "00", b"hello ", None).expect("put");
        assert!(store.committed_bytes("c", "b").is_none());

        store
            .put_block_list("c", "b", &["00".to_string(), "01".to_string()])
            .expect("commit");
        assert_eq!(store.committed_bytes("c", "b").expect("bytes"), b"hello world");
    }

    #[test]
    fn commit_with_unknown_block_is_a_conflict() {
        let store = MemoryBlobStore::new();
        store.put_block("c", "b", "00", b"x", None).expect("put");
        let err = store
            .put_block_list("c", "b", &["00".to_string(), "99".to_string()])
            .expect_err("conflict");
        assert!(matches!(err, StoreError::CommitConflict(_)));
    }

    #[test]
    fn page_writes_must_be_aligned() {
        let store = MemoryBlobStore::new();
        store.create_page_blob("c", "p", 1024).expect("create");
        let err = store
            .put_page("c", "p", 100, 611, PageWriteAction::Update, &[0u8; 512], None)
            .expect_err("misaligned start");
        assert!(matches!(err, StoreError::InvalidRange { .. }));

        store
            .put_page("c", "p", 512, 1023, PageWriteAction::Update, &[7u8; 512], None)
            .expect("aligned write");
        let bytes = store.get_blob_range("c", "p", 0, 1023).expect("range");
        assert_eq!(&bytes[512..], &[7u8; 512]);
        assert_eq!(&bytes[..512], &[0u8; 512]);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let store = MemoryBlobStore::new();
        store.fail_next(1);
        let err = store.put_block("c", "b", "00", b"x", None).expect_err("injected");
        assert!(err.is_transient());
        store.put_block("c", "b", "00", b"x", None).expect("second attempt");
    }

    #[test]
    fn listing_filters_by_prefix() {
        let store = MemoryBlobStore::new();
        store.seed_blob("c", "tbm1", vec![1]);
        store.seed_blob("c", "tbm2", vec![1, 2]);
        store.seed_blob("c", "other", vec![1, 2, 3]);
        let entries = store.list_blobs("c", "tbm").expect("list");
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["tbm1", "tbm2"]);
        assert_eq!(entries[1].size, 2);
    }
}
