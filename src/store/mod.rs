pub mod memory;
pub mod rest;

use thiserror::Error;

/// Sent with every wire call so the service can attribute traffic.
pub const USER_AGENT: &str = concat!("bytebarge/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} returned status {status}")]
    Status { operation: &'static str, status: u16 },
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("commit rejected for {0}")]
    CommitConflict(String),
    #[error("invalid range {start}..={end}")]
    InvalidRange { start: u64, end: u64 },
}

impl StoreError {
    /// Whether the transport retry layer should absorb this failure.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            StoreError::Status { status, .. } => {
                matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageWriteAction {
    Update,
    Clear,
}

#[derive(Debug, Clone)]
pub struct BlobEntry {
    pub name: String,
    pub size: u64,
}

/// Abstract wire surface of the blob service. Chunk naming, range rules and
/// commit ordering are decided by the callers; implementations only move
/// bytes. All operations must be idempotent so the retry layer can reissue
/// them.
pub trait BlobStore: Send + Sync {
    /// Creates an empty page blob of the declared size.
    fn create_page_blob(&self, container: &str, name: &str, size: u64) -> Result<(), StoreError>;

    /// Stages a named chunk server-side; not visible until committed.
    fn put_block(
        &self,
        container: &str,
        name: &str,
        block_id: &str,
        data: &[u8],
        content_md5: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Commits staged chunks in the given order, making the blob visible.
    fn put_block_list(
        &self,
        container: &str,
        name: &str,
        block_ids: &[String],
    ) -> Result<(), StoreError>;

    /// Writes `data` in place over `[start, end]` (inclusive). Both bounds
    /// follow page-blob alignment rules; the service rejects violations.
    fn put_page(
        &self,
        container: &str,
        name: &str,
        start: u64,
        end: u64,
        action: PageWriteAction,
        data: &[u8],
        content_md5: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Reads `[start, end]` (inclusive) of a committed blob.
    fn get_blob_range(
        &self,
        container: &str,
        name: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<u8>, StoreError>;

    fn list_blobs(&self, container: &str, prefix: &str) -> Result<Vec<BlobEntry>, StoreError>;

    /// Discards pooled connections and rebuilds the transport. Some failure
    /// modes leave a keep-alive connection wedged; the retry layer calls this
    /// between attempts.
    fn reset_client(&self);
}
