pub mod blob;
pub mod file;
pub mod http;

use thiserror::Error;

use crate::part::{Part, SourceInfo};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("glob error: {0}")]
    Glob(#[from] globset::Error),
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("no content length advertised for {0}")]
    UnknownSize(String),
    #[error("short read at offset {offset}: wanted {wanted}, got {got}")]
    ShortRead {
        offset: u64,
        wanted: usize,
        got: usize,
    },
    #[error("no sources matched the enumeration")]
    Empty,
    #[error("{aliases} target aliases given for {sources} sources")]
    AliasArity { aliases: usize, sources: usize },
}

impl SourceError {
    /// Local reads fail for keeps; remote reads are worth reissuing.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            SourceError::Store(err) => err.is_transient(),
            SourceError::Status { status, .. } => {
                matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            SourceError::ShortRead { .. } => true,
            _ => false,
        }
    }
}

/// A transfer origin. Enumeration happens at construction; `read_part` must
/// be positional and idempotent so the retry layer can reissue it.
pub trait TransferSource: Send + Sync {
    fn sources(&self) -> &[SourceInfo];

    /// Fills `buf` (sized to `part.bytes_to_read`) with the part's byte
    /// range. Partial fills are errors.
    fn read_part(&self, part: &Part, buf: &mut [u8]) -> Result<(), SourceError>;
}

pub(crate) fn check_alias_arity(aliases: &[String], sources: usize) -> Result<(), SourceError> {
    if !aliases.is_empty() && aliases.len() != sources {
        return Err(SourceError::AliasArity {
            aliases: aliases.len(),
            sources,
        });
    }
    Ok(())
}

pub(crate) fn alias_for(aliases: &[String], index: usize) -> Option<String> {
    aliases.get(index).cloned()
}

/// Last path segment of a name, used when directory structure is dropped.
pub(crate) fn base_name(name: &str) -> String {
    name.rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(name)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_name_strips_directories() {
        assert_eq!(base_name("a/b/c.bin"), "c.bin");
        assert_eq!(base_name("c.bin"), "c.bin");
        assert_eq!(base_name("dir\\file"), "file");
    }

    #[test]
    fn alias_arity_mismatch_is_rejected() {
        let aliases = vec!["a".to_string(), "b".to_string()];
        let err = check_alias_arity(&aliases, 3).expect_err("arity");
        assert!(matches!(err, SourceError::AliasArity { aliases: 2, sources: 3 }));
        check_alias_arity(&aliases, 2).expect("matching arity");
        check_alias_arity(&[], 5).expect("no aliases is fine");
    }
}
