use std::sync::Arc;

use tracing::debug;

use crate::part::{Part, SourceInfo, SourceKind};
use crate::store::{BlobEntry, BlobStore};

use super::{alias_for, base_name, check_alias_arity, SourceError, TransferSource};

#[derive(Debug, Clone)]
pub struct BlobSourceParams {
    pub container: String,
    pub blob_names: Vec<String>,
    pub use_exact_name_match: bool,
    pub target_aliases: Vec<String>,
    pub keep_dir_structure: bool,
    pub block_size: u64,
}

/// Cloud-blob origin: each requested name is resolved against the store's
/// listing, either exactly or as a prefix.
pub struct BlobSource {
    store: Arc<dyn BlobStore>,
    container: String,
    sources: Vec<SourceInfo>,
    names: Vec<String>,
}

impl std::fmt::Debug for BlobSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobSource")
            .field("container", &self.container)
            .field("sources", &self.sources)
            .field("names", &self.names)
            .finish()
    }
}

impl BlobSource {
    pub fn open(store: Arc<dyn BlobStore>, params: &BlobSourceParams) -> Result<Self, SourceError> {
        let entries = enumerate(store.as_ref(), params)?;
        check_alias_arity(&params.target_aliases, entries.len())?;
        let paired = entries
            .into_iter()
            .enumerate()
            .map(|(i, e)| (e, alias_for(&params.target_aliases, i)))
            .collect();
        Ok(Self::from_entries(store, params, paired))
    }

    /// Lists once, then splits the matched blobs into independent pipeline
    /// batches.
    pub fn open_pipelines(
        store: Arc<dyn BlobStore>,
        params: &BlobSourceParams,
        files_per_pipeline: usize,
    ) -> Result<Vec<Self>, SourceError> {
        let entries = enumerate(store.as_ref(), params)?;
        check_alias_arity(&params.target_aliases, entries.len())?;
        let paired: Vec<(BlobEntry, Option<String>)> = entries
            .into_iter()
            .enumerate()
            .map(|(i, e)| (e, alias_for(&params.target_aliases, i)))
            .collect();
        Ok(crate::part::split_for_pipelines(paired, files_per_pipeline)
            .into_iter()
            .map(|batch| Self::from_entries(store.clone(), params, batch))
            .collect())
    }

    fn from_entries(
        store: Arc<dyn BlobStore>,
        params: &BlobSourceParams,
        entries: Vec<(BlobEntry, Option<String>)>,
    ) -> Self {
        let mut sources = Vec::with_capacity(entries.len());
        let mut names = Vec::with_capacity(entries.len());
        for (entry, alias) in entries {
            let alias = alias.unwrap_or_else(|| {
                if params.keep_dir_structure {
                    entry.name.clone()
                } else {
                    base_name(&entry.name)
                }
            });
            debug!(
                "enumerated blob source {}/{} size={} alias={alias}",
                params.container, entry.name, entry.size
            );
            sources.push(SourceInfo::new(
                entry.name.clone(),
                Some(alias),
                entry.size,
                params.block_size,
                SourceKind::CloudBlob,
            ));
            names.push(entry.name);
        }

        Self {
            store,
            container: params.container.clone(),
            sources,
            names,
        }
    }
}

fn enumerate(store: &dyn BlobStore, params: &BlobSourceParams) -> Result<Vec<BlobEntry>, SourceError> {
    let mut entries = Vec::new();
    for requested in &params.blob_names {
        let listed = store.list_blobs(&params.container, requested)?;
        for entry in listed {
            if params.use_exact_name_match && entry.name != *requested {
                continue;
            }
            entries.push(entry);
        }
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries.dedup_by(|a, b| a.name == b.name);
    if entries.is_empty() {
        return Err(SourceError::Empty);
    }
    Ok(entries)
}

impl TransferSource for BlobSource {
    fn sources(&self) -> &[SourceInfo] {
        &self.sources
    }

    fn read_part(&self, part: &Part, buf: &mut [u8]) -> Result<(), SourceError> {
        let name = &self.names[part.source_index];
        let end = part.offset + part.bytes_to_read - 1;
        let bytes = self
            .store
            .get_blob_range(&self.container, name, part.offset, end)?;
        if bytes.len() != buf.len() {
            return Err(SourceError::ShortRead {
                offset: part.offset,
                wanted: buf.len(),
                got: bytes.len(),
            });
        }
        buf.copy_from_slice(&bytes);
        Ok(())
    }
}
