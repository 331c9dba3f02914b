use std::time::{Duration, SystemTime};

use base64::{engine::general_purpose::STANDARD, Engine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    LocalFile,
    HttpRange,
    CloudBlob,
}

#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub source_name: String,
    pub target_alias: String,
    pub size: u64,
    pub num_parts: u64,
    pub kind: SourceKind,
}

impl SourceInfo {
    pub fn new(
        source_name: String,
        target_alias: Option<String>,
        size: u64,
        block_size: u64,
        kind: SourceKind,
    ) -> Self {
        let target_alias = target_alias.unwrap_or_else(|| source_name.clone());
        let num_parts = if block_size == 0 { 0 } else { size.div_ceil(block_size) };
        Self {
            source_name,
            target_alias,
            size,
            num_parts,
            kind,
        }
    }
}

/// Unit of transfer. `data` is bound by a reader and unbound by the worker
/// that writes the part; outside that window it is `None`.
#[derive(Debug)]
pub struct Part {
    pub ordinal: u64,
    pub source_index: usize,
    pub offset: u64,
    pub bytes_to_read: u64,
    pub target_alias: String,
    pub block_id: String,
    pub data: Option<Vec<u8>>,
    pub md5: Option<String>,
    /// Times this part has been put back on the write queue by
    /// `process_written_part`.
    pub requeues: u32,
}

/// Per-part outcome. Emitted to the observer exactly once per part, and
/// handed to `process_written_part` so targets can track completion.
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub ordinal: u64,
    pub source_index: usize,
    pub target_alias: String,
    pub block_id: String,
    pub bytes_written: u64,
    pub duration: Duration,
    pub started_at: SystemTime,
    pub retries: u32,
    pub error: Option<String>,
    /// True when `error` is a transient fault that outlived the transport
    /// retry, the one case a target may ask to requeue.
    pub transient_exhausted: bool,
}

/// Block ids are fixed at partition time so that the committed order of a
/// block blob is the ordinal order, no matter which worker finishes first.
/// The commit list keys on the ordinal itself; ids only need to be unique
/// within a source and stable across retries.
pub fn block_id_for_ordinal(ordinal: u64) -> String {
    STANDARD.encode(format!("{ordinal:012}"))
}

pub fn build_parts(source_index: usize, source: &SourceInfo, block_size: u64) -> Vec<Part> {
    if block_size == 0 {
        return Vec::new();
    }

    let mut parts = Vec::with_capacity(source.num_parts as usize);
    let mut offset = 0u64;
    let mut ordinal = 0u64;

    while offset < source.size {
        let bytes_to_read = (source.size - offset).min(block_size);
        parts.push(Part {
            ordinal,
            source_index,
            offset,
            bytes_to_read,
            target_alias: source.target_alias.clone(),
            block_id: block_id_for_ordinal(ordinal),
            data: None,
            md5: None,
            requeues: 0,
        });
        offset = offset.saturating_add(block_size);
        ordinal += 1;
    }

    parts
}

/// Split enumerated sources into independent pipeline batches.
pub fn split_for_pipelines<T>(sources: Vec<T>, files_per_pipeline: usize) -> Vec<Vec<T>> {
    if sources.is_empty() || files_per_pipeline == 0 {
        return Vec::new();
    }
    let mut batches = Vec::new();
    let mut batch = Vec::with_capacity(files_per_pipeline.min(sources.len()));
    for source in sources {
        batch.push(source);
        if batch.len() == files_per_pipeline {
            batches.push(std::mem::take(&mut batch));
        }
    }
    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(size: u64, block_size: u64) -> SourceInfo {
        SourceInfo::new("src.bin".to_string(), None, size, block_size, SourceKind::LocalFile)
    }

    #[test]
    fn partitions_with_short_final_part() {
        let info = source(100, 40);
        assert_eq!(info.num_parts, 3);
        let parts = build_parts(0, &info, 40);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].offset, 0);
        assert_eq!(parts[0].bytes_to_read, 40);
        assert_eq!(parts[1].offset, 40);
        assert_eq!(parts[2].offset, 80);
        assert_eq!(parts[2].bytes_to_read, 20);
        assert_eq!(parts.iter().map(|p| p.bytes_to_read).sum::<u64>(), 100);
    }

    #[test]
    fn size_equal_to_block_is_one_part() {
        let info = source(64, 64);
        let parts = build_parts(0, &info, 64);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].bytes_to_read, 64);
    }

    #[test]
    fn empty_source_has_no_parts() {
        let info = source(0, 64);
        assert_eq!(info.num_parts, 0);
        assert!(build_parts(0, &info, 64).is_empty());
    }

    #[test]
    fn ordinals_are_dense_and_block_ids_unique() {
        let info = source(1000, 100);
        let parts = build_parts(0, &info, 100);
        for (i, part) in parts.iter().enumerate() {
            assert_eq!(part.ordinal, i as u64);
        }
        let mut ids: Vec<_> = parts.iter().map(|p| p.block_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), parts.len());
    }

    #[test]
    fn block_ids_are_stable_across_calls() {
        for ordinal in [0u64, 1, 7, 4999] {
            assert_eq!(block_id_for_ordinal(ordinal), block_id_for_ordinal(ordinal));
        }
        assert_ne!(block_id_for_ordinal(3), block_id_for_ordinal(4));
    }

    #[test]
    fn alias_defaults_to_source_name() {
        let info = SourceInfo::new("a/b.bin".to_string(), None, 10, 4, SourceKind::LocalFile);
        assert_eq!(info.target_alias, "a/b.bin");
        let renamed =
            SourceInfo::new("a/b.bin".to_string(), Some("c.bin".to_string()), 10, 4, SourceKind::LocalFile);
        assert_eq!(renamed.target_alias, "c.bin");
    }

    #[test]
    fn pipeline_fanout_respects_batch_size() {
        let sources: Vec<SourceInfo> = (0..7).map(|i| source(10 + i, 4)).collect();
        let batches = split_for_pipelines(sources, 3);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(batches[1].len(), 3);
        assert_eq!(batches[2].len(), 1);
    }
}
