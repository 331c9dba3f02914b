use std::fs::File;
use std::path::{Component, Path, PathBuf};

use globset::GlobBuilder;
use tracing::debug;
use walkdir::WalkDir;

use crate::part::{Part, SourceInfo, SourceKind};

use super::{alias_for, base_name, check_alias_arity, SourceError, TransferSource};

#[derive(Debug, Clone)]
pub struct MultiFileParams {
    pub patterns: Vec<String>,
    pub target_aliases: Vec<String>,
    pub keep_dir_structure: bool,
    pub block_size: u64,
}

struct FileEntry {
    file: File,
    #[cfg(not(unix))]
    lock: std::sync::Mutex<()>,
}

/// Local-file origin over one or more glob patterns.
pub struct MultiFileSource {
    sources: Vec<SourceInfo>,
    files: Vec<FileEntry>,
}

impl std::fmt::Debug for MultiFileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiFileSource")
            .field("sources", &self.sources)
            .field("files_count", &self.files.len())
            .finish()
    }
}

impl MultiFileSource {
    pub fn open(params: &MultiFileParams) -> Result<Self, SourceError> {
        let paths = enumerate(&params.patterns)?;
        check_alias_arity(&params.target_aliases, paths.len())?;
        let aliases: Vec<Option<String>> = (0..paths.len())
            .map(|i| alias_for(&params.target_aliases, i))
            .collect();
        Self::from_paths(paths, aliases, params)
    }

    /// Enumerates once, then splits the files into independent pipeline
    /// batches of at most `files_per_pipeline` sources each.
    pub fn open_pipelines(
        params: &MultiFileParams,
        files_per_pipeline: usize,
    ) -> Result<Vec<Self>, SourceError> {
        let paths = enumerate(&params.patterns)?;
        check_alias_arity(&params.target_aliases, paths.len())?;
        let paired: Vec<(PathBuf, Option<String>)> = paths
            .into_iter()
            .enumerate()
            .map(|(i, p)| (p, alias_for(&params.target_aliases, i)))
            .collect();
        crate::part::split_for_pipelines(paired, files_per_pipeline)
            .into_iter()
            .map(|batch| {
                let (paths, aliases) = batch.into_iter().unzip();
                Self::from_paths(paths, aliases, params)
            })
            .collect()
    }

    fn from_paths(
        paths: Vec<PathBuf>,
        aliases: Vec<Option<String>>,
        params: &MultiFileParams,
    ) -> Result<Self, SourceError> {
        let mut sources = Vec::with_capacity(paths.len());
        let mut files = Vec::with_capacity(paths.len());
        for (path, alias) in paths.iter().zip(aliases) {
            let file = File::open(path)?;
            let size = file.metadata()?.len();
            let source_name = path.to_string_lossy().replace('\\', "/");
            let alias = alias.unwrap_or_else(|| {
                if params.keep_dir_structure {
                    source_name.clone()
                } else {
                    base_name(&source_name)
                }
            });
            debug!("enumerated file source {source_name} size={size} alias={alias}");
            sources.push(SourceInfo::new(
                source_name,
                Some(alias),
                size,
                params.block_size,
                SourceKind::LocalFile,
            ));
            files.push(FileEntry {
                file,
                #[cfg(not(unix))]
                lock: std::sync::Mutex::new(()),
            });
        }

        Ok(Self { sources, files })
    }

    fn read_at(&self, entry: &FileEntry, offset: u64, buf: &mut [u8]) -> Result<usize, SourceError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(entry.file.read_at(buf, offset)?)
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let _guard = entry.lock.lock().unwrap();
            let mut f = &entry.file;
            f.seek(SeekFrom::Start(offset))?;
            Ok(f.read(buf)?)
        }
    }
}

impl TransferSource for MultiFileSource {
    fn sources(&self) -> &[SourceInfo] {
        &self.sources
    }

    fn read_part(&self, part: &Part, buf: &mut [u8]) -> Result<(), SourceError> {
        let entry = &self.files[part.source_index];
        let mut filled = 0usize;
        while filled < buf.len() {
            let n = self.read_at(entry, part.offset + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                return Err(SourceError::ShortRead {
                    offset: part.offset,
                    wanted: buf.len(),
                    got: filled,
                });
            }
            filled += n;
        }
        Ok(())
    }
}

fn enumerate(patterns: &[String]) -> Result<Vec<PathBuf>, SourceError> {
    let mut paths = Vec::new();
    for pattern in patterns {
        paths.extend(expand_pattern(pattern)?);
    }
    paths.sort();
    paths.dedup();
    if paths.is_empty() {
        return Err(SourceError::Empty);
    }
    Ok(paths)
}

fn has_meta(component: &str) -> bool {
    component.contains(['*', '?', '[', '{'])
}

fn expand_pattern(pattern: &str) -> Result<Vec<PathBuf>, SourceError> {
    let path = Path::new(pattern);
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let glob = GlobBuilder::new(pattern)
        .literal_separator(false)
        .build()?;
    let matcher = glob.compile_matcher();

    // Walk from the longest literal prefix of the pattern.
    let mut root = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(c) if has_meta(&c.to_string_lossy()) => break,
            other => root.push(other.as_os_str()),
        }
    }
    if root.as_path() == path {
        root.pop();
    }
    if root.as_os_str().is_empty() {
        root = PathBuf::from(".");
    }

    let mut found = Vec::new();
    for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let entry_path = entry.path();
        let candidate = entry_path.strip_prefix("./").unwrap_or(entry_path);
        if matcher.is_match(candidate) {
            found.push(candidate.to_path_buf());
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn params(patterns: Vec<String>, block_size: u64) -> MultiFileParams {
        MultiFileParams {
            patterns,
            target_aliases: Vec::new(),
            keep_dir_structure: false,
            block_size,
        }
    }

    #[test]
    fn literal_path_enumerates_one_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.bin");
        fs::write(&path, vec![1u8; 100]).expect("write");

        let src = MultiFileSource::open(&params(vec![path.to_string_lossy().into_owned()], 40))
            .expect("open");
        assert_eq!(src.sources().len(), 1);
        assert_eq!(src.sources()[0].size, 100);
        assert_eq!(src.sources()[0].num_parts, 3);
        assert_eq!(src.sources()[0].target_alias, "data.bin");
    }

    #[test]
    fn glob_pattern_matches_multiple_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["tbm1", "tbm2", "tbm3", "other"] {
            fs::write(dir.path().join(name), b"x").expect("write");
        }

        let pattern = dir.path().join("tbm*").to_string_lossy().into_owned();
        let src = MultiFileSource::open(&params(vec![pattern], 4)).expect("open");
        let names: Vec<_> = src.sources().iter().map(|s| s.target_alias.clone()).collect();
        assert_eq!(names, ["tbm1", "tbm2", "tbm3"]);
    }

    #[test]
    fn empty_enumeration_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pattern = dir.path().join("nothing*").to_string_lossy().into_owned();
        let err = MultiFileSource::open(&params(vec![pattern], 4)).expect_err("empty");
        assert!(matches!(err, SourceError::Empty));
    }

    #[test]
    fn aliases_rename_targets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.bin");
        fs::write(&path, b"abc").expect("write");

        let mut p = params(vec![path.to_string_lossy().into_owned()], 4);
        p.target_aliases = vec!["renamed.bin".to_string()];
        let src = MultiFileSource::open(&p).expect("open");
        assert_eq!(src.sources()[0].target_alias, "renamed.bin");

        p.target_aliases = vec!["x".to_string(), "y".to_string()];
        let err = MultiFileSource::open(&p).expect_err("arity");
        assert!(matches!(err, SourceError::AliasArity { .. }));
    }

    #[test]
    fn pipelines_split_the_enumeration() {
        let dir = tempfile::tempdir().expect("tempdir");
        for i in 0..5 {
            fs::write(dir.path().join(format!("tbm{i}")), b"x").expect("write");
        }
        let pattern = dir.path().join("tbm*").to_string_lossy().into_owned();
        let pipelines =
            MultiFileSource::open_pipelines(&params(vec![pattern], 4), 2).expect("open");
        assert_eq!(pipelines.len(), 3);
        assert_eq!(pipelines[0].sources().len(), 2);
        assert_eq!(pipelines[2].sources().len(), 1);
    }

    #[test]
    fn reads_exact_part_ranges() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.bin");
        let content: Vec<u8> = (0..=255u8).collect();
        fs::write(&path, &content).expect("write");

        let src = MultiFileSource::open(&params(vec![path.to_string_lossy().into_owned()], 100))
            .expect("open");
        let parts = crate::part::build_parts(0, &src.sources()[0], 100);
        assert_eq!(parts.len(), 3);

        let mut buf = vec![0u8; parts[2].bytes_to_read as usize];
        src.read_part(&parts[2], &mut buf).expect("read");
        assert_eq!(buf, &content[200..]);
    }
}
