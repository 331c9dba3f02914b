use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};

use tracing::debug;

use crate::part::{Part, SourceInfo, WorkerResult};

use super::{CommittedList, PostWrite, TargetError, TargetPipeline, WriteStats};

/// Local-file destination. One handle per target alias, guarded by a lock so
/// concurrent workers coordinate their positional writes. Local disk errors
/// are reported, not retried.
pub struct FileTarget {
    root: PathBuf,
    overwrite: bool,
    open: Mutex<HashMap<String, OpenFile>>,
}

#[derive(Clone)]
struct OpenFile {
    file: Arc<Mutex<File>>,
    expected_size: u64,
}

impl FileTarget {
    pub fn new(root: impl Into<PathBuf>, overwrite: bool) -> Self {
        Self {
            root: root.into(),
            overwrite,
            open: Mutex::new(HashMap::new()),
        }
    }

    fn handle_for(&self, alias: &str) -> Result<OpenFile, TargetError> {
        self.open
            .lock()
            .unwrap()
            .get(alias)
            .cloned()
            .ok_or_else(|| TargetError::UnknownAlias(alias.to_string()))
    }
}

impl TargetPipeline for FileTarget {
    fn preprocess_source(&self, source: &SourceInfo, _block_size: u64) -> Result<(), TargetError> {
        let path = self.root.join(&source.target_alias);
        if !self.overwrite && path.exists() {
            return Err(TargetError::AlreadyExists(path.display().to_string()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        debug!("opened destination file {}", path.display());
        self.open.lock().unwrap().insert(
            source.target_alias.clone(),
            OpenFile {
                file: Arc::new(Mutex::new(file)),
                expected_size: source.size,
            },
        );
        Ok(())
    }

    fn write_part(&self, part: &Part) -> Result<WriteStats, TargetError> {
        let data = part
            .data
            .as_deref()
            .ok_or(TargetError::EmptyPart(part.ordinal))?;
        let handle = self.handle_for(&part.target_alias)?;
        let started_at = SystemTime::now();
        let clock = Instant::now();

        let file = handle.file.lock().unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            file.write_all_at(data, part.offset)?;
        }
        #[cfg(not(unix))]
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut f = &*file;
            f.seek(SeekFrom::Start(part.offset))?;
            f.write_all(data)?;
        }
        drop(file);

        Ok(WriteStats {
            duration: clock.elapsed(),
            started_at,
            retries: 0,
        })
    }

    fn process_written_part(
        &self,
        _result: &WorkerResult,
        _list: &mut CommittedList,
    ) -> Result<PostWrite, TargetError> {
        Ok(PostWrite { requeue: false })
    }

    /// Closes the handle; success iff the file reached the declared size.
    fn commit_list(
        &self,
        _list: &CommittedList,
        _num_parts: u64,
        target_alias: &str,
    ) -> Result<(), TargetError> {
        let handle = self
            .open
            .lock()
            .unwrap()
            .remove(target_alias)
            .ok_or_else(|| TargetError::UnknownAlias(target_alias.to_string()))?;
        let file = handle.file.lock().unwrap();
        file.sync_all()?;
        let actual = file.metadata()?.len();
        if actual != handle.expected_size {
            return Err(TargetError::SizeMismatch {
                alias: target_alias.to_string(),
                expected: handle.expected_size,
                actual,
            });
        }
        debug!("closed {target_alias} at {actual} bytes");
        Ok(())
    }
}
