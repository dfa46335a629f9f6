//! Temp-file staging for fetched segments.
//!
//! Every staged file is owned by exactly one [`StagedFile`] token. The token is moved along
//! the pipeline (fetcher → preload queue → encode task) and removes its file when dropped,
//! so release happens once on every exit path.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Creation/release counts for a staging area.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StagingStats {
    pub created: u64,
    pub released: u64,
}

impl StagingStats {
    /// Files created but not yet released.
    pub fn live(&self) -> u64 {
        self.created.saturating_sub(self.released)
    }
}

#[derive(Debug, Default)]
struct StageCounters {
    next_id: AtomicU64,
    created: AtomicU64,
    released: AtomicU64,
}

/// A directory plus naming scheme for staged segment files.
#[derive(Clone, Debug)]
pub struct StagingArea {
    dir: PathBuf,
    prefix: String,
    counters: Arc<StageCounters>,
}

impl StagingArea {
    /// Use `dir` for staged files named `<prefix>-…`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            prefix: prefix.into(),
            counters: Arc::new(StageCounters::default()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve a new, empty staged file. `label` ends up in the file name for debugging.
    pub fn stage(&self, label: &str) -> io::Result<StagedFile> {
        let seq = self.counters.next_id.fetch_add(1, Ordering::Relaxed);
        let path = make_temp_path(&self.dir, &self.prefix, seq, label);
        OpenOptions::new().write(true).create_new(true).open(&path)?;
        self.counters.created.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(path = %path.display(), "staged file created");
        Ok(StagedFile {
            path,
            counters: self.counters.clone(),
        })
    }

    pub fn stats(&self) -> StagingStats {
        StagingStats {
            created: self.counters.created.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
        }
    }

    /// Remove files left behind by an earlier run using the same prefix.
    pub fn cleanup_stale(&self) -> io::Result<usize> {
        cleanup_temp_files(&self.dir, &self.prefix)
    }
}

/// Remove stale staged files whose names start with `<prefix>-`.
pub fn cleanup_temp_files(dir: &Path, prefix: &str) -> io::Result<usize> {
    let marker = format!("{prefix}-");
    let mut removed = 0usize;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if !file_name.starts_with(&marker) {
            continue;
        }
        if std::fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Unique per process and per staging sequence number.
fn make_temp_path(dir: &Path, prefix: &str, seq: u64, label: &str) -> PathBuf {
    let pid = std::process::id();
    dir.join(format!("{prefix}-{pid}-{seq}-{label}.wav"))
}

/// Move-only ownership token for one staged file.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    counters: Arc<StageCounters>,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size on disk.
    pub fn size_on_disk(&self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), "staged file cleanup warning: {e}"),
        }
        self.counters.released.fetch_add(1, Ordering::Relaxed);
    }
}
