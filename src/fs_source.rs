//! Filesystem boundary consumed by the LMI (spec.md §6: "Filesystem boundary
//! (consumed)"). The scanner and watcher never touch `std::fs` directly so
//! tests can swap in a tempdir-backed or purely synthetic source.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{CoreError, Result};

/// One entry returned by `FsSource::read_dir`, cheap enough to collect in bulk.
#[derive(Debug, Clone)]
pub struct RawDirEntry {
    pub path: PathBuf,
    pub file_name: String,
    pub is_dir: bool,
    pub is_symlink: bool,
}

/// Metadata as the scanner needs it, already reduced from `std::fs::Metadata`.
#[derive(Debug, Clone, Copy)]
pub struct RawStat {
    pub is_dir: bool,
    pub is_file: bool,
    pub size: u64,
    pub mtime: i64,
    pub ctime: i64,
}

impl RawStat {
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            mtime: system_time_to_unix(meta.modified().ok()),
            ctime: system_time_to_unix(meta.created().ok().or_else(|| meta.modified().ok())),
        }
    }
}

fn system_time_to_unix(t: Option<SystemTime>) -> i64 {
    t.and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Abstract filesystem read boundary. Implementations must not follow
/// symlinks (spec.md §4.1: "no symlink following").
pub trait FsSource: Send + Sync {
    /// Absolute root this source is rooted at.
    fn root(&self) -> &Path;

    /// Non-recursive directory listing. `rel` is root-relative ("." for the root).
    fn read_dir(&self, rel: &str) -> Result<Vec<RawDirEntry>>;

    /// `lstat`-style metadata: does not follow a terminal symlink.
    fn lstat(&self, rel: &str) -> Result<RawStat>;

    /// `stat`-style metadata, following symlinks. Only called after `lstat`
    /// has already established the entry is not itself a symlink, so in
    /// practice this and `lstat` agree for everything the LMI indexes.
    fn stat(&self, rel: &str) -> Result<RawStat> {
        self.lstat(rel)
    }

    /// Read permission probe; must never raise, only report.
    fn access(&self, rel: &str) -> bool;
}

/// `std::fs`-backed implementation rooted at a concrete directory.
pub struct StdFsSource {
    root: PathBuf,
}

impl StdFsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn abs(&self, rel: &str) -> PathBuf {
        if rel == "." {
            self.root.clone()
        } else {
            self.root.join(rel)
        }
    }
}

impl FsSource for StdFsSource {
    fn root(&self) -> &Path {
        &self.root
    }

    fn read_dir(&self, rel: &str) -> Result<Vec<RawDirEntry>> {
        let dir = self.abs(rel);
        let read_dir = std::fs::read_dir(&dir).map_err(|e| CoreError::FsEntryUnreadable {
            path: dir.clone(),
            reason: e.to_string(),
        })?;

        let mut out = Vec::new();
        for entry in read_dir {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::debug!("fs_source: skipping errored dir entry under {}: {e}", dir.display());
                    continue;
                }
            };
            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(e) => {
                    log::debug!("fs_source: file_type failed for {:?}: {e}", entry.path());
                    continue;
                }
            };
            out.push(RawDirEntry {
                path: entry.path(),
                file_name: entry.file_name().to_string_lossy().to_string(),
                is_dir: file_type.is_dir(),
                is_symlink: file_type.is_symlink(),
            });
        }
        Ok(out)
    }

    fn lstat(&self, rel: &str) -> Result<RawStat> {
        let path = self.abs(rel);
        let meta = std::fs::symlink_metadata(&path).map_err(|e| CoreError::FsEntryUnreadable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(RawStat::from_metadata(&meta))
    }

    fn stat(&self, rel: &str) -> Result<RawStat> {
        let path = self.abs(rel);
        let meta = std::fs::metadata(&path).map_err(|e| CoreError::FsEntryUnreadable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(RawStat::from_metadata(&meta))
    }

    fn access(&self, rel: &str) -> bool {
        let path = self.abs(rel);
        std::fs::File::open(&path).is_ok() || path.is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_dir_reports_entries() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"hello").unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();

        let src = StdFsSource::new(tmp.path());
        let mut names: Vec<_> = src.read_dir(".").unwrap().into_iter().map(|e| e.file_name).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt".to_string(), "sub".to_string()]);
    }

    #[test]
    fn lstat_reports_size_for_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"hello").unwrap();
        let src = StdFsSource::new(tmp.path());
        let st = src.lstat("a.txt").unwrap();
        assert!(st.is_file);
        assert_eq!(st.size, 5);
    }

    #[test]
    fn missing_entry_is_unreadable_error() {
        let tmp = tempfile::tempdir().unwrap();
        let src = StdFsSource::new(tmp.path());
        assert!(src.lstat("nope").is_err());
    }
}
