//! Layered Metadata Index (spec.md §4.1): three K/V tiers over a watched
//! filesystem root, populated by a progressive scan and kept coherent by a
//! recursive watcher. This module is the facade other collaborators call;
//! `scanner`, `watcher`, `writer`, and `store` are its implementation.

pub mod scanner;
pub mod store;
pub mod watcher;
pub mod writer;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use crate::aft::Aft;
use crate::config::Config;
use crate::error::Result;
use crate::events::EventSender;
use crate::fs_source::FsSource;
use crate::types::{Entry, list_order, normalize_rel_path};

use scanner::{ScanHandle, ScanSummary};
use writer::{IndexWriter, WriteMessage};

/// Owns the scanner/watcher lifecycle and provides `List`/`Stat`/`Search`/
/// `RefreshPath`/`AbortScanning`/`Close` (spec.md §2).
pub struct LayeredIndex {
    root: PathBuf,
    fs: Arc<dyn FsSource>,
    aft: Arc<Aft>,
    kv: Arc<dyn crate::kv::KvStore>,
    config: Arc<Config>,
    events: EventSender,
    writer: IndexWriter,
    scan_handle: Mutex<Option<ScanHandle>>,
    watcher: Mutex<Option<watcher::FsWatcher>>,
    closed: AtomicBool,
}

impl LayeredIndex {
    pub fn new(root: PathBuf, fs: Arc<dyn FsSource>, aft: Arc<Aft>, kv: Arc<dyn crate::kv::KvStore>, config: Arc<Config>, events: EventSender) -> Self {
        let writer = IndexWriter::spawn(kv.clone(), aft.clone());
        Self {
            root,
            fs,
            aft,
            kv,
            config,
            events,
            writer,
            scan_handle: Mutex::new(None),
            watcher: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Run the progressive initial scan, then start the watcher (spec.md §9
    /// decision: the watcher starts only after phase 3 completes, so it
    /// never races the scanner's own writes).
    pub async fn initialize(&self) -> Result<ScanSummary> {
        let handle = ScanHandle::new();
        *self.scan_handle.lock().await = Some(handle.clone());

        let summary = scanner::run_progressive_scan(self.root.clone(), &*self.fs, &self.aft, &self.writer, &self.config, &handle).await;

        if !summary.was_cancelled {
            match watcher::start(self.root.clone(), self.fs.clone(), self.aft.clone(), self.writer.clone(), self.config.clone(), self.events.clone()) {
                Ok(w) => *self.watcher.lock().await = Some(w),
                Err(e) => log::warn!("lmi: failed to start watcher: {e}"),
            }
        }

        Ok(summary)
    }

    /// Direct children of `dir`, preferring the Dir tier with a Content-then-
    /// Meta fallback used only while initial indexing is still in flight
    /// (spec.md §2 `List`). Touches AFT for every returned entry.
    pub async fn list(&self, dir: &str) -> Result<Vec<Entry>> {
        let dir = normalize_rel_path(dir);
        let mut entries = store::read_dir_tier(&*self.kv, &dir).await?;
        if entries.is_empty() {
            entries = store::read_content_tier_children(&*self.kv, &dir).await?;
        }
        if entries.is_empty() {
            entries = store::read_meta_tier_children(&*self.kv, &dir).await?;
        }

        entries.sort_by(list_order);
        for entry in &entries {
            self.aft.touch(&entry.full);
        }
        Ok(entries)
    }

    /// Content-then-Meta read for a single path (spec.md §2 `Stat`).
    pub async fn stat(&self, path: &str) -> Result<Option<Entry>> {
        let path = normalize_rel_path(path);
        let found = store::read_stat(&*self.kv, &path).await?;
        if found.is_some() {
            self.aft.touch(&path);
        }
        Ok(found)
    }

    /// Raw substring search within one tier, used by the ISE (spec.md §4.1
    /// "Cross-tier search (searchInLayer)").
    pub async fn search_in_layer(&self, tier: crate::types::Tier, query_lower: &str, limit: usize, min_priority: crate::types::Priority) -> Result<Vec<Entry>> {
        store::search_in_layer(&*self.kv, tier, query_lower, limit, min_priority).await
    }

    /// Rescan the subtree at `path` (or the single entry, if a file) and
    /// rewrite all three tiers for it (spec.md §2 `RefreshPath`).
    pub async fn refresh_path(&self, path: &str) -> Result<()> {
        let path = normalize_rel_path(path);

        let stat = match self.fs.lstat(&path) {
            Ok(s) => s,
            Err(_) => {
                // Entry no longer exists: treat as a removal (spec.md §4.1 `unlink`/`unlinkDir`).
                let parent = crate::types::parent_of(&path);
                let name = crate::types::basename(&path).to_string();
                self.writer.send_scan(WriteMessage::DeleteSubtree { path: path.clone(), parent, name });
                self.aft.purge(&path);
                self.writer.barrier().await;
                return Ok(());
            }
        };

        if stat.is_dir {
            self.refresh_directory(&path).await?;
        } else {
            self.refresh_file(&path, stat).await?;
        }
        self.writer.barrier().await;
        Ok(())
    }

    async fn refresh_file(&self, path: &str, stat: crate::fs_source::RawStat) -> Result<()> {
        let name = crate::types::basename(path).to_string();
        let extension = crate::types::extension_of(&name, false);
        let entry = Entry {
            mime: crate::types::mime_for_extension(&extension),
            extension,
            name,
            is_directory: false,
            size: stat.size,
            mtime: stat.mtime,
            ctime: stat.ctime,
            priority: self.aft.priority(path),
            parent: crate::types::parent_of(path),
            full: path.to_string(),
        };
        self.writer.send_scan(WriteMessage::WriteAllTiers(entry));
        Ok(())
    }

    async fn refresh_directory(&self, path: &str) -> Result<()> {
        let rel_root = if path == "." { String::new() } else { path.to_string() };
        if path != "." {
            let entry = Entry {
                name: crate::types::basename(path).to_string(),
                is_directory: true,
                size: 0,
                mtime: 0,
                ctime: 0,
                extension: String::new(),
                mime: String::new(),
                priority: self.aft.priority(path),
                parent: crate::types::parent_of(path),
                full: path.to_string(),
            };
            self.writer.send_scan(WriteMessage::WriteAllTiers(entry));
        }
        self.refresh_children(&rel_root)
    }

    fn refresh_children(&self, rel_root: &str) -> Result<()> {
        let rel_for_fs = if rel_root.is_empty() { "." } else { rel_root };
        let children = self.fs.read_dir(rel_for_fs)?;
        for child in children {
            if child.is_symlink {
                continue;
            }
            let rel = if rel_root.is_empty() { child.file_name.clone() } else { format!("{rel_root}/{}", child.file_name) };
            let Ok(stat) = self.fs.lstat(&rel) else { continue };
            let extension = crate::types::extension_of(&child.file_name, stat.is_dir);
            let entry = Entry {
                mime: crate::types::mime_for_extension(&extension),
                extension,
                name: child.file_name,
                is_directory: stat.is_dir,
                size: stat.size,
                mtime: stat.mtime,
                ctime: stat.ctime,
                priority: self.aft.priority(&rel),
                parent: crate::types::parent_of(&rel),
                full: rel.clone(),
            };
            self.writer.send_scan(WriteMessage::WriteAllTiers(entry));
            if stat.is_dir {
                self.refresh_children(&rel)?;
            }
        }
        Ok(())
    }

    /// Cooperative cancel of an in-flight initial/refresh scan (spec.md §2
    /// `AbortScanning`).
    pub async fn abort_scanning(&self) {
        if let Some(handle) = self.scan_handle.lock().await.as_ref() {
            handle.cancel();
        }
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        *self.watcher.lock().await = None;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fs_source::StdFsSource;
    use crate::kv::InMemoryKvStore;

    fn make_config() -> Config {
        let mut c = Config::default();
        c.scan_phases = [
            crate::config::ScanPhaseBudget { slice: std::time::Duration::from_millis(5), yield_every: 1 },
            crate::config::ScanPhaseBudget { slice: std::time::Duration::from_millis(5), yield_every: 1 },
            crate::config::ScanPhaseBudget { slice: std::time::Duration::from_millis(5), yield_every: 1 },
        ];
        c
    }

    #[tokio::test]
    async fn initialize_then_list_reflects_tree() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"hi").unwrap();
        std::fs::write(tmp.path().join("b.txt"), b"hiya").unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/c.txt"), b"hello!").unwrap();

        let fs: Arc<dyn FsSource> = Arc::new(StdFsSource::new(tmp.path()));
        let aft = Arc::new(Aft::new(1000));
        let kv: Arc<dyn crate::kv::KvStore> = Arc::new(InMemoryKvStore::new());
        let config = Arc::new(make_config());
        let (tx, _rx) = crate::events::channel();

        let index = LayeredIndex::new(tmp.path().to_path_buf(), fs, aft, kv, config, tx);
        index.initialize().await.unwrap();

        let root_children = index.list(".").await.unwrap();
        assert_eq!(root_children.len(), 3);
        assert!(root_children[0].is_directory);

        let stat = index.stat("sub/c.txt").await.unwrap().unwrap();
        assert_eq!(stat.size, 6);
    }

    #[tokio::test]
    async fn refresh_path_rewrites_new_file() {
        let tmp = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FsSource> = Arc::new(StdFsSource::new(tmp.path()));
        let aft = Arc::new(Aft::new(1000));
        let kv: Arc<dyn crate::kv::KvStore> = Arc::new(InMemoryKvStore::new());
        let config = Arc::new(make_config());
        let (tx, _rx) = crate::events::channel();

        let index = LayeredIndex::new(tmp.path().to_path_buf(), fs, aft, kv, config, tx);
        index.initialize().await.unwrap();

        std::fs::write(tmp.path().join("new.txt"), b"new").unwrap();
        index.refresh_path(".").await.unwrap();

        let root_children = index.list(".").await.unwrap();
        assert_eq!(root_children.len(), 1);
        assert_eq!(root_children[0].name, "new.txt");
    }
}
