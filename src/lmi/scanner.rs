//! Progressive three-phase initial scan (spec.md §4.1), generalizing the
//! teacher's jwalk-based full-volume scan (`indexing/scanner.rs`) from one
//! SQLite batch insert to three independent tier-writing passes, each with
//! its own slice budget and yield granularity.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use jwalk::WalkDir;

use crate::aft::Aft;
use crate::config::{Config, ScanPhaseBudget};
use crate::lmi::writer::{IndexWriter, WriteMessage};
use crate::types::{Entry, Tier, extension_of, mime_for_extension, normalize_rel_path, parent_of};

/// Progress counters for an in-flight scan, atomically updated so a caller
/// can poll without synchronizing with the scan task.
#[derive(Default)]
pub struct ScanProgress {
    pub entries_written: AtomicU64,
    pub current_phase: AtomicU64,
}

/// Handle for cancelling an in-flight scan (spec.md §4.1 `AbortScanning`).
#[derive(Clone)]
pub struct ScanHandle {
    cancelled: Arc<AtomicBool>,
    pub progress: Arc<ScanProgress>,
}

impl ScanHandle {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(ScanProgress::default()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

impl Default for ScanHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub total_entries: u64,
    pub duration: Duration,
    pub was_cancelled: bool,
}

/// One entry discovered by a walk, before tier-specific priority is attached.
struct WalkedEntry {
    rel: String,
    name: String,
    is_directory: bool,
}

/// Walk `root` with jwalk, filtering out symlinks and non-file/dir entries
/// only. Permission-denied entries are skipped silently; other I/O errors are
/// logged and do not abort the walk (spec.md §4.1 "Entry filtering during
/// scan"). The `node_modules`/`.git`/dotfile ignore list is scoped to the
/// filesystem watcher (see `watcher::is_ignored`) and must not apply here --
/// any readable entry, hidden or not, gets indexed on the initial scan.
fn walk(root: &std::path::Path) -> Vec<WalkedEntry> {
    let walker = WalkDir::new(root).skip_hidden(false).follow_links(false).sort(false);

    let mut out = Vec::new();
    for entry_result in walker {
        let entry = match entry_result {
            Ok(e) => e,
            Err(e) => {
                log::debug!("lmi/scanner: skipping errored entry: {e}");
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            continue;
        }
        if !file_type.is_dir() && !file_type.is_file() {
            continue;
        }

        let path = entry.path();
        let rel = match path.strip_prefix(root) {
            Ok(r) => normalize_rel_path(&r.to_string_lossy()),
            Err(_) => continue,
        };
        out.push(WalkedEntry {
            rel,
            name: entry.file_name().to_string_lossy().to_string(),
            is_directory: file_type.is_dir(),
        });
    }
    out
}

fn build_entry(fs: &dyn crate::fs_source::FsSource, aft: &Aft, walked: &WalkedEntry) -> Option<Entry> {
    if !fs.access(&walked.rel) {
        log::debug!("lmi/scanner: permission denied, skipping {}", walked.rel);
        return None;
    }
    let stat = match fs.lstat(&walked.rel) {
        Ok(s) => s,
        Err(e) => {
            log::debug!("lmi/scanner: stat failed for {}: {e}", walked.rel);
            return None;
        }
    };

    let extension = extension_of(&walked.name, walked.is_directory);
    Some(Entry {
        name: walked.name.clone(),
        is_directory: walked.is_directory,
        size: stat.size,
        mtime: stat.mtime,
        ctime: stat.ctime,
        mime: mime_for_extension(&extension),
        extension,
        priority: aft.priority(&walked.rel),
        parent: parent_of(&walked.rel),
        full: walked.rel.clone(),
    })
}

async fn run_phase(
    tier: Tier,
    entries: &[WalkedEntry],
    fs: &dyn crate::fs_source::FsSource,
    aft: &Aft,
    writer: &IndexWriter,
    handle: &ScanHandle,
    budget: ScanPhaseBudget,
) -> (u64, bool) {
    let mut written = 0u64;
    let mut slice_start = Instant::now();

    for (i, walked) in entries.iter().enumerate() {
        if handle.is_cancelled() {
            return (written, true);
        }

        if let Some(entry) = build_entry(fs, aft, walked) {
            let msg = match tier {
                Tier::Meta => WriteMessage::WriteMeta(entry),
                Tier::Content => WriteMessage::WriteContent(entry),
                Tier::Dir => WriteMessage::WriteDirField(entry),
            };
            writer.send_scan(msg);
            written += 1;
            handle.progress.entries_written.fetch_add(1, Ordering::Relaxed);
        }

        let at_yield_point = (i as u32 + 1) % budget.yield_every == 0;
        if at_yield_point || slice_start.elapsed() >= budget.slice {
            tokio::task::yield_now().await;
            slice_start = Instant::now();
            if handle.is_cancelled() {
                return (written, true);
            }
        }
    }

    (written, false)
}

/// Run the full three-phase progressive scan against `root`. The watcher
/// should be started once this returns without cancellation (spec.md §9
/// decision: watcher starts after phase 3).
pub async fn run_progressive_scan(
    root: PathBuf,
    fs: &dyn crate::fs_source::FsSource,
    aft: &Aft,
    writer: &IndexWriter,
    config: &Config,
    handle: &ScanHandle,
) -> ScanSummary {
    let start = Instant::now();
    let entries = walk(&root);
    let total = entries.len() as u64;

    let mut last_written = 0u64;
    for (phase_idx, tier) in [Tier::Meta, Tier::Content, Tier::Dir].into_iter().enumerate() {
        handle.progress.current_phase.store(phase_idx as u64 + 1, Ordering::Relaxed);
        let (written, cancelled) = run_phase(tier, &entries, fs, aft, writer, handle, config.scan_phases[phase_idx]).await;
        last_written = written;
        if cancelled {
            log::info!("lmi/scanner: cancelled during phase {} ({written}/{total} written)", phase_idx + 1);
            return ScanSummary {
                total_entries: written,
                duration: start.elapsed(),
                was_cancelled: true,
            };
        }
    }

    let created = chrono::Utc::now().timestamp();
    for tier in [Tier::Meta, Tier::Content, Tier::Dir] {
        writer.send_scan(WriteMessage::TierVersionMeta {
            tier,
            created,
            version: 1,
            total_items: last_written,
        });
    }
    writer.barrier().await;

    ScanSummary {
        total_entries: last_written,
        duration: start.elapsed(),
        was_cancelled: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_source::StdFsSource;
    use crate::kv::InMemoryKvStore;
    use crate::lmi::store;
    use std::sync::Arc as StdArc;

    fn make_config() -> Config {
        let mut c = Config::default();
        // shrink budgets so tests don't depend on wall-clock timing
        c.scan_phases = [
            crate::config::ScanPhaseBudget { slice: Duration::from_millis(5), yield_every: 1 },
            crate::config::ScanPhaseBudget { slice: Duration::from_millis(5), yield_every: 1 },
            crate::config::ScanPhaseBudget { slice: Duration::from_millis(5), yield_every: 1 },
        ];
        c
    }

    #[tokio::test]
    async fn scans_nested_tree_into_all_tiers() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"hi").unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/c.txt"), b"hello").unwrap();

        let fs = StdFsSource::new(tmp.path());
        let aft = StdArc::new(Aft::new(1000));
        let kv: StdArc<dyn crate::kv::KvStore> = StdArc::new(InMemoryKvStore::new());
        let writer = IndexWriter::spawn(kv.clone(), aft.clone());
        let handle = ScanHandle::new();
        let config = make_config();

        let summary = run_progressive_scan(tmp.path().to_path_buf(), &fs, &aft, &writer, &config, &handle).await;
        assert!(!summary.was_cancelled);

        let root_children = store::read_dir_tier(&*kv, ".").await.unwrap();
        assert_eq!(root_children.len(), 2);

        let sub_children = store::read_dir_tier(&*kv, "sub").await.unwrap();
        assert_eq!(sub_children.len(), 1);
        assert_eq!(sub_children[0].full, "sub/c.txt");

        let stat = store::read_stat(&*kv, "sub/c.txt").await.unwrap().unwrap();
        assert_eq!(stat.size, 5);
    }

    #[tokio::test]
    async fn cancellation_stops_before_later_phases() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..50 {
            std::fs::write(tmp.path().join(format!("f{i}.txt")), b"x").unwrap();
        }

        let fs = StdFsSource::new(tmp.path());
        let aft = StdArc::new(Aft::new(1000));
        let kv: StdArc<dyn crate::kv::KvStore> = StdArc::new(InMemoryKvStore::new());
        let writer = IndexWriter::spawn(kv.clone(), aft.clone());
        let handle = ScanHandle::new();
        handle.cancel();
        let config = make_config();

        let summary = run_progressive_scan(tmp.path().to_path_buf(), &fs, &aft, &writer, &config, &handle).await;
        assert!(summary.was_cancelled);
    }
}
