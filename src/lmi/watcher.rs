//! Debounced recursive filesystem watcher (spec.md §4.1 "Filesystem
//! watcher"), built on the same `notify-debouncer-full` pattern as the
//! teacher's `file_system/watcher.rs`, generalized from a per-listing
//! diff-and-emit model to direct tier writes plus an `indexChanged` event.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer, notify::RecursiveMode};

use crate::aft::Aft;
use crate::config::Config;
use crate::events::{CoreEvent, EventSender, IndexOperation};
use crate::fs_source::FsSource;
use crate::lmi::store;
use crate::lmi::writer::{IndexWriter, WriteMessage};
use crate::types::{Tier, basename, normalize_rel_path, parent_of};

/// Owns the debouncer; dropping this stops the watch (spec.md §4.1 `Close`).
pub struct FsWatcher {
    _debouncer: Debouncer<notify_debouncer_full::notify::RecommendedWatcher, RecommendedCache>,
}

/// Classify a raw filesystem path against the configured ignore rules
/// (spec.md §4.1: `node_modules`, `.git`, `*.log`, `temp`, `dist`, dotfiles
/// at any depth).
fn is_ignored(rel: &str, config: &Config) -> bool {
    for component in rel.split('/') {
        if crate::config::is_dotfile(component) {
            return true;
        }
        if config.watcher_ignore_names.iter().any(|n| n == component) {
            return true;
        }
    }
    config.watcher_ignore_suffixes.iter().any(|suffix| rel.ends_with(suffix.as_str()))
}

/// Start watching `root` recursively. Runs the reconciliation work on the
/// calling Tokio runtime via a bridging channel from the debouncer's
/// callback thread.
pub fn start(
    root: PathBuf,
    fs: Arc<dyn FsSource>,
    aft: Arc<Aft>,
    writer: IndexWriter,
    config: Arc<Config>,
    events: EventSender,
) -> notify_debouncer_full::notify::Result<FsWatcher> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<DebounceEventResult>();

    let debounce_duration = config.watcher_debounce;
    let mut debouncer = new_debouncer(debounce_duration, None, move |result: DebounceEventResult| {
        if tx.send(result).is_err() {
            log::debug!("lmi/watcher: event loop gone, dropping debounced batch");
        }
    })?;

    debouncer.watch(&root, RecursiveMode::Recursive)?;

    tokio::spawn(async move {
        while let Some(result) = rx.recv().await {
            match result {
                Ok(batch) => {
                    for event in batch {
                        handle_event(&root, &event.event, &*fs, &aft, &writer, &config, &events).await;
                    }
                }
                Err(errors) => {
                    for err in errors {
                        log::warn!("lmi/watcher: internal error: {err}");
                    }
                }
            }
        }
    });

    Ok(FsWatcher { _debouncer: debouncer })
}

async fn handle_event(
    root: &std::path::Path,
    event: &notify_debouncer_full::notify::Event,
    fs: &dyn FsSource,
    aft: &Aft,
    writer: &IndexWriter,
    config: &Config,
    events: &EventSender,
) {
    use notify_debouncer_full::notify::EventKind;

    for path in &event.paths {
        let Ok(stripped) = path.strip_prefix(root) else { continue };
        let rel = normalize_rel_path(&stripped.to_string_lossy());
        if rel == "." || is_ignored(&rel, config) {
            continue;
        }

        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => reconcile_upsert(&rel, fs, aft, writer, events).await,
            EventKind::Remove(_) => reconcile_remove(&rel, fs, aft, writer, events).await,
            _ => {}
        }
    }
}

async fn reconcile_upsert(rel: &str, fs: &dyn FsSource, aft: &Aft, writer: &IndexWriter, events: &EventSender) {
    let Ok(stat) = fs.lstat(rel) else {
        // Entry vanished between the debounced event and our stat: treat as unlink
        // (spec.md §7: "filesystem entry missing mid-write" -> treat as unlink).
        reconcile_remove(rel, fs, aft, writer, events).await;
        return;
    };
    if !stat.is_dir && !stat.is_file {
        return;
    }
    if !fs.access(rel) {
        log::debug!("lmi/watcher: permission denied, skipping {rel}");
        return;
    }

    let name = basename(rel).to_string();
    let extension = crate::types::extension_of(&name, stat.is_dir);
    let entry = crate::types::Entry {
        mime: crate::types::mime_for_extension(&extension),
        extension,
        name,
        is_directory: stat.is_dir,
        size: stat.size,
        mtime: stat.mtime,
        ctime: stat.ctime,
        priority: aft.priority(rel),
        parent: parent_of(rel),
        full: rel.to_string(),
    };

    writer.send_watcher(WriteMessage::WriteMeta(entry.clone()));
    writer.send_watcher(WriteMessage::WriteContent(entry.clone()));
    writer.send_watcher(WriteMessage::WriteDirField(entry));
    aft.touch(rel);

    let op = if stat.is_dir { IndexOperation::Add } else { IndexOperation::Change };
    let _ = events.send(CoreEvent::IndexChanged {
        operation: op,
        path: rel.to_string(),
        tiers: vec![Tier::Meta, Tier::Content, Tier::Dir],
    });
}

async fn reconcile_remove(rel: &str, fs: &dyn FsSource, aft: &Aft, writer: &IndexWriter, events: &EventSender) {
    let parent = parent_of(rel);
    let name = basename(rel).to_string();

    // We can no longer stat the removed path to know if it was a directory;
    // delete both the single-entry keys and any subtree keys unconditionally
    // -- `delete_subtree` is a superset of `delete_entry` for a leaf path.
    let _ = fs; // kept for symmetry with reconcile_upsert's signature
    writer.send_watcher(WriteMessage::DeleteSubtree {
        path: rel.to_string(),
        parent: parent.clone(),
        name: name.clone(),
    });
    aft.purge(rel);

    let _ = events.send(CoreEvent::IndexChanged {
        operation: IndexOperation::RemoveDir,
        path: rel.to_string(),
        tiers: vec![Tier::Meta, Tier::Content, Tier::Dir],
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn ignores_dotfiles_and_configured_names() {
        let config = Config::default();
        assert!(is_ignored(".git/HEAD", &config));
        assert!(is_ignored("src/node_modules/pkg", &config));
        assert!(is_ignored("logs/today.log", &config));
        assert!(!is_ignored("src/main.rs", &config));
    }
}
