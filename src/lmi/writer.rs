//! Single-writer serialization for all K/V tier writes, generalizing the
//! teacher's `IndexWriter`/`WriteMessage` thread (`indexing/writer.rs`) from
//! one SQLite connection to the generic `KvStore` boundary. All tier writes
//! (scanner, watcher, `RefreshPath`) funnel through one task so the K/V
//! connection is never contended (spec.md §5).

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::aft::Aft;
use crate::kv::KvStore;
use crate::lmi::store;
use crate::types::Entry;

/// One unit of write work. Watcher-sourced messages are drained ahead of
/// scan-sourced ones, mirroring the teacher's dir-stats-first priority rule,
/// since a single slow-moving full scan must not delay live coherence.
pub enum WriteMessage {
    WriteAllTiers(Entry),
    WriteMeta(Entry),
    WriteContent(Entry),
    WriteDirField(Entry),
    DeleteEntry { path: String, parent: String, name: String },
    DeleteSubtree { path: String, parent: String, name: String },
    TierVersionMeta { tier: crate::types::Tier, created: i64, version: u32, total_items: u64 },
    /// Round-trips through the writer so callers can be sure prior writes
    /// have landed before proceeding (used by `RefreshPath` tests).
    Barrier(oneshot::Sender<()>),
}

/// Handle for submitting writes. Cloneable; every clone shares the same
/// underlying channels.
#[derive(Clone)]
pub struct IndexWriter {
    watcher_tx: mpsc::UnboundedSender<WriteMessage>,
    scan_tx: mpsc::UnboundedSender<WriteMessage>,
}

impl IndexWriter {
    /// Spawn the writer task. Returns the handle; the task runs until every
    /// handle clone (and its internal channel pair) is dropped. `aft` supplies
    /// the real `last_access` timestamp for Meta-tier writes.
    pub fn spawn(kv: Arc<dyn KvStore>, aft: Arc<Aft>) -> Self {
        let (watcher_tx, mut watcher_rx) = mpsc::unbounded_channel::<WriteMessage>();
        let (scan_tx, mut scan_rx) = mpsc::unbounded_channel::<WriteMessage>();

        tokio::spawn(async move {
            loop {
                // Drain all pending watcher-priority messages first.
                let mut drained_any = false;
                while let Ok(msg) = watcher_rx.try_recv() {
                    apply(&*kv, &aft, msg).await;
                    drained_any = true;
                }

                if drained_any {
                    continue;
                }

                tokio::select! {
                    biased;
                    msg = watcher_rx.recv() => {
                        match msg {
                            Some(msg) => apply(&*kv, &aft, msg).await,
                            None if scan_rx.is_closed() => break,
                            None => {}
                        }
                    }
                    msg = scan_rx.recv() => {
                        match msg {
                            Some(msg) => apply(&*kv, &aft, msg).await,
                            None if watcher_rx.is_closed() => break,
                            None => {}
                        }
                    }
                }
            }
        });

        Self { watcher_tx, scan_tx }
    }

    pub fn send_watcher(&self, msg: WriteMessage) {
        if self.watcher_tx.send(msg).is_err() {
            log::warn!("lmi/writer: watcher channel closed, dropping write");
        }
    }

    pub fn send_scan(&self, msg: WriteMessage) {
        if self.scan_tx.send(msg).is_err() {
            log::warn!("lmi/writer: scan channel closed, dropping write");
        }
    }

    /// Wait until every message sent so far has been applied.
    pub async fn barrier(&self) {
        let (tx, rx) = oneshot::channel();
        self.send_watcher(WriteMessage::Barrier(tx));
        let _ = rx.await;
    }
}

async fn apply(kv: &dyn KvStore, aft: &Aft, msg: WriteMessage) {
    match msg {
        WriteMessage::WriteAllTiers(entry) => {
            let last_access = aft.last_access(&entry.full).unwrap_or(entry.mtime);
            if let Err(e) = store::write_all_tiers(kv, &entry, last_access).await {
                log::warn!("lmi/writer: write_all_tiers failed for {}: {e}", entry.full);
            }
        }
        WriteMessage::WriteMeta(entry) => {
            let last_access = aft.last_access(&entry.full).unwrap_or(entry.mtime);
            if let Err(e) = store::write_meta(kv, &entry, last_access).await {
                log::warn!("lmi/writer: write_meta failed for {}: {e}", entry.full);
            }
        }
        WriteMessage::WriteContent(entry) => {
            if let Err(e) = store::write_content(kv, &entry).await {
                log::warn!("lmi/writer: write_content failed for {}: {e}", entry.full);
            }
        }
        WriteMessage::WriteDirField(entry) => {
            if let Err(e) = store::write_dir_field(kv, &entry).await {
                log::warn!("lmi/writer: write_dir_field failed for {}: {e}", entry.full);
            }
        }
        WriteMessage::DeleteEntry { path, parent, name } => {
            if let Err(e) = store::delete_entry(kv, &path, &parent, &name).await {
                log::warn!("lmi/writer: delete_entry failed for {path}: {e}");
            }
        }
        WriteMessage::DeleteSubtree { path, parent, name } => {
            if let Err(e) = store::delete_subtree(kv, &path, &parent, &name).await {
                log::warn!("lmi/writer: delete_subtree failed for {path}: {e}");
            }
        }
        WriteMessage::TierVersionMeta { tier, created, version, total_items } => {
            if let Err(e) = store::write_tier_version_meta(kv, tier, created, version, total_items).await {
                log::warn!("lmi/writer: write_tier_version_meta failed: {e}");
            }
        }
        WriteMessage::Barrier(tx) => {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvStore;
    use crate::types::Priority;

    fn sample_entry(full: &str) -> Entry {
        Entry {
            name: crate::types::basename(full).to_string(),
            is_directory: false,
            size: 1,
            mtime: 1,
            ctime: 1,
            extension: String::new(),
            mime: String::new(),
            priority: Priority::Medium,
            parent: crate::types::parent_of(full),
            full: full.to_string(),
        }
    }

    #[tokio::test]
    async fn writes_land_before_barrier_returns() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let writer = IndexWriter::spawn(kv.clone(), Arc::new(Aft::new(1000)));

        writer.send_scan(WriteMessage::WriteAllTiers(sample_entry("a.txt")));
        writer.barrier().await;

        let found = store::read_stat(&*kv, "a.txt").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn watcher_writes_apply_even_amid_scan_writes() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let writer = IndexWriter::spawn(kv.clone(), Arc::new(Aft::new(1000)));

        for i in 0..20 {
            writer.send_scan(WriteMessage::WriteAllTiers(sample_entry(&format!("bulk{i}.txt"))));
        }
        writer.send_watcher(WriteMessage::WriteAllTiers(sample_entry("urgent.txt")));
        writer.barrier().await;

        assert!(store::read_stat(&*kv, "urgent.txt").await.unwrap().is_some());
    }
}
