//! Top-level facade (spec.md §2): wires AFT → LMI → ISE → CS and exposes
//! `Search`/`List`/`Stat`/`RefreshPath`/`Schedule`/`CancelTask`/`Close`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::aft::Aft;
use crate::config::Config;
use crate::cs::task::{TaskId, TaskKind, TaskPriority};
use crate::cs::{CacheScheduler, TaskHandler};
use crate::error::{CoreError, Result};
use crate::events::{EventReceiver, EventSender};
use crate::fs_source::FsSource;
use crate::ise::{SearchEngine, SearchOptions, SearchOutcome};
use crate::kv::{KvStore, RedisKvStore};
use crate::lmi::LayeredIndex;
use crate::types::Entry;

/// Owns every subsystem and is the only thing a host application constructs
/// directly.
pub struct Core {
    lmi: Arc<LayeredIndex>,
    ise: Arc<SearchEngine>,
    cs: CacheScheduler,
    aft: Arc<Aft>,
    events: EventSender,
}

impl Core {
    /// Connect to the K/V store, wire every subsystem, and return. Does not
    /// run the initial scan -- call `run_initial_scan` once the caller is
    /// ready to serve traffic (spec.md §4.1 "Progressive initial scan").
    pub async fn connect(root: PathBuf, fs: Arc<dyn FsSource>, config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let kv: Arc<dyn KvStore> = match RedisKvStore::connect(&config.kv_url).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                // K/V connection loss is fatal to initialization (spec.md §4.1
                // "Failure semantics").
                return Err(CoreError::KvUnavailable { during_init: true, source: e.to_string() });
            }
        };

        Ok(Self::wire(root, fs, kv, config))
    }

    /// Wire every subsystem over an already-connected K/V store. Split from
    /// `connect` so tests can inject `InMemoryKvStore`.
    pub fn wire(root: PathBuf, fs: Arc<dyn FsSource>, kv: Arc<dyn KvStore>, config: Arc<Config>) -> Self {
        let (events, _rx) = crate::events::channel();
        let aft = Arc::new(Aft::new(config.aft_cap));
        let lmi = Arc::new(LayeredIndex::new(root, fs, aft.clone(), kv.clone(), config.clone(), events.clone()));
        let ise = Arc::new(SearchEngine::new(kv, aft.clone(), config.clone(), events.clone()));

        let handlers = build_handlers(lmi.clone(), ise.clone());
        let cs = CacheScheduler::new(config, events.clone(), handlers);

        Self { lmi, ise, cs, aft, events }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Run the progressive initial scan and start the watcher.
    pub async fn run_initial_scan(&self) -> Result<()> {
        self.lmi.initialize().await?;
        self.ise.load_persisted().await;
        Ok(())
    }

    pub async fn search(&self, query: &str, opts: SearchOptions) -> Result<SearchOutcome> {
        self.ise.search(query, opts).await
    }

    pub async fn list(&self, dir: &str) -> Result<Vec<Entry>> {
        self.lmi.list(dir).await
    }

    pub async fn stat(&self, path: &str) -> Result<Option<Entry>> {
        let found = self.lmi.stat(path).await?;
        if found.is_some() {
            self.ise.touch_access(path);
        }
        Ok(found)
    }

    pub async fn refresh_path(&self, path: &str) -> Result<()> {
        self.lmi.refresh_path(path).await
    }

    /// Schedule a task by its wire-format kind string. An unrecognized kind
    /// still goes through the scheduler so its `taskScheduled`/`taskFailed`
    /// events fire (spec.md's event/failure table), rather than being
    /// rejected before a task ever exists.
    pub async fn schedule(&self, kind: &str, params: Value, priority: TaskPriority) -> Result<TaskId> {
        let kind = TaskKind::from_str(kind).unwrap_or(TaskKind::Unknown);
        self.cs.schedule(kind, params, priority).await
    }

    pub async fn cancel_task(&self, task_id: &str) -> bool {
        self.cs.cancel_task(task_id).await
    }

    pub async fn close(&self) {
        self.cs.close();
        self.lmi.abort_scanning().await;
        self.lmi.close().await;
    }

    pub fn aft(&self) -> &Arc<Aft> {
        &self.aft
    }
}

/// Build the task-kind handler table the scheduler dispatches into,
/// closing over `Arc<LayeredIndex>`/`Arc<SearchEngine>` so `cs` itself never
/// depends on either concretely.
fn build_handlers(lmi: Arc<LayeredIndex>, ise: Arc<SearchEngine>) -> HashMap<TaskKind, TaskHandler> {
    let mut handlers: HashMap<TaskKind, TaskHandler> = HashMap::new();

    {
        let lmi = lmi.clone();
        handlers.insert(
            TaskKind::ScanDirectory,
            Arc::new(move |params: Value| {
                let lmi = lmi.clone();
                Box::pin(async move {
                    let path = params.get("path").and_then(|v| v.as_str()).unwrap_or(".").to_string();
                    lmi.refresh_path(&path).await.map(|_| Value::Null)
                })
            }),
        );
    }

    {
        let lmi = lmi.clone();
        handlers.insert(
            TaskKind::RefreshPath,
            Arc::new(move |params: Value| {
                let lmi = lmi.clone();
                Box::pin(async move {
                    let path = params.get("path").and_then(|v| v.as_str()).unwrap_or(".").to_string();
                    lmi.refresh_path(&path).await.map(|_| Value::Null)
                })
            }),
        );
    }

    {
        let lmi = lmi.clone();
        let ise = ise.clone();
        handlers.insert(
            TaskKind::SearchPreload,
            Arc::new(move |_params: Value| {
                let lmi = lmi.clone();
                let ise = ise.clone();
                Box::pin(async move {
                    for dir in ise.smart_precache_candidates() {
                        if let Err(e) = lmi.refresh_path(&dir).await {
                            log::warn!("core: precache refresh failed for {dir}: {e}");
                        }
                    }
                    Ok(Value::Null)
                })
            }),
        );
    }

    {
        let ise = ise.clone();
        handlers.insert(
            TaskKind::AnalyticsSave,
            Arc::new(move |_params: Value| {
                let ise = ise.clone();
                Box::pin(async move { ise.persist_analytics().await.map(|_| Value::Null) })
            }),
        );
    }

    handlers.insert(
        TaskKind::Cleanup,
        Arc::new(|_params: Value| Box::pin(async move { Ok(Value::Null) })),
    );

    handlers.insert(
        TaskKind::MemoryOptimize,
        Arc::new(|_params: Value| Box::pin(async move { Ok(Value::Null) })),
    );

    handlers.insert(
        TaskKind::MetadataScan,
        Arc::new(move |params: Value| {
            let lmi = lmi.clone();
            Box::pin(async move {
                let path = params.get("path").and_then(|v| v.as_str()).unwrap_or(".").to_string();
                lmi.refresh_path(&path).await.map(|_| Value::Null)
            })
        }),
    );

    handlers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_source::StdFsSource;
    use crate::kv::InMemoryKvStore;

    fn make_config() -> Config {
        let mut c = Config::default();
        c.scan_phases = [
            crate::config::ScanPhaseBudget { slice: std::time::Duration::from_millis(5), yield_every: 1 },
            crate::config::ScanPhaseBudget { slice: std::time::Duration::from_millis(5), yield_every: 1 },
            crate::config::ScanPhaseBudget { slice: std::time::Duration::from_millis(5), yield_every: 1 },
        ];
        c.dispatch_tick = std::time::Duration::from_millis(5);
        c
    }

    #[tokio::test]
    async fn list_and_stat_after_initial_scan() {
        let _ = env_logger::try_init();
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"hi").unwrap();

        let fs: Arc<dyn FsSource> = Arc::new(StdFsSource::new(tmp.path()));
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let config = Arc::new(make_config());
        let core = Core::wire(tmp.path().to_path_buf(), fs, kv, config);
        core.run_initial_scan().await.unwrap();

        let children = core.list(".").await.unwrap();
        assert_eq!(children.len(), 1);
        let stat = core.stat("a.txt").await.unwrap().unwrap();
        assert_eq!(stat.size, 2);
    }

    #[tokio::test]
    async fn schedule_unknown_kind_string_fails_with_event() {
        let tmp = tempfile::tempdir().unwrap();
        let fs: Arc<dyn FsSource> = Arc::new(StdFsSource::new(tmp.path()));
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let config = Arc::new(make_config());
        let core = Core::wire(tmp.path().to_path_buf(), fs, kv, config);

        let mut rx = core.subscribe();
        let task_id = core.schedule("NOT_A_KIND", Value::Null, TaskPriority::Normal).await.unwrap();

        let mut saw_failed = false;
        for _ in 0..10 {
            let Ok(Ok(event)) = tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv()).await else {
                continue;
            };
            if matches!(event, crate::events::CoreEvent::TaskFailed { task_id: id, .. } if id == task_id) {
                saw_failed = true;
                break;
            }
        }
        assert!(saw_failed);
    }

    #[tokio::test]
    async fn schedule_refresh_path_runs_to_completion() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"hi").unwrap();
        let fs: Arc<dyn FsSource> = Arc::new(StdFsSource::new(tmp.path()));
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let config = Arc::new(make_config());
        let core = Core::wire(tmp.path().to_path_buf(), fs, kv, config);

        let mut rx = core.subscribe();
        core.schedule("REFRESH_PATH", serde_json::json!({"path": "."}), TaskPriority::Critical).await.unwrap();

        let mut completed = false;
        for _ in 0..20 {
            let Ok(Ok(event)) = tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv()).await else {
                continue;
            };
            if matches!(event, crate::events::CoreEvent::TaskCompleted { .. }) {
                completed = true;
                break;
            }
        }
        assert!(completed);
    }
}
