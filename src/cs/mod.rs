//! Cache Scheduler (spec.md §4.3): a priority-queued, time-sliced
//! background task runner. Generalizes the teacher's `IndexManager`
//! task-spawning style (`indexing/mod.rs`) from a single fixed job (full
//! scan) to an open task-kind registry injected by the owning `Core`, so
//! this module never depends on the LMI/ISE concretely.

pub mod queue;
pub mod task;

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::Value;
use sysinfo::System;
use tokio::sync::{Mutex, Notify};

use crate::config::Config;
use crate::error::{CoreError, Result};
use crate::events::{CoreEvent, EventSender};
use queue::TaskQueue;
use task::{Task, TaskId, TaskKind, TaskPriority, TaskState};

pub type TaskHandler = Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

struct CompletedEntry {
    task: Task,
    completed_unix: i64,
}

struct Inner {
    queue: TaskQueue,
    completed: VecDeque<CompletedEntry>,
    /// Cancellation signal per currently-running, cancelable task (spec.md
    /// §4.3: cancellation must be observed while running, not just pending).
    running_cancels: HashMap<TaskId, Arc<Notify>>,
}

/// The background task runner. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CacheScheduler {
    inner: Arc<Mutex<Inner>>,
    running: Arc<AtomicUsize>,
    paused: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    config: Arc<Config>,
    events: EventSender,
    handlers: Arc<HashMap<TaskKind, TaskHandler>>,
    /// Last memory ratio sampled by `spawn_resource_sampler`, stored as
    /// ratio*1_000_000 so it fits an atomic integer. Read by the dispatcher
    /// to refuse new tasks under memory pressure (spec.md §4.3, §5).
    last_memory_ratio_micros: Arc<AtomicU64>,
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

impl CacheScheduler {
    pub fn new(config: Arc<Config>, events: EventSender, handlers: HashMap<TaskKind, TaskHandler>) -> Self {
        let scheduler = Self {
            inner: Arc::new(Mutex::new(Inner {
                queue: TaskQueue::new(config.max_queue_len),
                completed: VecDeque::new(),
                running_cancels: HashMap::new(),
            })),
            running: Arc::new(AtomicUsize::new(0)),
            paused: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
            config,
            events,
            handlers: Arc::new(handlers),
            last_memory_ratio_micros: Arc::new(AtomicU64::new(0)),
        };
        scheduler.spawn_dispatcher();
        scheduler.spawn_resource_sampler();
        scheduler.spawn_periodic_maintenance();
        scheduler
    }

    /// Enqueue a unit of work (spec.md §2 `Schedule`). An unrecognized kind
    /// still mints a task id and runs the full `taskScheduled` ->
    /// `taskFailed` event sequence rather than being rejected synchronously,
    /// so a caller always has something to observe through the task
    /// lifecycle (spec.md's event/failure table).
    pub async fn schedule(&self, kind: TaskKind, params: Value, priority: TaskPriority) -> Result<TaskId> {
        let mut task = Task::new(kind, params, priority, now_unix(), self.config.default_task_timeout, self.config.default_max_retries);
        let task_id = task.id.clone();
        let _ = self.events.send(CoreEvent::TaskScheduled { task_id: task_id.clone(), kind });

        if !self.handlers.contains_key(&kind) {
            task.state = TaskState::Failed;
            task.error = Some("unknown task kind".to_string());
            task.completed_at = Some(now_unix());
            let _ = self.events.send(CoreEvent::TaskFailed { task_id: task_id.clone(), reason: "unknown task kind".to_string() });
            self.finish(task).await;
            return Ok(task_id);
        }

        let dropped = {
            let mut inner = self.inner.lock().await;
            inner.queue.push(task)
        };

        if let Some(dropped) = dropped {
            let _ = self.events.send(CoreEvent::TaskDropped { task_id: dropped.task_id, reason: "queue_full".to_string() });
        }

        Ok(task_id)
    }

    /// Cancel a task, wherever it is in its lifecycle (spec.md §2 `CancelTask`,
    /// spec.md §4.3: observed while pending, while running with
    /// `cancelable=true`, or on timeout).
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.queue.remove(task_id).is_some() {
            let _ = self.events.send(CoreEvent::TaskCancelled { task_id: task_id.to_string(), reason: "cancelled".to_string() });
            return true;
        }
        if let Some(notify) = inner.running_cancels.get(task_id) {
            notify.notify_one();
            return true;
        }
        false
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
        let _ = self.events.send(CoreEvent::SchedulerPaused);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
        let _ = self.events.send(CoreEvent::SchedulerResumed);
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        let _ = self.events.send(CoreEvent::SchedulerClosed);
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub fn running_len(&self) -> usize {
        self.running.load(Ordering::Relaxed)
    }

    fn spawn_dispatcher(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.config.dispatch_tick);
            loop {
                ticker.tick().await;
                if this.closed.load(Ordering::Relaxed) {
                    break;
                }
                if this.paused.load(Ordering::Relaxed) {
                    continue;
                }
                if this.running.load(Ordering::Relaxed) >= this.config.max_concurrent_tasks {
                    continue;
                }
                let memory_ratio = this.last_memory_ratio_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
                if memory_ratio > this.config.memory_pressure_throttle {
                    continue;
                }

                let task = {
                    let mut inner = this.inner.lock().await;
                    inner.queue.pop()
                };
                if let Some(task) = task {
                    this.run_task(task);
                }
            }
        });
    }

    fn run_task(&self, mut task: Task) {
        let this = self.clone();
        self.running.fetch_add(1, Ordering::Relaxed);
        task.state = TaskState::Running;
        task.started_at = Some(now_unix());
        let _ = self.events.send(CoreEvent::TaskStarted { task_id: task.id.clone() });

        let cancel = Arc::new(Notify::new());

        tokio::spawn(async move {
            if task.cancelable {
                this.inner.lock().await.running_cancels.insert(task.id.clone(), cancel.clone());
            }

            let handler = this.handlers.get(&task.kind).cloned();
            let outcome = match handler {
                Some(handler) => {
                    tokio::select! {
                        res = tokio::time::timeout(task.timeout, handler(task.params.clone())) => Ok(res),
                        _ = cancel.notified(), if task.cancelable => Err(()),
                    }
                }
                None => Ok(Ok(Err(CoreError::UnknownTaskKind(format!("{:?}", task.kind))))),
            };

            if task.cancelable {
                let mut inner = this.inner.lock().await;
                inner.running_cancels.remove(&task.id);
            }

            match outcome {
                Err(()) => {
                    task.state = TaskState::Cancelled;
                    task.completed_at = Some(now_unix());
                    let _ = this.events.send(CoreEvent::TaskCancelled { task_id: task.id.clone(), reason: "cancelled".to_string() });
                    this.finish(task).await;
                }
                Ok(Ok(Ok(result))) => {
                    task.state = TaskState::Completed;
                    task.result = Some(result);
                    task.completed_at = Some(now_unix());
                    let _ = this.events.send(CoreEvent::TaskCompleted { task_id: task.id.clone() });
                    this.finish(task).await;
                }
                Ok(Ok(Err(CoreError::Cancelled))) => {
                    task.state = TaskState::Cancelled;
                    task.completed_at = Some(now_unix());
                    let _ = this.events.send(CoreEvent::TaskCancelled { task_id: task.id.clone(), reason: "cancelled".to_string() });
                    this.finish(task).await;
                }
                Ok(Ok(Err(e))) => {
                    task.error = Some(e.to_string());
                    if task.can_retry() {
                        task.retry_count += 1;
                        task.state = TaskState::Pending;
                        task.started_at = None;
                        let mut inner = this.inner.lock().await;
                        inner.queue.push(task);
                    } else {
                        task.state = TaskState::Failed;
                        task.completed_at = Some(now_unix());
                        let _ = this.events.send(CoreEvent::TaskFailed { task_id: task.id.clone(), reason: e.to_string() });
                        this.finish(task).await;
                    }
                }
                Ok(Err(_elapsed)) => {
                    task.state = TaskState::Cancelled;
                    task.completed_at = Some(now_unix());
                    let _ = this.events.send(CoreEvent::TaskCancelled { task_id: task.id.clone(), reason: "timeout".to_string() });
                    this.finish(task).await;
                }
            }

            this.running.fetch_sub(1, Ordering::Relaxed);
        });
    }

    async fn finish(&self, task: Task) {
        let mut inner = self.inner.lock().await;
        inner.completed.push_back(CompletedEntry { task, completed_unix: now_unix() });
        while inner.completed.len() > self.config.completed_task_cap {
            inner.completed.pop_front();
        }
    }

    fn spawn_resource_sampler(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut sys = System::new();
            let mut ticker = tokio::time::interval(this.config.resource_sample_tick);
            loop {
                ticker.tick().await;
                if this.closed.load(Ordering::Relaxed) {
                    break;
                }
                sys.refresh_memory();
                let total = sys.total_memory().max(1) as f64;
                let used = sys.used_memory() as f64;
                let ratio = used / total;
                this.last_memory_ratio_micros.store((ratio * 1_000_000.0) as u64, Ordering::Relaxed);

                let _ = this.events.send(CoreEvent::ResourceUsage { memory_ratio: ratio, cpu_proxy: 0.0 });

                if ratio > this.config.memory_pressure_high {
                    let _ = this
                        .schedule(TaskKind::MemoryOptimize, Value::Null, TaskPriority::High)
                        .await;
                }
            }
        });
    }

    fn spawn_periodic_maintenance(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut prune_ticker = tokio::time::interval(this.config.completed_task_prune_interval);
            let mut analytics_ticker = tokio::time::interval(this.config.analytics_save_interval);
            loop {
                tokio::select! {
                    _ = prune_ticker.tick() => {
                        if this.closed.load(Ordering::Relaxed) { break; }
                        this.prune_completed().await;
                    }
                    _ = analytics_ticker.tick() => {
                        if this.closed.load(Ordering::Relaxed) { break; }
                        let _ = this.schedule(TaskKind::AnalyticsSave, Value::Null, TaskPriority::Idle).await;
                    }
                }
            }
        });
    }

    async fn prune_completed(&self) {
        let mut inner = self.inner.lock().await;
        let now = now_unix();
        let ttl = self.config.completed_task_ttl.as_secs() as i64;
        inner.completed.retain(|entry| now - entry.completed_unix < ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::channel;

    fn noop_handlers() -> HashMap<TaskKind, TaskHandler> {
        let mut handlers: HashMap<TaskKind, TaskHandler> = HashMap::new();
        handlers.insert(TaskKind::Cleanup, Arc::new(|_| Box::pin(async { Ok(Value::Null) })));
        handlers
    }

    #[tokio::test]
    async fn schedule_fails_unregistered_kind_with_events() {
        let config = Arc::new(Config::default());
        let (tx, mut rx) = channel();
        let scheduler = CacheScheduler::new(config, tx, noop_handlers());

        let task_id = scheduler.schedule(TaskKind::ScanDirectory, Value::Null, TaskPriority::Normal).await.unwrap();
        assert!(!task_id.is_empty());

        let mut saw_scheduled = false;
        let mut saw_failed = false;
        for _ in 0..10 {
            let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await else {
                continue;
            };
            match event {
                CoreEvent::TaskScheduled { task_id: id, .. } if id == task_id => saw_scheduled = true,
                CoreEvent::TaskFailed { task_id: id, .. } if id == task_id => saw_failed = true,
                _ => {}
            }
        }
        assert!(saw_scheduled && saw_failed);
    }

    #[tokio::test]
    async fn schedule_runs_registered_task_to_completion() {
        let mut config = Config::default();
        config.dispatch_tick = Duration::from_millis(5);
        let config = Arc::new(config);
        let (tx, mut rx) = channel();
        let scheduler = CacheScheduler::new(config, tx, noop_handlers());

        scheduler.schedule(TaskKind::Cleanup, Value::Null, TaskPriority::Critical).await.unwrap();

        let mut saw_completed = false;
        for _ in 0..20 {
            let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await else {
                continue;
            };
            if matches!(event, CoreEvent::TaskCompleted { .. }) {
                saw_completed = true;
                break;
            }
        }
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn cancel_task_stops_a_running_task() {
        let mut config = Config::default();
        config.dispatch_tick = Duration::from_millis(5);
        let config = Arc::new(config);
        let (tx, mut rx) = channel();

        let mut handlers: HashMap<TaskKind, TaskHandler> = HashMap::new();
        handlers.insert(
            TaskKind::Cleanup,
            Arc::new(|_| Box::pin(async { tokio::time::sleep(Duration::from_secs(30)).await; Ok(Value::Null) })),
        );
        let scheduler = CacheScheduler::new(config, tx, handlers);

        let task_id = scheduler.schedule(TaskKind::Cleanup, Value::Null, TaskPriority::Critical).await.unwrap();

        let mut saw_started = false;
        for _ in 0..20 {
            let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await else {
                continue;
            };
            if matches!(event, CoreEvent::TaskStarted { task_id: id } if id == task_id) {
                saw_started = true;
                break;
            }
        }
        assert!(saw_started);

        assert!(scheduler.cancel_task(&task_id).await);

        let mut saw_cancelled = false;
        for _ in 0..20 {
            let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await else {
                continue;
            };
            if matches!(event, CoreEvent::TaskCancelled { task_id: id, .. } if id == task_id) {
                saw_cancelled = true;
                break;
            }
        }
        assert!(saw_cancelled);
    }

    #[tokio::test]
    async fn pending_len_never_exceeds_max_queue_len() {
        let mut config = Config::default();
        config.max_queue_len = 5;
        config.dispatch_tick = Duration::from_secs(3600);
        let config = Arc::new(config);
        let (tx, _rx) = channel();
        let scheduler = CacheScheduler::new(config, tx, noop_handlers());

        for _ in 0..10 {
            scheduler.schedule(TaskKind::Cleanup, Value::Null, TaskPriority::Low).await.unwrap();
        }
        assert!(scheduler.pending_len().await <= 5);
    }
}
