//! Host-facing event stream (spec.md §6 "Emitted events"). Realized as a
//! broadcast channel rather than a callback closure (SPEC_FULL.md §9,
//! DESIGN NOTES on progressive delivery), since the host application may
//! have zero or many listeners and must not block the core by being slow.

use tokio::sync::broadcast;

use crate::cs::task::{TaskId, TaskKind};
use crate::ise::SearchDelta;
use crate::types::Tier;

/// `indexChanged`'s `operation` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOperation {
    Add,
    Change,
    Remove,
    RemoveDir,
}

/// Every event the core can emit, 1:1 with spec.md §6's event list.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    TaskScheduled { task_id: TaskId, kind: TaskKind },
    TaskStarted { task_id: TaskId },
    TaskProgress { task_id: TaskId, current: u64, total: u64 },
    TaskCompleted { task_id: TaskId },
    TaskFailed { task_id: TaskId, reason: String },
    TaskCancelled { task_id: TaskId, reason: String },
    TaskDropped { task_id: TaskId, reason: String },
    ResourceUsage { memory_ratio: f64, cpu_proxy: f64 },
    SchedulerPaused,
    SchedulerResumed,
    SchedulerClosed,
    SearchProgress { search_id: String, delta: SearchDelta },
    IndexChanged { operation: IndexOperation, path: String, tiers: Vec<Tier> },
}

pub type EventSender = broadcast::Sender<CoreEvent>;
pub type EventReceiver = broadcast::Receiver<CoreEvent>;

/// Construct a broadcast channel sized generously enough that a slow
/// subscriber lags rather than stalls publishers (publishers never await a
/// subscriber; `send` on a full channel only drops for the lagging reader).
pub fn channel() -> (EventSender, EventReceiver) {
    broadcast::channel(1024)
}
