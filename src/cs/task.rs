//! Task record and state machine (spec.md §4.3), generalizing the teacher's
//! `ScanPriority`/`ActiveScan` bookkeeping (`indexing/micro_scan.rs`) from a
//! scan-only concept to the scheduler's full task vocabulary.

use std::time::Duration;

use serde_json::Value;

pub type TaskId = String;

/// Kinds of work the scheduler can run (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    ScanDirectory,
    RefreshPath,
    SearchPreload,
    Cleanup,
    AnalyticsSave,
    MemoryOptimize,
    MetadataScan,
    /// A kind string the caller passed that isn't any of the above. Never
    /// registered with a handler, so the scheduler always fails it
    /// immediately (spec.md's event table: "unknown task kind -> taskFailed").
    Unknown,
}

impl TaskKind {
    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "SCAN_DIRECTORY" => TaskKind::ScanDirectory,
            "REFRESH_PATH" => TaskKind::RefreshPath,
            "SEARCH_PRELOAD" => TaskKind::SearchPreload,
            "CLEANUP" => TaskKind::Cleanup,
            "ANALYTICS_SAVE" => TaskKind::AnalyticsSave,
            "MEMORY_OPTIMIZE" => TaskKind::MemoryOptimize,
            "METADATA_SCAN" => TaskKind::MetadataScan,
            _ => return None,
        })
    }
}

/// Selection priority, highest first (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    Idle = 1,
    Low = 2,
    Normal = 3,
    High = 4,
    Critical = 5,
}

/// Lifecycle state (spec.md §4.3 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct TaskProgress {
    pub current: u64,
    pub total: u64,
    pub phase: String,
}

/// A unit of scheduled background work.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub params: Value,
    pub priority: TaskPriority,
    pub state: TaskState,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub error: Option<String>,
    pub result: Option<Value>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout: Duration,
    pub cancelable: bool,
    pub progress: TaskProgress,
}

impl Task {
    pub fn new(kind: TaskKind, params: Value, priority: TaskPriority, created_at: i64, default_timeout: Duration, default_max_retries: u32) -> Self {
        Self {
            id: format!("task_{created_at}_{}", &uuid::Uuid::new_v4().simple().to_string()[..9]),
            kind,
            params,
            priority,
            state: TaskState::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
            retry_count: 0,
            max_retries: default_max_retries,
            timeout: default_timeout,
            cancelable: true,
            progress: TaskProgress::default(),
        }
    }

    /// Whether a transient failure should be requeued rather than marked failed
    /// (spec.md §4.3 state machine).
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_kind_round_trips_from_spec_names() {
        assert_eq!(TaskKind::from_str("SCAN_DIRECTORY"), Some(TaskKind::ScanDirectory));
        assert_eq!(TaskKind::from_str("NOT_A_KIND"), None);
    }

    #[test]
    fn priority_ordinals_match_spec() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
        assert!(TaskPriority::Low > TaskPriority::Idle);
    }

    #[test]
    fn can_retry_respects_max_retries() {
        let mut task = Task::new(TaskKind::Cleanup, Value::Null, TaskPriority::Normal, 0, Duration::from_secs(30), 3);
        assert!(task.can_retry());
        task.retry_count = 3;
        assert!(!task.can_retry());
    }
}
