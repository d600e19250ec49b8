//! Crate-wide error taxonomy.
//!
//! One small `enum` per failure domain, following the teacher's
//! `ScanError`/`IndexStoreError` style: manual `Display` + `std::error::Error`
//! + `From` impls rather than a derive-heavy error crate.

use std::fmt;
use std::path::PathBuf;

/// Errors surfaced across the core's public operations.
#[derive(Debug)]
pub enum CoreError {
    /// K/V store unreachable. Fatal during initialization; logged and
    /// degraded-to-in-memory afterward (callers check `during_init`).
    KvUnavailable { during_init: bool, source: String },
    /// A filesystem entry could not be read (permission, I/O).
    FsEntryUnreadable { path: PathBuf, reason: String },
    /// An entry vanished between a watcher event and the subsequent stat.
    FsEntryMissing { path: PathBuf },
    /// The recursive watcher failed internally. Non-fatal; the index stays
    /// coherent on a best-effort basis until the next successful event.
    WatcherError(String),
    /// A background task exceeded its timeout.
    TaskTimeout { task_id: String },
    /// A background task failed in a way that may succeed on retry.
    TaskTransientFailure { task_id: String, reason: String },
    /// A background task failed after exhausting its retries.
    TaskFailed { task_id: String, reason: String },
    /// `Schedule` was called with a kind the scheduler does not recognize.
    UnknownTaskKind(String),
    /// The pending queue was full and the lowest-priority task was dropped.
    QueueOverflow { dropped_task_id: String },
    /// A search raised partway through; partial results must be discarded.
    SearchAborted { search_id: String, reason: String },
    /// The scan or search was cancelled cooperatively.
    Cancelled,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::KvUnavailable { during_init, source } => {
                write!(
                    f,
                    "K/V store unavailable ({}): {source}",
                    if *during_init { "at init" } else { "after init" }
                )
            }
            CoreError::FsEntryUnreadable { path, reason } => {
                write!(f, "unreadable entry {}: {reason}", path.display())
            }
            CoreError::FsEntryMissing { path } => {
                write!(f, "entry missing mid-write: {}", path.display())
            }
            CoreError::WatcherError(msg) => write!(f, "watcher error: {msg}"),
            CoreError::TaskTimeout { task_id } => write!(f, "task {task_id} timed out"),
            CoreError::TaskTransientFailure { task_id, reason } => {
                write!(f, "task {task_id} failed transiently: {reason}")
            }
            CoreError::TaskFailed { task_id, reason } => {
                write!(f, "task {task_id} failed: {reason}")
            }
            CoreError::UnknownTaskKind(kind) => write!(f, "unknown task kind: {kind}"),
            CoreError::QueueOverflow { dropped_task_id } => {
                write!(f, "queue full, dropped task {dropped_task_id}")
            }
            CoreError::SearchAborted { search_id, reason } => {
                write!(f, "search {search_id} aborted: {reason}")
            }
            CoreError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<redis::RedisError> for CoreError {
    fn from(err: redis::RedisError) -> Self {
        CoreError::KvUnavailable {
            during_init: false,
            source: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
