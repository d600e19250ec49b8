// Deny unused code to catch dead code early.
#![deny(unused)]
// Warn on unused dependencies to catch platform-specific cfg mismatches.
#![warn(unused_crate_dependencies)]
// Use log::* macros instead of println!/eprintln! for proper log level control.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod aft;
pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod fs_source;
pub mod ise;
pub mod kv;
pub mod lmi;
pub mod types;

mod cs;

pub use core::Core;
pub use cs::task::{TaskId, TaskKind, TaskPriority, TaskState};
pub use error::{CoreError, Result};
pub use events::{CoreEvent, EventReceiver, EventSender};
pub use ise::{SearchDelta, SearchMode, SearchOptions, SearchOutcome};
pub use types::{Entry, Priority, Tier};
