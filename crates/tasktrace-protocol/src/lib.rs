//! # tasktrace-protocol: task trace contract
//!
//! Shared types for recorded task traces: the event record model, the
//! persisted task snapshot, and the error taxonomy used by the store and
//! the replay engine.
//!
//! It is intentionally dependency-light (no tokio, no tracing) so it can be
//! used by anything that reads or writes task snapshots.
//!
//! ## Module Overview
//!
//! - [`ids`]: `TaskId`
//! - [`event`]: `EventRecord`, `EventPayload`, `EventKind` (forward-compatible)
//! - [`state`]: `TaskState`, `Timeline`, `TaskSummary`
//! - [`error`]: `TraceError`, `RecordDecodeError`, `ListenerError`

pub mod error;
pub mod event;
pub mod ids;
pub mod state;

pub use error::{ListenerError, RecordDecodeError, TraceError, TraceResult};
pub use event::{EventKind, EventPayload, EventRecord, ROUND_END, ROUND_START};
pub use ids::TaskId;
pub use state::{
    EVENTS_COMPONENT, TASK_VERSION, TaskRecord, TaskState, TaskSummary, Timeline, TimelineIssue,
};
