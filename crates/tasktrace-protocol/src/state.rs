//! Persisted task snapshots.
//!
//! A [`TaskState`] is the complete, self-contained record of one task: its
//! identity, the instruction that started it, and a map of component states.
//! Only the `events` component is interpreted here; every other entry is an
//! opaque blob owned by the component that wrote it.

use std::path::Path;

use chrono::{DateTime, Local};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RecordDecodeError, TraceError, TraceResult};
use crate::event::{EventRecord, json_type};
use crate::ids::TaskId;

/// Snapshot format version written by this crate.
pub const TASK_VERSION: u32 = 20250806;

/// Component-state key holding the event trace.
pub const EVENTS_COMPONENT: &str = "events";

fn default_version() -> u32 {
    TASK_VERSION
}

/// Durable snapshot of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    #[serde(default = "default_version")]
    pub version: u32,
    task_id: TaskId,
    instruction: String,
    /// Epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    /// Epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_time: Option<f64>,
    #[serde(default)]
    component_states: IndexMap<String, Value>,
}

impl TaskState {
    /// Start a fresh task with a random id.
    pub fn new(instruction: impl Into<String>) -> Self {
        Self::with_id(TaskId::new_uuid(), instruction)
    }

    pub fn with_id(task_id: TaskId, instruction: impl Into<String>) -> Self {
        Self {
            version: TASK_VERSION,
            task_id,
            instruction: instruction.into(),
            start_time: Some(EventRecord::now_seconds()),
            done_time: None,
            component_states: IndexMap::new(),
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Named component blob, or `None` when the snapshot has no such entry.
    pub fn get_component_state(&self, name: &str) -> Option<&Value> {
        self.component_states.get(name)
    }

    pub fn set_component_state(&mut self, name: impl Into<String>, state: Value) {
        self.component_states.insert(name.into(), state);
    }

    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.component_states.keys().map(String::as_str)
    }

    /// Stamp `done_time` unless it is already set.
    pub fn mark_done(&mut self) {
        if self.done_time.is_none() {
            self.done_time = Some(EventRecord::now_seconds());
        }
    }

    /// Parse a snapshot read from `path`. `path` is only used for error reporting.
    pub fn from_slice(bytes: &[u8], path: &Path) -> TraceResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| TraceError::Format {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn to_pretty_json(&self) -> TraceResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| TraceError::Serialization(e.to_string()))
    }

    /// Resuming a task requires the exact snapshot version.
    pub fn ensure_version(&self) -> TraceResult<()> {
        if self.version != TASK_VERSION {
            return Err(TraceError::VersionMismatch {
                expected: TASK_VERSION,
                actual: self.version,
            });
        }
        Ok(())
    }

    /// Decode the `events` component into an ordered timeline.
    ///
    /// A missing entry is an empty timeline. The entry may be a bare list of
    /// records or a recorder blob `{start_time, end_time, events: [...]}`;
    /// anything else degrades to an empty timeline with an issue attached.
    pub fn timeline(&self) -> Timeline {
        match self.get_component_state(EVENTS_COMPONENT) {
            None | Some(Value::Null) => Timeline::default(),
            Some(Value::Array(items)) => Timeline::decode(items),
            Some(Value::Object(blob)) => match blob.get(EVENTS_COMPONENT) {
                Some(Value::Array(items)) => Timeline::decode(items),
                None | Some(Value::Null) => Timeline::default(),
                Some(other) => Timeline::malformed(other),
            },
            Some(other) => Timeline::malformed(other),
        }
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            version: self.version,
            task_id: self.task_id.clone(),
            instruction: truncate_chars(&self.instruction, 50, "..."),
            start_time: self.start_time,
            done_time: self.done_time,
        }
    }
}

/// Decoded event list of a snapshot, with the non-fatal problems found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    pub events: Vec<EventRecord>,
    pub issues: Vec<TimelineIssue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimelineIssue {
    /// The `events` entry was present but not a list.
    MalformedContainer { found: &'static str },
    /// One record was kept in raw form.
    Record(RecordDecodeError),
}

impl Timeline {
    fn decode(items: &[Value]) -> Self {
        let mut timeline = Self::default();
        for (index, item) in items.iter().enumerate() {
            let record = EventRecord::from_value(item.clone());
            if let Some(reason) = record.decode_error() {
                timeline.issues.push(TimelineIssue::Record(RecordDecodeError {
                    index,
                    reason: reason.to_owned(),
                }));
            }
            timeline.events.push(record);
        }
        timeline
    }

    fn malformed(found: &Value) -> Self {
        Self {
            events: Vec::new(),
            issues: vec![TimelineIssue::MalformedContainer {
                found: json_type(found),
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Short description of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSummary {
    pub version: u32,
    pub task_id: TaskId,
    pub instruction: String,
    pub start_time: Option<f64>,
    pub done_time: Option<f64>,
}

/// One row of a task listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub start_time: String,
    pub done_time: String,
    pub instruction: String,
}

impl TaskSummary {
    pub fn record(&self) -> TaskRecord {
        TaskRecord {
            task_id: self.task_id.clone(),
            start_time: clock_time(self.start_time),
            done_time: clock_time(self.done_time),
            instruction: if self.instruction.is_empty() {
                "-".to_owned()
            } else {
                truncate_chars(&self.instruction, 32, "")
            },
        }
    }
}

fn clock_time(epoch_seconds: Option<f64>) -> String {
    epoch_seconds
        .and_then(|secs| DateTime::from_timestamp(secs.floor() as i64, 0))
        .map(|utc| utc.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_owned())
}

fn truncate_chars(text: &str, max: usize, ellipsis: &str) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}{ellipsis}", &text[..cut]),
        None => text.to_owned(),
    }
}
