//! Task identifiers.
//!
//! Opaque string wrapper (serde-transparent). New ids are UUID v4 rendered
//! without hyphens; snapshots written by other tools keep whatever id they
//! were created with.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a recorded task. Immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create from any string value.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Create a new random id (UUID v4, simple form).
    pub fn new_uuid() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// View as string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new_uuid()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
