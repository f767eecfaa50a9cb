//! Error types for task trace loading and replay.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors: the operation that returns one never starts a replay.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("task snapshot not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("invalid task snapshot {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },
    #[error("task version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
    #[error("invalid replay speed: {0} (must be finite and >= 0)")]
    InvalidSpeed(f64),
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Convenience result type for trace operations.
pub type TraceResult<T> = Result<T, TraceError>;

/// A single event record could not be decoded into the typed model.
///
/// Never fatal: the record is kept in raw form.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("record {index}: {reason}")]
pub struct RecordDecodeError {
    pub index: usize,
    pub reason: String,
}

/// A listener failed while handling one event. Isolated per listener.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("listener {listener} failed: {message}")]
pub struct ListenerError {
    pub listener: String,
    pub message: String,
}

impl ListenerError {
    pub fn new(listener: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            listener: listener.into(),
            message: message.into(),
        }
    }
}
