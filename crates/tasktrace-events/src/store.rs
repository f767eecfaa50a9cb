use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tasktrace_protocol::{TaskState, TaskSummary, TraceError, TraceResult};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// Snapshot file name inside a task directory.
pub const SNAPSHOT_FILE: &str = "task.json";

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn load(&self, path: &Path) -> TraceResult<TaskState>;
    async fn save(&self, path: &Path, state: &TaskState) -> TraceResult<()>;
    async fn list(&self, dir: &Path) -> TraceResult<Vec<StoredTask>>;
}

/// A snapshot found by [`TaskStore::list`].
#[derive(Debug, Clone)]
pub struct StoredTask {
    pub path: PathBuf,
    pub summary: TaskSummary,
}

/// Stores each task as a pretty-printed JSON document.
#[derive(Debug, Clone)]
pub struct FileTaskStore {
    snapshot_file: String,
}

impl Default for FileTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTaskStore {
    pub fn new() -> Self {
        Self {
            snapshot_file: SNAPSHOT_FILE.to_owned(),
        }
    }

    /// Override the per-directory file name used by [`TaskStore::list`].
    pub fn with_snapshot_file(mut self, name: impl Into<String>) -> Self {
        self.snapshot_file = name.into();
        self
    }

    async fn validate(path: &Path) -> TraceResult<()> {
        let metadata = match fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TraceError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(source) => {
                return Err(TraceError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        if !metadata.is_file() {
            return Err(format_error(path, "not a regular file"));
        }
        if path.extension().and_then(OsStr::to_str) != Some("json") {
            return Err(format_error(path, "task snapshot must be a .json file"));
        }
        Ok(())
    }

    async fn ensure_parent(path: &Path) -> TraceResult<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| TraceError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        Ok(())
    }
}

fn format_error(path: &Path, reason: &str) -> TraceError {
    TraceError::Format {
        path: path.to_path_buf(),
        reason: reason.to_owned(),
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn load(&self, path: &Path) -> TraceResult<TaskState> {
        Self::validate(path).await?;
        let bytes = fs::read(path).await.map_err(|source| TraceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let state = TaskState::from_slice(&bytes, path)?;
        info!(task_id = %state.task_id(), "task state loaded");
        Ok(state)
    }

    #[instrument(skip(self, state), fields(path = %path.display(), task_id = %state.task_id()))]
    async fn save(&self, path: &Path, state: &TaskState) -> TraceResult<()> {
        Self::ensure_parent(path).await?;

        let mut snapshot = state.clone();
        snapshot.mark_done();
        let json = snapshot.to_pretty_json()?;
        fs::write(path, json)
            .await
            .map_err(|source| TraceError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        info!("task state saved");
        Ok(())
    }

    /// Snapshots in the immediate subdirectories of `dir`, newest first.
    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn list(&self, dir: &Path) -> TraceResult<Vec<StoredTask>> {
        let io_error = |source: std::io::Error| TraceError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TraceError::NotFound {
                    path: dir.to_path_buf(),
                });
            }
            Err(e) => return Err(io_error(e)),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let candidate = entry.path().join(&self.snapshot_file);
            if !fs::try_exists(&candidate).await.unwrap_or(false) {
                continue;
            }
            match self.load(&candidate).await {
                Ok(state) => out.push(StoredTask {
                    path: candidate,
                    summary: state.summary(),
                }),
                Err(error) => {
                    warn!(path = %candidate.display(), %error, "skipping unreadable task snapshot");
                }
            }
        }

        out.sort_by(|a, b| {
            let a = a.summary.start_time.unwrap_or(f64::MIN);
            let b = b.summary.start_time.unwrap_or(f64::MIN);
            b.total_cmp(&a)
        });
        debug!(count = out.len(), "task snapshots listed");
        Ok(out)
    }
}
