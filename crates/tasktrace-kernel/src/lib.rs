use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tasktrace_events::{EventBus, EventListener, FileTaskStore, StoredTask, TaskStore};
use tasktrace_protocol::{TaskId, TaskState, TaskSummary, Timeline, TimelineIssue};
use tasktrace_runtime::{Confirmer, ReplayConfig, ReplayEngine, ReplayOutcome};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct TaskKernelBuilder {
    store: Arc<dyn TaskStore>,
    replay: ReplayConfig,
}

impl Default for TaskKernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskKernelBuilder {
    pub fn new() -> Self {
        Self {
            store: Arc::new(FileTaskStore::new()),
            replay: ReplayConfig::new(),
        }
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = store;
        self
    }

    /// Base replay settings. The speed given to [`TaskKernel::replay`]
    /// overrides `speed`.
    pub fn replay_config(mut self, config: ReplayConfig) -> Self {
        self.replay = config;
        self
    }

    pub fn build(self) -> TaskKernel {
        TaskKernel {
            store: self.store,
            replay: self.replay,
        }
    }
}

#[derive(Clone)]
pub struct TaskKernel {
    store: Arc<dyn TaskStore>,
    replay: ReplayConfig,
}

/// What a replay did, plus the task identity for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayReport {
    pub task_id: TaskId,
    pub instruction: String,
    pub total_events: usize,
    pub raw_records: usize,
    pub outcome: ReplayOutcome,
}

impl TaskKernel {
    /// Replay the snapshot at `path` onto a fresh bus holding `listeners`.
    ///
    /// The snapshot is never written back. Cancellation and a declined
    /// checkpoint are outcomes, not errors.
    #[instrument(skip(self, listeners, confirmer, cancel), fields(path = %path.display()))]
    pub async fn replay(
        &self,
        path: &Path,
        speed: f64,
        listeners: Vec<Arc<dyn EventListener>>,
        confirmer: &dyn Confirmer,
        cancel: &CancellationToken,
    ) -> Result<ReplayReport> {
        let config = self.replay.clone().with_speed(speed)?;
        let state = self
            .store
            .load(path)
            .await
            .with_context(|| format!("failed to load task for replay from {}", path.display()))?;
        if let Err(error) = state.ensure_version() {
            warn!(task_id = %state.task_id(), %error, "replaying snapshot written by another version");
        }

        let timeline = state.timeline();
        log_issues(&timeline);
        info!(
            task_id = %state.task_id(),
            events = timeline.len(),
            speed = config.speed,
            "replaying task"
        );

        let mut bus = EventBus::new();
        for listener in listeners {
            bus.subscribe(listener);
        }
        let engine = ReplayEngine::new(config);
        let outcome = engine
            .run(&timeline.events, &mut bus, confirmer, cancel)
            .await;

        Ok(ReplayReport {
            task_id: state.task_id().clone(),
            instruction: state.instruction().to_owned(),
            total_events: timeline.len(),
            raw_records: timeline
                .events
                .iter()
                .filter(|event| !event.is_decoded())
                .count(),
            outcome,
        })
    }

    /// Load a snapshot for re-registration with a task manager.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn resume(&self, path: &Path) -> Result<TaskState> {
        let state = self
            .store
            .load(path)
            .await
            .with_context(|| format!("failed to load task to resume from {}", path.display()))?;
        state.ensure_version()?;
        info!(task_id = %state.task_id(), "task ready to resume");
        Ok(state)
    }

    pub async fn summary(&self, path: &Path) -> Result<TaskSummary> {
        let state = self
            .store
            .load(path)
            .await
            .with_context(|| format!("failed to read task summary from {}", path.display()))?;
        Ok(state.summary())
    }

    pub async fn list(&self, dir: &Path) -> Result<Vec<StoredTask>> {
        self.store
            .list(dir)
            .await
            .with_context(|| format!("failed to list tasks in {}", dir.display()))
    }

    pub async fn save(&self, path: &Path, state: &TaskState) -> Result<()> {
        self.store
            .save(path, state)
            .await
            .with_context(|| format!("failed to save task to {}", path.display()))
    }
}

fn log_issues(timeline: &Timeline) {
    for issue in &timeline.issues {
        match issue {
            TimelineIssue::MalformedContainer { found } => {
                warn!(found, "events entry is not a list, replaying no events");
            }
            TimelineIssue::Record(error) => {
                warn!(index = error.index, reason = %error.reason, "event record kept in raw form");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use tasktrace_events::{EventListener, SNAPSHOT_FILE};
    use tasktrace_protocol::{
        EVENTS_COMPONENT, EventKind, EventRecord, ListenerError, TaskState, TraceError,
    };
    use tasktrace_runtime::{AutoApprove, Confirmer, ReplayStatus};
    use tokio::fs;
    use tokio_util::sync::CancellationToken;

    use crate::TaskKernelBuilder;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    #[derive(Default)]
    struct Collect {
        kinds: Mutex<Vec<String>>,
    }

    impl EventListener for Collect {
        fn on_event(&self, event: &EventRecord) -> Result<(), ListenerError> {
            self.kinds.lock().push(event.kind().to_owned());
            Ok(())
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl Confirmer for Counting {
        async fn confirm(&self, _checkpoint: &EventRecord) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn two_rounds() -> Value {
        json!([
            EventRecord::at(EventKind::TaskStart { instruction: "list files".into(), title: None }, 0.0),
            EventRecord::at(EventKind::RoundStart { round: 1, instruction: "list files".into() }, 0.5),
            EventRecord::at(EventKind::ToolCall { name: "ls".into(), arguments: json!({}) }, 1.0),
            {"name": "tool_result", "timestamp": 1.5, "data": "not an object"},
            EventRecord::at(EventKind::RoundEnd { round: 1, response: Some("done".into()) }, 2.0),
            EventRecord::at(EventKind::RoundStart { round: 2, instruction: "again".into() }, 3.0),
            EventRecord::at(EventKind::TaskEnd { path: None }, 4.0),
        ])
    }

    async fn write_snapshot(root: &std::path::Path, events: Value) -> Result<PathBuf> {
        let path = root.join("task-1").join(SNAPSHOT_FILE);
        let mut state = TaskState::new("list files in the workspace");
        state.set_component_state(EVENTS_COMPONENT, events);
        TaskKernelBuilder::new().build().save(&path, &state).await?;
        Ok(path)
    }

    #[tokio::test(start_paused = true)]
    async fn replay_delivers_every_event_and_leaves_snapshot_untouched() -> Result<()> {
        let root = unique_test_root("tasktrace-kernel-replay");
        let path = write_snapshot(&root, two_rounds()).await?;
        let before = fs::read(&path).await?;

        let kernel = TaskKernelBuilder::new().build();
        let collect = Arc::new(Collect::default());
        let confirmer = Counting::default();
        let report = kernel
            .replay(
                &path,
                8.0,
                vec![collect.clone() as Arc<dyn EventListener>],
                &confirmer,
                &CancellationToken::new(),
            )
            .await?;

        assert_eq!(report.outcome.status, ReplayStatus::Completed);
        assert_eq!(report.total_events, 7);
        assert_eq!(report.raw_records, 1);
        assert_eq!(report.outcome.events_published, 7);
        assert_eq!(report.instruction, "list files in the workspace");
        assert_eq!(confirmer.0.load(Ordering::SeqCst), 2);
        assert_eq!(collect.kinds.lock()[3], "tool_result");
        assert_eq!(fs::read(&path).await?, before);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn invalid_speed_fails_before_any_delivery() -> Result<()> {
        let root = unique_test_root("tasktrace-kernel-speed");
        let path = write_snapshot(&root, two_rounds()).await?;
        let collect = Arc::new(Collect::default());

        let err = TaskKernelBuilder::new()
            .build()
            .replay(
                &path,
                -1.0,
                vec![collect.clone() as Arc<dyn EventListener>],
                &AutoApprove,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TraceError>(),
            Some(TraceError::InvalidSpeed(_))
        ));
        assert!(collect.kinds.lock().is_empty());

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn missing_snapshot_is_not_found() {
        let err = TaskKernelBuilder::new()
            .build()
            .replay(
                &unique_test_root("tasktrace-kernel-missing").join(SNAPSHOT_FILE),
                1.0,
                Vec::new(),
                &AutoApprove,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TraceError>(),
            Some(TraceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_container_replays_zero_events() -> Result<()> {
        let root = unique_test_root("tasktrace-kernel-container");
        let path = write_snapshot(&root, json!("not a list")).await?;
        let collect = Arc::new(Collect::default());

        let report = TaskKernelBuilder::new()
            .build()
            .replay(
                &path,
                1.0,
                vec![collect.clone() as Arc<dyn EventListener>],
                &AutoApprove,
                &CancellationToken::new(),
            )
            .await?;
        assert_eq!(report.outcome.status, ReplayStatus::Completed);
        assert_eq!(report.total_events, 0);
        assert!(collect.kinds.lock().is_empty());

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn resume_enforces_version_but_replay_does_not() -> Result<()> {
        let root = unique_test_root("tasktrace-kernel-version");
        let path = root.join("old").join(SNAPSHOT_FILE);
        let kernel = TaskKernelBuilder::new().build();
        let mut state = TaskState::new("legacy task");
        state.version = 1;
        kernel.save(&path, &state).await?;

        let err = kernel.resume(&path).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TraceError>(),
            Some(TraceError::VersionMismatch { actual: 1, .. })
        ));

        let report = kernel
            .replay(&path, 0.0, Vec::new(), &AutoApprove, &CancellationToken::new())
            .await?;
        assert_eq!(report.outcome.status, ReplayStatus::Completed);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn resume_summary_and_list_share_the_store() -> Result<()> {
        let root = unique_test_root("tasktrace-kernel-list");
        let path = write_snapshot(&root, two_rounds()).await?;
        let kernel = TaskKernelBuilder::new().build();

        let resumed = kernel.resume(&path).await?;
        assert_eq!(resumed.timeline().len(), 7);

        let summary = kernel.summary(&path).await?;
        assert_eq!(&summary.task_id, resumed.task_id());

        let listed = kernel.list(&root).await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, path);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }
}
