//! Replay engine for recorded task traces.
//!
//! The engine re-emits a recorded timeline onto an [`EventBus`], sleeping
//! between events for the recorded gap divided by the speed multiplier.
//! Checkpoint events (round starts by default) are gated by a [`Confirmer`]
//! instead of a wait. Both suspension points race a [`CancellationToken`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tasktrace_events::EventBus;
use tasktrace_protocol::{EventRecord, ROUND_START, TraceError, TraceResult};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayConfig {
    /// Multiplier applied to recorded gaps. `0` disables pacing.
    pub speed: f64,
    /// Kinds that pause for confirmation instead of waiting.
    pub checkpoint_kinds: Vec<String>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayConfig {
    pub fn new() -> Self {
        Self {
            speed: 1.0,
            checkpoint_kinds: vec![ROUND_START.to_owned()],
        }
    }

    pub fn with_speed(mut self, speed: f64) -> TraceResult<Self> {
        if !speed.is_finite() || speed < 0.0 {
            return Err(TraceError::InvalidSpeed(speed));
        }
        self.speed = speed;
        Ok(self)
    }

    pub fn checkpoint_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.checkpoint_kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_checkpoint(&self, event: &EventRecord) -> bool {
        self.checkpoint_kinds.iter().any(|kind| event.is_kind(kind))
    }

    /// Wait before `next` given the last timestamped event before it.
    /// Out-of-order timestamps and records without a timestamp yield no wait.
    pub fn pacing_delay(&self, previous: &EventRecord, next: &EventRecord) -> Option<Duration> {
        if self.speed <= 0.0 {
            return None;
        }
        let (Some(previous), Some(next)) = (previous.recorded_at(), next.recorded_at()) else {
            return None;
        };
        let wait = (next - previous) / self.speed;
        if wait > 0.0 {
            Duration::try_from_secs_f64(wait).ok()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayState {
    Idle,
    Running,
    Completed,
    Cancelled,
    AbortedByUser,
}

impl ReplayState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Idle | Self::Running)
    }
}

/// Terminal outcome of a replay. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    Completed,
    Cancelled,
    AbortedByUser,
}

impl From<ReplayStatus> for ReplayState {
    fn from(status: ReplayStatus) -> Self {
        match status {
            ReplayStatus::Completed => Self::Completed,
            ReplayStatus::Cancelled => Self::Cancelled,
            ReplayStatus::AbortedByUser => Self::AbortedByUser,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayOutcome {
    pub status: ReplayStatus,
    pub events_published: usize,
    pub confirmations: usize,
    pub listener_failures: usize,
    /// Total time spent in paced waits.
    pub paced: Duration,
}

/// Round-boundary gate.
#[async_trait]
pub trait Confirmer: Send + Sync {
    /// Whether replay may continue past `checkpoint`.
    ///
    /// Implementations without an input channel must return `true` rather
    /// than block.
    async fn confirm(&self, checkpoint: &EventRecord) -> bool;
}

/// Approves every checkpoint. Used for non-interactive replays.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl Confirmer for AutoApprove {
    async fn confirm(&self, _checkpoint: &EventRecord) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct Progress {
    published: usize,
    confirmations: usize,
    listener_failures: usize,
    paced: Duration,
}

#[derive(Debug)]
pub struct ReplayEngine {
    config: ReplayConfig,
    state: watch::Sender<ReplayState>,
}

impl ReplayEngine {
    pub fn new(config: ReplayConfig) -> Self {
        let (state, _) = watch::channel(ReplayState::Idle);
        Self { config, state }
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn state(&self) -> ReplayState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ReplayState> {
        self.state.subscribe()
    }

    /// Replay `events` onto `bus`.
    ///
    /// The bus is borrowed mutably so one bus cannot serve two overlapping
    /// replays. Cancellation is checked before every publish: an event is
    /// either delivered to every listener once or not at all.
    #[instrument(skip_all, fields(events = events.len(), speed = self.config.speed))]
    pub async fn run(
        &self,
        events: &[EventRecord],
        bus: &mut EventBus,
        confirmer: &dyn Confirmer,
        cancel: &CancellationToken,
    ) -> ReplayOutcome {
        let mut progress = Progress::default();
        if events.is_empty() {
            debug!("nothing to replay");
            return self.finish(ReplayStatus::Completed, progress);
        }

        self.state.send_replace(ReplayState::Running);
        info!(listeners = bus.len(), "replay started");

        // Last event that carried a real timestamp; gaps are measured from it.
        let mut anchor: Option<&EventRecord> = None;
        for (index, event) in events.iter().enumerate() {
            if cancel.is_cancelled() {
                return self.finish(ReplayStatus::Cancelled, progress);
            }

            if self.config.is_checkpoint(event) {
                progress.confirmations += 1;
                let approved = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return self.finish(ReplayStatus::Cancelled, progress);
                    }
                    approved = confirmer.confirm(event) => approved,
                };
                if !approved {
                    info!(index, round = ?event.round(), "replay declined at checkpoint");
                    return self.finish(ReplayStatus::AbortedByUser, progress);
                }
            } else if let Some(previous) = anchor
                && let Some(delay) = self.config.pacing_delay(previous, event)
            {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return self.finish(ReplayStatus::Cancelled, progress);
                    }
                    _ = tokio::time::sleep(delay) => progress.paced += delay,
                }
            }

            if cancel.is_cancelled() {
                return self.finish(ReplayStatus::Cancelled, progress);
            }
            if let Some(error) = event.decode_error() {
                warn!(index, kind = event.kind(), error, "replaying record in raw form");
            }
            let report = bus.publish(event);
            progress.published += 1;
            progress.listener_failures += report.failed;
            if event.recorded_at().is_some() {
                anchor = Some(event);
            }
        }

        self.finish(ReplayStatus::Completed, progress)
    }

    fn finish(&self, status: ReplayStatus, progress: Progress) -> ReplayOutcome {
        self.state.send_replace(status.into());
        info!(
            ?status,
            published = progress.published,
            confirmations = progress.confirmations,
            listener_failures = progress.listener_failures,
            "replay finished"
        );
        ReplayOutcome {
            status,
            events_published: progress.published,
            confirmations: progress.confirmations,
            listener_failures: progress.listener_failures,
            paced: progress.paced,
        }
    }
}
