use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tasktrace_protocol::{EventRecord, ListenerError};
use tracing::{debug, info};

use crate::bus::EventListener;

#[derive(Debug, Default)]
struct Records {
    start_time: Option<f64>,
    end_time: Option<f64>,
    events: Vec<EventRecord>,
}

/// Captures the events of a live run so they can be persisted as the
/// `events` component of a task snapshot.
#[derive(Debug)]
pub struct EventRecorder {
    enabled: AtomicBool,
    records: Mutex<Records>,
}

/// Per-kind statistics of the recorded events.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecorderSummary {
    pub total_events: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    pub event_types: IndexMap<String, usize>,
}

#[derive(Serialize)]
struct RecordsBlob<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    start_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_time: Option<f64>,
    events: &'a [EventRecord],
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new(true)
    }
}

impl EventRecorder {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            records: Mutex::new(Records::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Clears previous events and stamps the start time.
    pub fn start_recording(&self) {
        let mut records = self.records.lock();
        records.start_time = Some(EventRecord::now_seconds());
        records.end_time = None;
        records.events.clear();
        info!("event recording started");
    }

    pub fn stop_recording(&self) {
        let mut records = self.records.lock();
        if records.start_time.is_some() {
            records.end_time = Some(EventRecord::now_seconds());
            info!(total_events = records.events.len(), "event recording stopped");
        }
    }

    pub fn record_event(&self, event: EventRecord) {
        if !self.is_enabled() {
            return;
        }
        let mut records = self.records.lock();
        records.events.push(event);
        let count = records.events.len();
        if count % 100 == 0
            && let Some(latest) = records.events.last()
        {
            debug!(count, kind = latest.kind(), timestamp = latest.timestamp, "events recorded");
        }
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.records.lock().events.clone()
    }

    pub fn clear(&self) {
        self.records.lock().events.clear();
        info!("recorded events cleared");
    }

    /// Current position, usable with [`Self::restore_to_checkpoint`].
    pub fn checkpoint(&self) -> usize {
        self.len()
    }

    /// Drop everything recorded after `checkpoint`; `None` drops everything.
    pub fn restore_to_checkpoint(&self, checkpoint: Option<usize>) {
        let Some(checkpoint) = checkpoint else {
            self.clear();
            return;
        };
        let mut records = self.records.lock();
        if checkpoint < records.events.len() {
            let deleted = records.events.len() - checkpoint;
            records.events.truncate(checkpoint);
            info!(checkpoint, deleted, "recorder restored to checkpoint");
        }
    }

    pub fn summary(&self) -> RecorderSummary {
        let records = self.records.lock();
        let mut event_types = IndexMap::new();
        for event in &records.events {
            *event_types.entry(event.kind().to_owned()).or_insert(0) += 1;
        }
        RecorderSummary {
            total_events: records.events.len(),
            start_time: records.start_time,
            end_time: records.end_time,
            event_types,
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `{start_time, end_time, events}` blob for the snapshot's `events` component.
    pub fn to_component_state(&self) -> Value {
        let records = self.records.lock();
        serde_json::to_value(RecordsBlob {
            start_time: records.start_time,
            end_time: records.end_time,
            events: &records.events,
        })
        .unwrap_or(Value::Null)
    }
}

impl EventListener for EventRecorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn on_event(&self, event: &EventRecord) -> Result<(), ListenerError> {
        self.record_event(event.clone());
        Ok(())
    }
}
