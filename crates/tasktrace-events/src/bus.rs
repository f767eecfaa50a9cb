//! Session-scoped, synchronous event fan-out.
//!
//! An [`EventBus`] is built per replay (or per live run) and owned by it.
//! There is no process-wide bus.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use indexmap::IndexSet;
use tasktrace_protocol::{EventRecord, ListenerError};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// Subscriber to published events.
///
/// Implementations must ignore kinds they do not understand rather than
/// returning an error for them.
pub trait EventListener: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Read once, when the listener is subscribed.
    fn interest(&self) -> Interest {
        Interest::All
    }

    fn on_event(&self, event: &EventRecord) -> Result<(), ListenerError>;
}

/// Which event kinds a listener receives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Interest {
    #[default]
    All,
    Kinds(IndexSet<String>),
}

impl Interest {
    pub fn kinds<I, S>(kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Kinds(kinds.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, kind: &str) -> bool {
        match self {
            Self::All => true,
            Self::Kinds(kinds) => kinds.contains(kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Subscription {
    id: ListenerId,
    interest: Interest,
    listener: Arc<dyn EventListener>,
}

/// Outcome of one [`EventBus::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct EventBus {
    subscriptions: Vec<Subscription>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`. Dispatch follows registration order.
    ///
    /// Subscribing the same instance again is a no-op returning its
    /// existing id.
    pub fn subscribe(&mut self, listener: Arc<dyn EventListener>) -> ListenerId {
        if let Some(existing) = self
            .subscriptions
            .iter()
            .find(|sub| same_instance(&sub.listener, &listener))
        {
            debug!(listener = listener.name(), "listener already subscribed");
            return existing.id;
        }

        let id = ListenerId(self.next_id);
        self.next_id += 1;
        let interest = listener.interest();
        debug!(listener = listener.name(), ?interest, "listener subscribed");
        self.subscriptions.push(Subscription {
            id,
            interest,
            listener,
        });
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|sub| sub.id != id);
        before != self.subscriptions.len()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Deliver `event` to every interested listener, in registration order.
    ///
    /// A listener that errors or panics is logged and skipped; the rest still
    /// receive the event.
    pub fn publish(&self, event: &EventRecord) -> DeliveryReport {
        let kind = event.kind();
        let mut report = DeliveryReport::default();

        for sub in &self.subscriptions {
            if !sub.interest.matches(kind) {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| sub.listener.on_event(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(error)) => {
                    report.failed += 1;
                    warn!(listener = %error.listener, kind, %error, "listener failed, continuing delivery");
                }
                Err(payload) => {
                    report.failed += 1;
                    warn!(
                        listener = sub.listener.name(),
                        kind,
                        panic = panic_message(payload.as_ref()),
                        "listener panicked, continuing delivery"
                    );
                }
            }
        }
        report
    }
}

fn same_instance(a: &Arc<dyn EventListener>, b: &Arc<dyn EventListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Listener that forwards every event into a broadcast channel, for hosts
/// that consume the replay asynchronously.
#[derive(Clone, Debug)]
pub struct EventStreamHub {
    sender: broadcast::Sender<EventRecord>,
}

impl EventStreamHub {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    pub fn subscribe_stream(&self) -> BroadcastStream<EventRecord> {
        BroadcastStream::new(self.sender.subscribe())
    }
}

impl EventListener for EventStreamHub {
    fn name(&self) -> &str {
        "stream-hub"
    }

    fn on_event(&self, event: &EventRecord) -> Result<(), ListenerError> {
        // No receivers is not a failure.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}
