//! Storage and in-process fan-out for task traces.
//!
//! - [`store`]: `TaskStore` port and the JSON file implementation
//! - [`bus`]: `EventBus`, `EventListener`, `EventStreamHub`
//! - [`recorder`]: `EventRecorder` for capturing a live run

pub mod bus;
pub mod recorder;
pub mod store;

pub use bus::{DeliveryReport, EventBus, EventListener, EventStreamHub, Interest, ListenerId};
pub use recorder::{EventRecorder, RecorderSummary};
pub use store::{FileTaskStore, SNAPSHOT_FILE, StoredTask, TaskStore};
