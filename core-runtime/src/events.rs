//! # Event Bus System
//!
//! Outbound notifications from the synchronization engine to the host, carried
//! over a `tokio::sync::broadcast` channel.
//!
//! ## Overview
//!
//! The engine never calls into the host's display layer. Instead it publishes:
//! - **Device events**: a device was identified, a session opened or failed to
//!   open, a device went away (the host drops its session handle)
//! - **Transfer events**: job lifecycle, per-item failures and the final
//!   `{job_id, outcome}` completion
//! - **Library events**: structural changes to the host-side graph (tracks or
//!   groups added/removed) so views can refresh
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐    emit     ┌───────────┐
//! │ DeviceSession  ├────────────>│           │
//! └────────────────┘             │           │    subscribe   ┌────────────┐
//! ┌────────────────┐    emit     │ EventBus  ├───────────────>│    Host    │
//! │TransferPipeline├────────────>│ (broadcast│                └────────────┘
//! └────────────────┘             │  channel) │
//! ┌────────────────┐    emit     │           │
//! │ LibraryBridge  ├────────────>│           │
//! └────────────────┘             └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, DeviceEvent, EventBus, EventStream};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut removals = EventStream::new(bus.subscribe())
//!     .filter(|e| matches!(e, CoreEvent::Device(DeviceEvent::Removed { .. })));
//!
//! bus.emit(CoreEvent::Device(DeviceEvent::Removed {
//!     session_id: "s-1".to_string(),
//!     device_id: "usb:001,004".to_string(),
//! }))
//! .ok();
//!
//! let event = removals.recv().await.unwrap();
//! assert_eq!(event.description(), "Device removed");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; it can keep
//!   receiving.
//! - **`RecvError::Closed`**: all senders dropped; treat as shutdown.
//!
//! Emitting with no subscribers returns an error; the engine ignores it with
//! `.ok()` since nobody listening is not a failure.

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the event bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Device attach/open/remove events
    Device(DeviceEvent),
    /// Transfer job events
    Transfer(TransferEvent),
    /// Host library graph events
    Library(LibraryEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Device(e) => e.description(),
            CoreEvent::Transfer(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Device(DeviceEvent::OpenFailed { .. }) => EventSeverity::Error,
            CoreEvent::Transfer(TransferEvent::JobCompleted {
                outcome: JobOutcome::Failed { .. },
                ..
            }) => EventSeverity::Error,
            CoreEvent::Transfer(TransferEvent::ItemFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Device(DeviceEvent::Removed { .. }) => EventSeverity::Warning,
            CoreEvent::Device(DeviceEvent::Opened { .. }) => EventSeverity::Info,
            CoreEvent::Transfer(TransferEvent::JobCompleted { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Device Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DeviceEvent {
    /// A connection assistant claimed a newly attached device.
    Attached {
        device_id: String,
        family: String,
        display_name: String,
    },
    /// The handshake completed and a session is ready.
    Opened {
        session_id: String,
        device_id: String,
        display_name: String,
    },
    /// The handshake failed. Connection errors are terminal for the attempt.
    OpenFailed {
        device_id: String,
        message: String,
        connection_error: bool,
    },
    /// The device went away; the host must drop its session handle.
    Removed {
        session_id: String,
        device_id: String,
    },
}

impl DeviceEvent {
    fn description(&self) -> &str {
        match self {
            DeviceEvent::Attached { .. } => "Device attached",
            DeviceEvent::Opened { .. } => "Device session opened",
            DeviceEvent::OpenFailed { .. } => "Device session failed to open",
            DeviceEvent::Removed { .. } => "Device removed",
        }
    }
}

// ============================================================================
// Transfer Events
// ============================================================================

/// Final result of a transfer job as reported to the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status")]
pub enum JobOutcome {
    /// Every item was attempted; some may have failed individually.
    Done {
        succeeded: u64,
        failed: u64,
        rejected_fields: u64,
    },
    Failed {
        message: String,
    },
    Cancelled {
        completed: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum TransferEvent {
    Queued {
        job_id: String,
        session_id: String,
        kind: String,
        items: u64,
    },
    Started {
        job_id: String,
        kind: String,
    },
    /// One item of a batch failed; the batch continues.
    ItemFailed {
        job_id: String,
        item_index: u64,
        message: String,
    },
    JobCompleted {
        job_id: String,
        kind: String,
        outcome: JobOutcome,
    },
}

impl TransferEvent {
    fn description(&self) -> &str {
        match self {
            TransferEvent::Queued { .. } => "Transfer queued",
            TransferEvent::Started { .. } => "Transfer started",
            TransferEvent::ItemFailed { .. } => "Transfer item failed",
            TransferEvent::JobCompleted { .. } => "Transfer completed",
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    /// Structural change to the host graph of one session.
    Changed {
        session_id: String,
        tracks_added: u64,
        tracks_removed: u64,
        groups_added: u64,
        groups_removed: u64,
    },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::Changed { .. } => "Library changed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Cheap to clone; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all active subscribers.
    ///
    /// Returns the number of subscribers that received it, or an error when
    /// there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next matching event.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive. `None` when nothing matching is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
