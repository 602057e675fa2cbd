//! Non-fatal queue events
//!
//! Failures that cannot be returned to a caller (group initialization,
//! delayed appends, acknowledgment after retries) are published on a
//! broadcast channel. Subscribe with [`crate::Queue::subscribe`].

use strum::{AsRefStr, Display};
use tokio::sync::broadcast;
use tracing::{error, warn};

/// Capacity of the event channel; slow subscribers observe `Lagged`
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Which queue operation produced an error event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorOrigin {
    /// Consumer group creation
    GroupInit,
    /// Immediate append
    Append,
    /// Scheduled append after its delay elapsed
    DelayedAppend,
    /// Acknowledgment of a delivered entry
    Acknowledge,
}

/// Event emitted by a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// General failure, not surfaced as an error to any caller
    Error { origin: ErrorOrigin, message: String },
    /// A group read attempt failed
    ReceiveError { message: String },
}

impl QueueEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, QueueEvent::Error { .. })
    }

    /// Origin of an `Error` event
    pub fn origin(&self) -> Option<ErrorOrigin> {
        match self {
            QueueEvent::Error { origin, .. } => Some(*origin),
            QueueEvent::ReceiveError { .. } => None,
        }
    }
}

/// Publishing side of the event channel
#[derive(Clone)]
pub(crate) struct EventBus {
    stream: String,
    sender: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub(crate) fn new(stream: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            stream: stream.into(),
            sender,
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn error(&self, origin: ErrorOrigin, message: impl Into<String>) {
        let message = message.into();
        error!(stream = %self.stream, origin = %origin, error = %message, "Queue error");
        // No subscribers is fine
        let _ = self.sender.send(QueueEvent::Error { origin, message });
    }

    pub(crate) fn receive_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(stream = %self.stream, error = %message, "Error receiving message");
        let _ = self.sender.send(QueueEvent::ReceiveError { message });
    }
}
