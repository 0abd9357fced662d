//! Outbound queues of connected participants.
//!
//! Every participant connection owns one bounded queue of encoded frames,
//! drained by that connection's writer task. Responses and notifications for a
//! participant share the queue, so frames reach the socket whole and in order.

use crate::notify::{Notification, Notifier, NotifyError};

use common::jsonrpc::Request;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Default per-participant outbound queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Participant id -> outbound queue.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<String, mpsc::Sender<String>>,
    queue_capacity: usize,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a participant and return the receiving end of its queue.
    ///
    /// Re-registering an id replaces (and closes) the previous queue.
    pub fn register(&self, participant_id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        if self
            .connections
            .insert(participant_id.to_string(), tx)
            .is_some()
        {
            debug!(
                target: "pc.transport",
                participant_id = %participant_id,
                "Replaced existing outbound queue"
            );
        }
        rx
    }

    /// Remove a participant; its writer drains what is queued and exits.
    pub fn unregister(&self, participant_id: &str) {
        self.connections.remove(participant_id);
    }

    /// Sender half of a participant's queue, for awaited (backpressured) sends.
    #[must_use]
    pub fn sender(&self, participant_id: &str) -> Option<mpsc::Sender<String>> {
        self.connections
            .get(participant_id)
            .map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn contains(&self, participant_id: &str) -> bool {
        self.connections.contains_key(participant_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Queue an encoded frame without waiting.
    ///
    /// # Errors
    ///
    /// - `NotifyError::NotConnected` - no queue for the participant
    /// - `NotifyError::QueueFull` - the writer is not keeping up
    /// - `NotifyError::Closed` - the writer has exited
    pub fn try_send(&self, participant_id: &str, frame: String) -> Result<(), NotifyError> {
        let sender = self
            .sender(participant_id)
            .ok_or_else(|| NotifyError::NotConnected(participant_id.to_string()))?;

        sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::QueueFull(participant_id.to_string()),
            mpsc::error::TrySendError::Closed(_) => NotifyError::Closed(participant_id.to_string()),
        })
    }
}

impl Notifier for ConnectionRegistry {
    fn notify(&self, participant_id: &str, notification: Notification) -> Result<(), NotifyError> {
        let frame = serde_json::to_string(&Request::notification(
            notification.method(),
            notification.params(),
        ))
        .map_err(|e| NotifyError::Encode(e.to_string()))?;

        self.try_send(participant_id, frame)
    }
}
