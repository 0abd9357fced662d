//! Notifier that records what each participant would have been sent.

use pc_service::notify::{Notification, Notifier, NotifyError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Records notifications per participant, in delivery order.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, Notification)>>,
    disconnected: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every delivery as if no participant were connected.
    pub fn set_disconnected(&self, disconnected: bool) {
        self.disconnected.store(disconnected, Ordering::SeqCst);
    }

    /// Everything sent to `participant_id`, oldest first.
    pub fn notifications_for(&self, participant_id: &str) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(pid, _)| pid == participant_id)
            .map(|(_, notification)| notification.clone())
            .collect()
    }

    /// Method names sent to `participant_id`, oldest first.
    pub fn methods_for(&self, participant_id: &str) -> Vec<&'static str> {
        self.notifications_for(participant_id)
            .iter()
            .map(Notification::method)
            .collect()
    }

    pub fn count(&self, participant_id: &str, method: &str) -> usize {
        self.methods_for(participant_id)
            .into_iter()
            .filter(|m| *m == method)
            .count()
    }

    pub fn total(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Wait until `participant_id` has received `method` at least `times` times.
    ///
    /// Panics after `timeout`.
    pub async fn wait_for(&self, participant_id: &str, method: &str, times: usize, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count(participant_id, method) >= times {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "timed out waiting for {times}x {method} to {participant_id}; got {:?}",
                    self.methods_for(participant_id)
                );
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, participant_id: &str, notification: Notification) -> Result<(), NotifyError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(NotifyError::NotConnected(participant_id.to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((participant_id.to_string(), notification));
        Ok(())
    }
}
