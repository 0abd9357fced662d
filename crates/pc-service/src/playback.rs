//! Play, pause, seek and stop for an existing session.
//!
//! Every operation is a no-op when the participant has no session. A refused
//! seek is reported to the participant as a `seek` notification and the
//! command itself still succeeds.

use crate::errors::PcError;
use crate::notify::{notify_best_effort, Notification, Notifier};
use crate::session::{SessionHandle, SessionRegistry};

use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Message sent to the participant when a seek is refused.
pub const SEEK_FAILED_MESSAGE: &str = "Seek failed";

pub struct PlaybackController {
    registry: Arc<SessionRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl PlaybackController {
    pub fn new(registry: Arc<SessionRegistry>, notifier: Arc<dyn Notifier>) -> Self {
        Self { registry, notifier }
    }

    /// # Errors
    ///
    /// `PcError::Engine` if the source refuses to play.
    pub async fn play(&self, participant_id: &str) -> Result<(), PcError> {
        self.with_session(participant_id, |session| async move { session.play().await })
            .await
    }

    /// # Errors
    ///
    /// `PcError::Engine` if the source refuses to pause.
    pub async fn pause(&self, participant_id: &str) -> Result<(), PcError> {
        self.with_session(participant_id, |session| async move { session.pause().await })
            .await
    }

    /// Seek to `position_ms`. A refusal becomes a `seek` notification.
    ///
    /// # Errors
    ///
    /// Only non-engine faults; engine refusals are absorbed.
    pub async fn seek(&self, participant_id: &str, position_ms: i64) -> Result<(), PcError> {
        let result = self
            .with_session(participant_id, |session| async move {
                session.seek(position_ms).await
            })
            .await;

        match result {
            Err(PcError::SeekRejected(reason)) => {
                debug!(
                    target: "pc.playback",
                    participant_id = %participant_id,
                    position_ms = position_ms,
                    reason = %reason,
                    "Seek rejected by engine"
                );
                notify_best_effort(
                    self.notifier.as_ref(),
                    participant_id,
                    Notification::Seek {
                        message: SEEK_FAILED_MESSAGE.to_string(),
                    },
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Remove the session, releasing its engine objects and node. No-op when absent.
    pub async fn stop(&self, participant_id: &str) -> Result<(), PcError> {
        if self.registry.remove(participant_id).await.is_none() {
            debug!(
                target: "pc.playback",
                participant_id = %participant_id,
                "Stop for participant without session"
            );
        }
        Ok(())
    }

    async fn with_session<F, Fut>(&self, participant_id: &str, op: F) -> Result<(), PcError>
    where
        F: FnOnce(SessionHandle) -> Fut,
        Fut: Future<Output = Result<(), PcError>>,
    {
        let Some(session) = self.registry.get(participant_id) else {
            debug!(
                target: "pc.playback",
                participant_id = %participant_id,
                "No session, ignoring"
            );
            return Ok(());
        };

        match op(session).await {
            Err(PcError::UnknownParticipant(_)) => Ok(()),
            other => other,
        }
    }
}
