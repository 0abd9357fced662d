//! Outbound notifications to participants.
//!
//! Notifications are addressed by participant id and delivered best-effort: a
//! failed delivery is logged and counted, never retried, and never fails the
//! session that produced it.

use crate::observability::metrics;
use common::types::{IceCandidate, VideoInfo};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

/// A notification pushed to one participant.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// SDP answer for the participant's offer.
    StartResponse { sdp_answer: String },
    /// A local ICE candidate discovered by the media server.
    IceCandidate { candidate: IceCandidate },
    /// Seekability and duration of the bound source.
    VideoInfo(VideoInfo),
    /// Playback ended or failed.
    PlayEnd,
    /// Seek outcome message.
    Seek { message: String },
}

impl Notification {
    /// JSON-RPC method name.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Notification::StartResponse { .. } => "startResponse",
            Notification::IceCandidate { .. } => "iceCandidate",
            Notification::VideoInfo(_) => "videoInfo",
            Notification::PlayEnd => "playEnd",
            Notification::Seek { .. } => "seek",
        }
    }

    /// JSON-RPC params object.
    #[must_use]
    pub fn params(&self) -> Value {
        match self {
            Notification::StartResponse { sdp_answer } => json!({ "sdpAnswer": sdp_answer }),
            Notification::IceCandidate { candidate } => json!({ "candidate": candidate }),
            Notification::VideoInfo(info) => json!(info),
            Notification::PlayEnd => json!({}),
            Notification::Seek { message } => json!({ "message": message }),
        }
    }
}

/// Notification delivery errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotifyError {
    /// No connection is registered for the participant.
    #[error("Participant not connected: {0}")]
    NotConnected(String),

    /// The participant's outbound queue is full.
    #[error("Outbound queue full for participant: {0}")]
    QueueFull(String),

    /// The participant's outbound queue was closed.
    #[error("Outbound queue closed for participant: {0}")]
    Closed(String),

    #[error("Failed to encode notification: {0}")]
    Encode(String),
}

/// Push channel addressed by participant id.
///
/// Implementations must keep notifications for one participant in order.
pub trait Notifier: Send + Sync {
    /// Queue `notification` for `participant_id`.
    fn notify(&self, participant_id: &str, notification: Notification) -> Result<(), NotifyError>;
}

/// Deliver a notification, logging and counting a failure instead of returning it.
pub fn notify_best_effort(notifier: &dyn Notifier, participant_id: &str, notification: Notification) {
    let method = notification.method();
    if let Err(e) = notifier.notify(participant_id, notification) {
        debug!(
            target: "pc.notify",
            participant_id = %participant_id,
            method = method,
            error = %e,
            "Notification dropped"
        );
        metrics::record_notification_dropped(method);
    }
}
