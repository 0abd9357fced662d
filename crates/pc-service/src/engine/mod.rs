//! Media engine capability.
//!
//! The controller never processes media itself. Each node exposes a `MediaEngine`
//! that creates pipelines and endpoints on a remote media server and reports
//! asynchronous events through per-object subscriptions.
//!
//! # Events
//!
//! Subscribers hand the engine an [`EventSink`]. Events for a torn-down session are
//! dropped when the session's receiver goes away: a send on a closed sink fails and
//! the engine forgets the subscription.

use async_trait::async_trait;
use common::types::{IceCandidate, MediaState, VideoInfo};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Opaque handle of an object created on the media server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectId(String);

impl ObjectId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kinds of events a session subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineEventKind {
    IceCandidateFound,
    MediaStateChanged,
    Error,
    EndOfStream,
}

impl EngineEventKind {
    /// Event type name on the media server wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineEventKind::IceCandidateFound => "IceCandidateFound",
            EngineEventKind::MediaStateChanged => "MediaStateChanged",
            EngineEventKind::Error => "Error",
            EngineEventKind::EndOfStream => "EndOfStream",
        }
    }

    /// Parse a wire event type name.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "IceCandidateFound" => Some(EngineEventKind::IceCandidateFound),
            "MediaStateChanged" => Some(EngineEventKind::MediaStateChanged),
            "Error" => Some(EngineEventKind::Error),
            "EndOfStream" => Some(EngineEventKind::EndOfStream),
            _ => None,
        }
    }
}

/// An asynchronous event raised by the media server.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The WebRTC endpoint discovered a local ICE candidate.
    IceCandidateFound { candidate: IceCandidate },
    /// The WebRTC endpoint's media flow changed state.
    MediaStateChanged { new_state: MediaState },
    /// The source endpoint failed.
    Error { description: String },
    /// The source endpoint reached the end of its stream.
    EndOfStream,
}

impl EngineEvent {
    #[must_use]
    pub fn kind(&self) -> EngineEventKind {
        match self {
            EngineEvent::IceCandidateFound { .. } => EngineEventKind::IceCandidateFound,
            EngineEvent::MediaStateChanged { .. } => EngineEventKind::MediaStateChanged,
            EngineEvent::Error { .. } => EngineEventKind::Error,
            EngineEvent::EndOfStream => EngineEventKind::EndOfStream,
        }
    }
}

/// Channel on which subscribed events are delivered.
///
/// Unbounded so the engine's reader never blocks on a slow session.
pub type EventSink = mpsc::UnboundedSender<EngineEvent>;

/// Media engine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The media server refused the operation.
    #[error("{operation} failed: {message}")]
    Rejected { operation: String, message: String },

    /// The control channel to the media server is gone.
    #[error("Media server disconnected")]
    Disconnected,

    /// The media server answered with something unexpected.
    #[error("Unexpected media server response: {0}")]
    Protocol(String),
}

/// Operations the controller needs from a media server.
///
/// Endpoint handles are only meaningful on the engine that created them.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Create an empty media pipeline.
    async fn create_pipeline(&self) -> Result<ObjectId, EngineError>;

    /// Create a WebRTC endpoint inside `pipeline`.
    async fn create_webrtc_endpoint(&self, pipeline: &ObjectId) -> Result<ObjectId, EngineError>;

    /// Create a media source endpoint that reads from `uri`.
    async fn create_source_endpoint(
        &self,
        pipeline: &ObjectId,
        uri: &str,
    ) -> Result<ObjectId, EngineError>;

    /// Route media from `source` into `sink`.
    async fn connect(&self, source: &ObjectId, sink: &ObjectId) -> Result<(), EngineError>;

    /// Submit an SDP offer and return the SDP answer.
    async fn process_offer(&self, webrtc: &ObjectId, offer: &str) -> Result<String, EngineError>;

    /// Start gathering local ICE candidates.
    async fn gather_candidates(&self, webrtc: &ObjectId) -> Result<(), EngineError>;

    /// Add a remote ICE candidate.
    async fn add_ice_candidate(
        &self,
        webrtc: &ObjectId,
        candidate: &IceCandidate,
    ) -> Result<(), EngineError>;

    async fn play(&self, source: &ObjectId) -> Result<(), EngineError>;

    async fn pause(&self, source: &ObjectId) -> Result<(), EngineError>;

    /// Seek the source to `position_ms` milliseconds.
    async fn set_position(&self, source: &ObjectId, position_ms: i64) -> Result<(), EngineError>;

    /// Seekability and duration of the source.
    async fn get_video_info(&self, source: &ObjectId) -> Result<VideoInfo, EngineError>;

    /// Deliver events of `kind` raised by `object` into `sink`.
    async fn subscribe(
        &self,
        object: &ObjectId,
        kind: EngineEventKind,
        sink: EventSink,
    ) -> Result<(), EngineError>;

    /// Release an object. Releasing a pipeline releases everything inside it.
    async fn release(&self, object: &ObjectId) -> Result<(), EngineError>;

    /// Whether the control channel is up. Used for readiness.
    fn is_connected(&self) -> bool {
        true
    }
}
