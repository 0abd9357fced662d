//! Messages accepted by a session actor.
//!
//! Every request that touches a session goes through its mailbox, so commands
//! for one participant are applied one at a time. Replies come back on
//! `tokio::sync::oneshot` channels.

use super::state::PlaybackState;
use crate::engine::EngineError;
use common::types::IceCandidate;
use tokio::sync::oneshot;

/// Messages sent to a `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    /// Submit the client's SDP offer, push `startResponse`, and begin ICE gathering.
    Negotiate {
        sdp_offer: String,
        respond_to: oneshot::Sender<Result<(), EngineError>>,
    },

    /// Forward a remote ICE candidate to the WebRTC endpoint.
    AddIceCandidate {
        candidate: IceCandidate,
        respond_to: oneshot::Sender<Result<(), EngineError>>,
    },

    Play {
        respond_to: oneshot::Sender<Result<(), EngineError>>,
    },

    Pause {
        respond_to: oneshot::Sender<Result<(), EngineError>>,
    },

    /// Seek the source. An engine refusal comes back as `Err`.
    Seek {
        position_ms: i64,
        respond_to: oneshot::Sender<Result<(), EngineError>>,
    },

    /// Snapshot of the session.
    GetSummary {
        respond_to: oneshot::Sender<SessionSummary>,
    },

    /// Release engine resources and the node, then exit.
    Stop {
        respond_to: oneshot::Sender<SessionSummary>,
    },
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub participant_id: String,
    pub node_index: usize,
    pub node_uri: String,
    pub state: PlaybackState,
    pub video_info_sent: bool,
    /// Unix timestamp (seconds) of when the session was created.
    pub created_at: i64,
}
