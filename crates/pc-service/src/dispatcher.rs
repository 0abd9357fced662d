//! Command dispatch.
//!
//! Clients send commands as the params of a `customRequest`, discriminated by
//! `id`. The [`CommandDispatcher`] decodes them and runs them against a
//! [`CommandTable`]. It is the fault boundary: a handler that panics becomes an
//! error response for that one request and nothing else is affected.
//!
//! Unknown `id` values are acknowledged without side effects. A `start` for a
//! participant that already has a session is logged and acknowledged.

use crate::errors::PcError;
use crate::observability::metrics;
use crate::playback::PlaybackController;
use crate::signaling::SignalingHandshake;

use async_trait::async_trait;
use common::types::IceCandidate;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tracing::{debug, error, warn, Instrument};

/// A connected participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Assigned by the transport; unique per connection.
    pub participant_id: String,
    /// Caller identity used for admission and placement.
    pub user_name: Option<String>,
}

impl Participant {
    pub fn new(participant_id: impl Into<String>, user_name: Option<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            user_name,
        }
    }
}

/// Player commands.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "id")]
pub enum Command {
    #[serde(rename = "onIceCandidate")]
    OnIceCandidate { candidate: IceCandidate },

    #[serde(rename = "start")]
    Start {
        #[serde(rename = "videourl")]
        video_url: String,
        #[serde(rename = "sdpOffer")]
        sdp_offer: String,
    },

    #[serde(rename = "play")]
    Play,

    #[serde(rename = "pause")]
    Pause,

    #[serde(rename = "doSeek")]
    DoSeek { position: i64 },

    #[serde(rename = "stop")]
    Stop,

    #[serde(other)]
    Unknown,
}

impl Command {
    /// Decode a command object.
    ///
    /// # Errors
    ///
    /// `PcError::InvalidCommand` when `id` is missing or a known command lacks a
    /// required field.
    pub fn parse(params: Value) -> Result<Self, PcError> {
        serde_json::from_value(params).map_err(|e| PcError::InvalidCommand(e.to_string()))
    }

    /// Metric label.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Command::OnIceCandidate { .. } => "onIceCandidate",
            Command::Start { .. } => "start",
            Command::Play => "play",
            Command::Pause => "pause",
            Command::DoSeek { .. } => "doSeek",
            Command::Stop => "stop",
            Command::Unknown => "unknown",
        }
    }
}

/// The set of command handlers a dispatcher runs.
#[async_trait]
pub trait CommandTable: Send + Sync + 'static {
    /// Run one command for `participant`.
    async fn execute(&self, participant: &Participant, command: Command) -> Result<(), PcError>;

    /// The participant's connection closed.
    async fn participant_left(&self, participant: &Participant);
}

/// Handshake plus playback control.
pub struct PlayerControl {
    handshake: SignalingHandshake,
    playback: PlaybackController,
}

impl PlayerControl {
    pub fn new(handshake: SignalingHandshake, playback: PlaybackController) -> Self {
        Self {
            handshake,
            playback,
        }
    }
}

#[async_trait]
impl CommandTable for PlayerControl {
    async fn execute(&self, participant: &Participant, command: Command) -> Result<(), PcError> {
        let participant_id = participant.participant_id.as_str();
        match command {
            Command::OnIceCandidate { candidate } => {
                self.handshake
                    .on_remote_ice_candidate(participant_id, candidate)
                    .await
            }
            Command::Start {
                video_url,
                sdp_offer,
            } => self.handshake.start(participant, &video_url, sdp_offer).await,
            Command::Play => self.playback.play(participant_id).await,
            Command::Pause => self.playback.pause(participant_id).await,
            Command::DoSeek { position } => self.playback.seek(participant_id, position).await,
            Command::Stop => self.playback.stop(participant_id).await,
            Command::Unknown => {
                debug!(
                    target: "pc.dispatcher",
                    participant_id = %participant_id,
                    "Ignoring unknown command"
                );
                Ok(())
            }
        }
    }

    async fn participant_left(&self, participant: &Participant) {
        // Same teardown as an explicit stop.
        let _ = self.playback.stop(&participant.participant_id).await;
    }
}

/// Decodes commands and runs them on a [`CommandTable`], one task per command.
pub struct CommandDispatcher<T: CommandTable> {
    table: Arc<T>,
}

impl<T: CommandTable> CommandDispatcher<T> {
    pub fn new(table: Arc<T>) -> Self {
        Self { table }
    }

    #[must_use]
    pub fn table(&self) -> &Arc<T> {
        &self.table
    }

    /// Handle one `customRequest` params object.
    ///
    /// # Errors
    ///
    /// - `PcError::InvalidCommand` - undecodable payload
    /// - `PcError::HandlerFault` - the handler panicked
    /// - any other error the handler returned, except `DuplicateSession` and
    ///   `UnknownParticipant`, which are acknowledged
    pub async fn handle(&self, participant: &Participant, params: Value) -> Result<(), PcError> {
        let started = Instant::now();

        let command = match Command::parse(params) {
            Ok(command) => command,
            Err(e) => {
                warn!(
                    target: "pc.dispatcher",
                    participant_id = %participant.participant_id,
                    error = %e,
                    "Rejecting undecodable command"
                );
                metrics::record_command("invalid", "invalid", started.elapsed());
                return Err(e);
            }
        };
        let name = command.name();

        let span = tracing::info_span!(
            "pc.dispatcher.command",
            participant_id = %participant.participant_id,
            command = name
        );
        let table = Arc::clone(&self.table);
        let owned = participant.clone();
        let outcome = tokio::spawn(
            async move { table.execute(&owned, command).await }.instrument(span),
        )
        .await
        .unwrap_or_else(|e| Err(PcError::HandlerFault(fault_message(e))));

        let result = match outcome {
            Err(PcError::DuplicateSession(participant_id)) => {
                warn!(
                    target: "pc.dispatcher",
                    participant_id = %participant_id,
                    "Start ignored, session already active"
                );
                Ok(())
            }
            Err(PcError::UnknownParticipant(_)) => Ok(()),
            Err(e) => {
                error!(
                    target: "pc.dispatcher",
                    participant_id = %participant.participant_id,
                    command = name,
                    error = %e,
                    "Unable to handle custom request"
                );
                Err(e)
            }
            Ok(()) => Ok(()),
        };

        metrics::record_command(name, status_label(&result), started.elapsed());
        result
    }

    /// Tear down whatever the participant left behind.
    pub async fn participant_left(&self, participant: &Participant) {
        let table = Arc::clone(&self.table);
        let owned = participant.clone();
        if let Err(e) = tokio::spawn(async move { table.participant_left(&owned).await }).await {
            error!(
                target: "pc.dispatcher",
                participant_id = %participant.participant_id,
                error = %e,
                "Participant teardown panicked"
            );
        }
    }
}

/// Text of the panic that ended a handler task.
fn fault_message(e: JoinError) -> String {
    match e.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|msg| (*msg).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "command handler panicked".to_string()),
        Err(e) => e.to_string(),
    }
}

fn status_label(result: &Result<(), PcError>) -> &'static str {
    match result {
        Ok(()) => "success",
        Err(PcError::InvalidCommand(_)) => "invalid",
        Err(PcError::AdmissionDenied(_) | PcError::MissingIdentity(_)) => "denied",
        Err(PcError::NoCapacity { .. }) => "no_capacity",
        Err(PcError::Engine(_) | PcError::SeekRejected(_)) => "engine_error",
        Err(PcError::HandlerFault(_)) => "fault",
        Err(_) => "error",
    }
}
