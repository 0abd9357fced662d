//! `SessionActor` - one actor per participant session.
//!
//! Each `SessionActor`:
//! - Owns the session's engine objects and its node lease
//! - Applies commands for its participant one at a time
//! - Turns engine events into notifications for its participant only
//!
//! # Lifecycle
//!
//! 1. Spawned by the signaling handshake once the pipeline is wired
//! 2. Runs until `Stop`, cancellation, or every handle is dropped
//! 3. On exit releases the pipeline, then drops the lease (node load -1)
//!
//! Once the actor is gone its event receiver is dropped, so the engine's late
//! events for this session have nowhere to go and are discarded.

use super::messages::{SessionMessage, SessionSummary};
use super::state::PlaybackState;
use crate::engine::{EngineError, EngineEvent, MediaEngine, ObjectId};
use crate::errors::PcError;
use crate::notify::{notify_best_effort, Notification, Notifier};
use crate::observability::metrics;
use crate::scheduler::NodeLease;

use common::types::{IceCandidate, MediaState};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 64;

/// Engine objects of one session plus the node they live on.
#[derive(Debug)]
pub struct MediaSession {
    pub lease: NodeLease,
    pub pipeline: ObjectId,
    pub webrtc: ObjectId,
    pub source: ObjectId,
}

impl MediaSession {
    fn engine(&self) -> &Arc<dyn MediaEngine> {
        self.lease.node().engine()
    }

    /// Release the pipeline (and everything in it), then the node.
    pub async fn release(self) {
        if let Err(e) = self.engine().release(&self.pipeline).await {
            warn!(
                target: "pc.actor.session",
                pipeline = %self.pipeline,
                node_index = self.lease.index(),
                error = %e,
                "Failed to release pipeline"
            );
        }
        drop(self.lease);
    }
}

/// Handle to a `SessionActor`.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    participant_id: String,
}

impl SessionHandle {
    #[must_use]
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Submit the SDP offer; `startResponse` is pushed before this returns.
    pub async fn negotiate(&self, sdp_offer: String) -> Result<(), PcError> {
        self.request(|respond_to| SessionMessage::Negotiate {
            sdp_offer,
            respond_to,
        })
        .await?
        .map_err(PcError::from)
    }

    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PcError> {
        self.request(|respond_to| SessionMessage::AddIceCandidate {
            candidate,
            respond_to,
        })
        .await?
        .map_err(PcError::from)
    }

    pub async fn play(&self) -> Result<(), PcError> {
        self.request(|respond_to| SessionMessage::Play { respond_to })
            .await?
            .map_err(PcError::from)
    }

    pub async fn pause(&self) -> Result<(), PcError> {
        self.request(|respond_to| SessionMessage::Pause { respond_to })
            .await?
            .map_err(PcError::from)
    }

    /// Seek the source. An engine refusal is `PcError::SeekRejected`.
    pub async fn seek(&self, position_ms: i64) -> Result<(), PcError> {
        self.request(|respond_to| SessionMessage::Seek {
            position_ms,
            respond_to,
        })
        .await?
        .map_err(|e| PcError::SeekRejected(e.to_string()))
    }

    pub async fn summary(&self) -> Result<SessionSummary, PcError> {
        self.request(|respond_to| SessionMessage::GetSummary { respond_to })
            .await
    }

    /// Tear the session down and wait until its node has been released.
    pub async fn stop(&self) -> Result<SessionSummary, PcError> {
        self.request(|respond_to| SessionMessage::Stop { respond_to })
            .await
    }

    /// Whether both handles reach the same actor.
    #[must_use]
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        self.sender.same_channel(&other.sender)
    }

    /// Cancel the actor without waiting.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// A closed mailbox or dropped reply means the actor already exited.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, PcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| PcError::UnknownParticipant(self.participant_id.clone()))?;

        rx.await
            .map_err(|_| PcError::UnknownParticipant(self.participant_id.clone()))
    }
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    participant_id: String,
    media: MediaSession,
    state: PlaybackState,
    video_info_sent: bool,
    created_at: i64,
    notifier: Arc<dyn Notifier>,
    receiver: mpsc::Receiver<SessionMessage>,
    events: mpsc::UnboundedReceiver<EngineEvent>,
    events_open: bool,
    cancel_token: CancellationToken,
}

impl SessionActor {
    /// Spawn a new session actor in the `Negotiating` state.
    ///
    /// `events` must be the receiving half of the sink the session's engine
    /// objects were subscribed with.
    pub fn spawn(
        participant_id: String,
        media: MediaSession,
        events: mpsc::UnboundedReceiver<EngineEvent>,
        notifier: Arc<dyn Notifier>,
        cancel_token: CancellationToken,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);

        let actor = Self {
            participant_id: participant_id.clone(),
            media,
            state: PlaybackState::Negotiating,
            video_info_sent: false,
            created_at: chrono::Utc::now().timestamp(),
            notifier,
            receiver,
            events,
            events_open: true,
            cancel_token: cancel_token.clone(),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionHandle {
            sender,
            cancel_token,
            participant_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "pc.actor.session",
        fields(
            participant_id = %self.participant_id,
            node_index = self.media.lease.index(),
            pipeline = %self.media.pipeline
        )
    )]
    async fn run(mut self) {
        debug!(
            target: "pc.actor.session",
            participant_id = %self.participant_id,
            "SessionActor started"
        );

        let responder = loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "pc.actor.session",
                        participant_id = %self.participant_id,
                        "SessionActor received cancellation signal"
                    );
                    break None;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(SessionMessage::Stop { respond_to }) => break Some(respond_to),
                        Some(message) => self.handle_message(message).await,
                        None => {
                            debug!(
                                target: "pc.actor.session",
                                participant_id = %self.participant_id,
                                "SessionActor channel closed, exiting"
                            );
                            break None;
                        }
                    }
                }

                event = self.events.recv(), if self.events_open => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            // Engine dropped every subscription (control channel lost).
                            warn!(
                                target: "pc.actor.session",
                                participant_id = %self.participant_id,
                                "Engine event stream closed"
                            );
                            self.events_open = false;
                        }
                    }
                }
            }
        };

        let summary = self.summary();
        let Self {
            participant_id,
            media,
            receiver,
            events,
            ..
        } = self;
        // Close both inboxes first so late events and commands are dropped.
        drop(events);
        drop(receiver);

        media.release().await;

        info!(
            target: "pc.actor.session",
            participant_id = %participant_id,
            final_state = %summary.state,
            lifetime_secs = chrono::Utc::now().timestamp() - summary.created_at,
            "SessionActor stopped"
        );

        if let Some(respond_to) = responder {
            let _ = respond_to.send(summary);
        }
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Negotiate {
                sdp_offer,
                respond_to,
            } => {
                let result = self.negotiate(&sdp_offer).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::AddIceCandidate {
                candidate,
                respond_to,
            } => {
                let result = self
                    .engine()
                    .add_ice_candidate(&self.media.webrtc, &candidate)
                    .await;
                let _ = respond_to.send(result);
            }

            SessionMessage::Play { respond_to } => {
                let result = self.engine().play(&self.media.source).await;
                if result.is_ok() {
                    self.transition(PlaybackState::Playing);
                }
                let _ = respond_to.send(result);
            }

            SessionMessage::Pause { respond_to } => {
                let result = self.engine().pause(&self.media.source).await;
                if result.is_ok() {
                    self.transition(PlaybackState::Paused);
                }
                let _ = respond_to.send(result);
            }

            SessionMessage::Seek {
                position_ms,
                respond_to,
            } => {
                let result = self
                    .engine()
                    .set_position(&self.media.source, position_ms)
                    .await;
                if let Err(e) = &result {
                    debug!(
                        target: "pc.actor.session",
                        participant_id = %self.participant_id,
                        position_ms = position_ms,
                        error = %e,
                        "The seek cannot be performed"
                    );
                }
                let _ = respond_to.send(result);
            }

            SessionMessage::GetSummary { respond_to } => {
                let _ = respond_to.send(self.summary());
            }

            // Handled by the run loop.
            SessionMessage::Stop { respond_to } => {
                let _ = respond_to.send(self.summary());
            }
        }
    }

    async fn negotiate(&mut self, sdp_offer: &str) -> Result<(), EngineError> {
        let sdp_answer = self
            .engine()
            .process_offer(&self.media.webrtc, sdp_offer)
            .await?;

        self.notify(Notification::StartResponse { sdp_answer });

        self.engine().gather_candidates(&self.media.webrtc).await
    }

    async fn handle_event(&mut self, event: EngineEvent) {
        metrics::record_engine_event(event.kind().as_str());

        match event {
            EngineEvent::IceCandidateFound { candidate } => {
                self.notify(Notification::IceCandidate { candidate });
            }

            EngineEvent::MediaStateChanged { new_state } => {
                if new_state != MediaState::Connected {
                    return;
                }
                self.transition(self.state.on_media_connected());

                if self.video_info_sent {
                    return;
                }
                match self.engine().get_video_info(&self.media.source).await {
                    Ok(info) => {
                        self.video_info_sent = true;
                        self.notify(Notification::VideoInfo(info));
                    }
                    Err(e) => {
                        warn!(
                            target: "pc.actor.session",
                            participant_id = %self.participant_id,
                            error = %e,
                            "Failed to read video info"
                        );
                    }
                }
            }

            EngineEvent::Error { description } => {
                info!(
                    target: "pc.actor.session",
                    participant_id = %self.participant_id,
                    description = %description,
                    "Source reported an error"
                );
                self.transition(PlaybackState::Failed);
                self.notify(Notification::PlayEnd);
            }

            EngineEvent::EndOfStream => {
                info!(
                    target: "pc.actor.session",
                    participant_id = %self.participant_id,
                    "Source reached end of stream"
                );
                self.transition(PlaybackState::Ended);
                self.notify(Notification::PlayEnd);
            }
        }
    }

    fn transition(&mut self, next: PlaybackState) {
        if next != self.state {
            debug!(
                target: "pc.actor.session",
                participant_id = %self.participant_id,
                from = %self.state,
                to = %next,
                "Playback state changed"
            );
            self.state = next;
        }
    }

    fn notify(&self, notification: Notification) {
        notify_best_effort(self.notifier.as_ref(), &self.participant_id, notification);
    }

    fn engine(&self) -> Arc<dyn MediaEngine> {
        Arc::clone(self.media.engine())
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            participant_id: self.participant_id.clone(),
            node_index: self.media.lease.index(),
            node_uri: self.media.lease.node().uri().to_string(),
            state: self.state,
            video_info_sent: self.video_info_sent,
            created_at: self.created_at,
        }
    }
}
