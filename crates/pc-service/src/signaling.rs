//! WebRTC handshake for one participant.
//!
//! `start` reserves the participant, schedules a node, builds
//! `source -> WebRTC endpoint` in a fresh pipeline, registers the session, then
//! negotiates. Any failure after the pipeline exists releases it; any failure
//! after scheduling gives the node back (the lease drops), so a failed start
//! leaves nothing behind. A stop or disconnect that lands mid-start withdraws
//! the reservation and the start discards what it built.

use crate::dispatcher::Participant;
use crate::engine::{EngineError, EngineEvent, EngineEventKind, MediaEngine, ObjectId};
use crate::errors::PcError;
use crate::notify::Notifier;
use crate::scheduler::Scheduler;
use crate::session::{MediaSession, SessionActor, SessionRegistry};

use common::types::IceCandidate;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Offer/answer and ICE exchange.
pub struct SignalingHandshake {
    scheduler: Arc<Scheduler>,
    registry: Arc<SessionRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl SignalingHandshake {
    pub fn new(
        scheduler: Arc<Scheduler>,
        registry: Arc<SessionRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            scheduler,
            registry,
            notifier,
        }
    }

    /// Create a session playing `source_uri` and answer `sdp_offer`.
    ///
    /// On success `startResponse` has been queued and ICE gathering has begun.
    ///
    /// # Errors
    ///
    /// - `PcError::DuplicateSession` - the participant already has a session or
    ///   a start in flight
    /// - `PcError::UnknownParticipant` - the participant stopped or left before the
    ///   session was registered (resources are released)
    /// - `PcError::MissingIdentity` - the connection carried no caller identity
    /// - `PcError::AdmissionDenied`, `PcError::NoCapacity` - from the scheduler
    /// - `PcError::Engine` - any engine step failed (resources are released)
    #[instrument(
        skip_all,
        name = "pc.signaling.start",
        fields(participant_id = %participant.participant_id)
    )]
    pub async fn start(
        &self,
        participant: &Participant,
        source_uri: &str,
        sdp_offer: String,
    ) -> Result<(), PcError> {
        let participant_id = participant.participant_id.as_str();

        // Held until the session is registered; a stop or disconnect meanwhile
        // withdraws it.
        let reservation = self.registry.reserve(participant_id)?;

        let Some(user_name) = participant.user_name.as_deref() else {
            warn!(
                target: "pc.signaling",
                participant_id = %participant_id,
                "Unable to find user name for participant"
            );
            return Err(PcError::MissingIdentity(participant_id.to_string()));
        };

        let lease = self.scheduler.select_node(user_name)?;
        let engine = Arc::clone(lease.node().engine());

        let pipeline = engine.create_pipeline().await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let (webrtc, source) = match build_player(&engine, &pipeline, source_uri, &events_tx).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                release_quietly(&engine, &pipeline).await;
                return Err(e.into());
            }
        };
        // Only the engine's subscriptions keep the sink alive from here on.
        drop(events_tx);

        if reservation.is_withdrawn() {
            debug!(
                target: "pc.signaling",
                participant_id = %participant_id,
                "Participant gone while building player, releasing"
            );
            release_quietly(&engine, &pipeline).await;
            return Err(PcError::UnknownParticipant(participant_id.to_string()));
        }

        let node_index = lease.index();
        let media = MediaSession {
            lease,
            pipeline,
            webrtc,
            source,
        };

        let (handle, _task) = SessionActor::spawn(
            participant_id.to_string(),
            media,
            events_rx,
            Arc::clone(&self.notifier),
            self.registry.child_token(),
        );

        if let Err(e) = self.registry.commit(reservation, handle.clone()) {
            self.registry.discard(&handle).await;
            return Err(e);
        }

        if let Err(e) = handle.negotiate(sdp_offer).await {
            warn!(
                target: "pc.signaling",
                participant_id = %participant_id,
                error = %e,
                "Negotiation failed, tearing session down"
            );
            self.registry.discard(&handle).await;
            return Err(e);
        }

        info!(
            target: "pc.signaling",
            participant_id = %participant_id,
            user_name = %user_name,
            node_index = node_index,
            "Session started"
        );

        Ok(())
    }

    /// Forward a remote ICE candidate. Silently ignored without a session.
    ///
    /// # Errors
    ///
    /// `PcError::Engine` if the endpoint rejects the candidate.
    pub async fn on_remote_ice_candidate(
        &self,
        participant_id: &str,
        candidate: IceCandidate,
    ) -> Result<(), PcError> {
        let Some(handle) = self.registry.get(participant_id) else {
            debug!(
                target: "pc.signaling",
                participant_id = %participant_id,
                "Dropping ICE candidate for participant without session"
            );
            return Ok(());
        };

        match handle.add_ice_candidate(candidate).await {
            Err(PcError::UnknownParticipant(_)) => Ok(()),
            other => other,
        }
    }
}

/// Create both endpoints, wire them, and route their events into `sink`.
async fn build_player(
    engine: &Arc<dyn MediaEngine>,
    pipeline: &ObjectId,
    source_uri: &str,
    sink: &mpsc::UnboundedSender<EngineEvent>,
) -> Result<(ObjectId, ObjectId), EngineError> {
    let webrtc = engine.create_webrtc_endpoint(pipeline).await?;
    let source = engine.create_source_endpoint(pipeline, source_uri).await?;

    engine.connect(&source, &webrtc).await?;

    for (object, kind) in [
        (&webrtc, EngineEventKind::IceCandidateFound),
        (&webrtc, EngineEventKind::MediaStateChanged),
        (&source, EngineEventKind::Error),
        (&source, EngineEventKind::EndOfStream),
    ] {
        engine.subscribe(object, kind, sink.clone()).await?;
    }

    Ok((webrtc, source))
}

async fn release_quietly(engine: &Arc<dyn MediaEngine>, pipeline: &ObjectId) {
    if let Err(e) = engine.release(pipeline).await {
        warn!(
            target: "pc.signaling",
            pipeline = %pipeline,
            error = %e,
            "Failed to release pipeline after failed start"
        );
    }
}
