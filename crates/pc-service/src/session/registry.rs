//! Participant id to session map.
//!
//! Sharded (`DashMap`), so operations on different participants never contend.
//! Removal is the single teardown path: it takes the entry out, then waits for
//! the actor to release its engine objects and node.
//!
//! A `start` holds a [`StartReservation`] for the participant while it builds
//! the session. Removing a participant whose start is still in flight withdraws
//! the reservation, and the start discards its session instead of registering
//! it. Stop and disconnect therefore never miss a session that is being built.

use super::actor::SessionHandle;
use super::messages::SessionSummary;
use crate::errors::PcError;
use crate::observability::metrics;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug)]
enum Slot {
    /// A start is building the session. `withdrawn` is set when the
    /// participant stops or leaves before it finishes.
    Starting { ticket: u64, withdrawn: bool },
    Live(SessionHandle),
}

/// Live sessions keyed by participant id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Slot>,
    next_ticket: AtomicU64,
    cancel_token: CancellationToken,
}

/// Exclusive right to register a session for one participant.
///
/// Dropping it without a successful [`SessionRegistry::commit`] frees the
/// participant again.
#[derive(Debug)]
pub struct StartReservation<'a> {
    registry: &'a SessionRegistry,
    participant_id: String,
    ticket: u64,
}

impl StartReservation<'_> {
    #[must_use]
    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Whether the participant stopped or left since the reservation was taken.
    #[must_use]
    pub fn is_withdrawn(&self) -> bool {
        self.registry
            .sessions
            .get(&self.participant_id)
            .map_or(true, |slot| match slot.value() {
                Slot::Starting { ticket, withdrawn } => *ticket != self.ticket || *withdrawn,
                Slot::Live(_) => true,
            })
    }
}

impl Drop for StartReservation<'_> {
    fn drop(&mut self) {
        let ticket = self.ticket;
        self.registry.sessions.remove_if(&self.participant_id, |_, slot| {
            matches!(slot, Slot::Starting { ticket: held, .. } if *held == ticket)
        });
    }
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token every session actor's token derives from.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Claim `participant_id` for a session that is about to be built.
    ///
    /// # Errors
    ///
    /// `PcError::DuplicateSession` if the participant already has a session or
    /// another start in flight.
    pub fn reserve(&self, participant_id: &str) -> Result<StartReservation<'_>, PcError> {
        match self.sessions.entry(participant_id.to_string()) {
            Entry::Occupied(_) => Err(PcError::DuplicateSession(participant_id.to_string())),
            Entry::Vacant(slot) => {
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                slot.insert(Slot::Starting {
                    ticket,
                    withdrawn: false,
                });
                Ok(StartReservation {
                    registry: self,
                    participant_id: participant_id.to_string(),
                    ticket,
                })
            }
        }
    }

    /// Register the session built under `reservation`.
    ///
    /// # Errors
    ///
    /// `PcError::UnknownParticipant` if the participant stopped or left while
    /// the session was being built. The session is not registered and the
    /// caller must tear it down.
    pub fn commit(
        &self,
        reservation: StartReservation<'_>,
        handle: SessionHandle,
    ) -> Result<(), PcError> {
        let participant_id = reservation.participant_id.clone();
        let committed = match self.sessions.get_mut(&participant_id) {
            Some(mut slot) => {
                let current = matches!(
                    slot.value(),
                    Slot::Starting { ticket, withdrawn }
                        if *ticket == reservation.ticket && !*withdrawn
                );
                if current {
                    *slot.value_mut() = Slot::Live(handle);
                }
                current
            }
            None => false,
        };
        drop(reservation);

        if !committed {
            debug!(
                target: "pc.actor.session",
                participant_id = %participant_id,
                "Participant gone before session was registered"
            );
            return Err(PcError::UnknownParticipant(participant_id));
        }

        metrics::set_sessions_active(self.len());
        debug!(
            target: "pc.actor.session",
            participant_id = %participant_id,
            "Session registered"
        );
        Ok(())
    }

    #[must_use]
    pub fn get(&self, participant_id: &str) -> Option<SessionHandle> {
        self.sessions
            .get(participant_id)
            .and_then(|slot| match slot.value() {
                Slot::Live(handle) => Some(handle.clone()),
                Slot::Starting { .. } => None,
            })
    }

    /// Whether the participant has a registered session.
    #[must_use]
    pub fn contains(&self, participant_id: &str) -> bool {
        self.get(participant_id).is_some()
    }

    /// Number of registered sessions. Starts in flight are not counted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Live(_)))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and tear down a session. No-op when absent.
    ///
    /// A start still in flight for the participant is withdrawn; it tears its
    /// own session down when it finishes.
    ///
    /// Returns the final summary, or `None` if there was no session or its actor
    /// had already exited.
    pub async fn remove(&self, participant_id: &str) -> Option<SessionSummary> {
        let handle = {
            let Entry::Occupied(mut entry) = self.sessions.entry(participant_id.to_string())
            else {
                return None;
            };
            if let Slot::Starting { withdrawn, .. } = entry.get_mut() {
                *withdrawn = true;
                debug!(
                    target: "pc.actor.session",
                    participant_id = %participant_id,
                    "Start in flight, withdrawing"
                );
                return None;
            }
            match entry.remove() {
                Slot::Live(handle) => handle,
                Slot::Starting { .. } => return None,
            }
        };

        metrics::set_sessions_active(self.len());
        stop_session(&handle).await
    }

    /// Tear down the session behind `handle`, unregistering it only if it is
    /// still the participant's registered session.
    pub async fn discard(&self, handle: &SessionHandle) -> Option<SessionSummary> {
        let removed = self
            .sessions
            .remove_if(handle.participant_id(), |_, slot| {
                matches!(slot, Slot::Live(live) if live.same_session(handle))
            });
        if removed.is_some() {
            metrics::set_sessions_active(self.len());
        }

        stop_session(handle).await
    }

    /// Tear down every session (process shutdown).
    pub async fn shutdown(&self) {
        let participants: Vec<String> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        info!(
            target: "pc.actor.session",
            sessions = participants.len(),
            "Tearing down all sessions"
        );

        for participant_id in participants {
            self.remove(&participant_id).await;
        }

        // Anything that raced in during teardown.
        self.cancel_token.cancel();
    }
}

async fn stop_session(handle: &SessionHandle) -> Option<SessionSummary> {
    match handle.stop().await {
        Ok(summary) => {
            debug!(
                target: "pc.actor.session",
                participant_id = %handle.participant_id(),
                final_state = %summary.state,
                "Session removed"
            );
            Some(summary)
        }
        Err(_) => {
            debug!(
                target: "pc.actor.session",
                participant_id = %handle.participant_id(),
                "Session actor already exited"
            );
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::{MediaEngine, ObjectId};
    use crate::notify::{Notification, NotifyError, Notifier};
    use crate::scheduler::{AuthorizationPolicy, Node, NodePool, Scheduler};
    use crate::session::{MediaSession, SessionActor};
    use crate::test_support::InertEngine;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Silent;

    impl Notifier for Silent {
        fn notify(&self, _: &str, _: Notification) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    fn scheduler() -> Scheduler {
        let engine: Arc<dyn MediaEngine> = Arc::new(InertEngine);
        let pool = Arc::new(NodePool::new(vec![Node::new("ws://kms-0", engine, None)]));
        Scheduler::new(pool, AuthorizationPolicy::allow_all())
    }

    fn spawn_session(
        registry: &SessionRegistry,
        scheduler: &Scheduler,
        participant_id: &str,
    ) -> SessionHandle {
        let media = MediaSession {
            lease: scheduler.select_node("alice").unwrap(),
            pipeline: ObjectId::new("pipeline-1"),
            webrtc: ObjectId::new("webrtc-1"),
            source: ObjectId::new("player-1"),
        };
        let (_events_tx, events_rx) = mpsc::unbounded_channel();
        let (handle, _task) = SessionActor::spawn(
            participant_id.to_string(),
            media,
            events_rx,
            Arc::new(Silent),
            registry.child_token(),
        );
        handle
    }

    #[tokio::test]
    async fn test_commit_registers_session() {
        let registry = SessionRegistry::new();
        let scheduler = scheduler();

        let reservation = registry.reserve("p-1").unwrap();
        assert!(!registry.contains("p-1"));
        assert!(registry.is_empty());

        let handle = spawn_session(&registry, &scheduler, "p-1");
        registry.commit(reservation, handle).unwrap();

        assert!(registry.contains("p-1"));
        assert_eq!(registry.len(), 1);
        assert_eq!(scheduler.pool().loads(), vec![1]);
    }

    #[tokio::test]
    async fn test_reserve_rejects_second_start() {
        let registry = SessionRegistry::new();

        let _first = registry.reserve("p-1").unwrap();
        assert!(matches!(
            registry.reserve("p-1"),
            Err(PcError::DuplicateSession(_))
        ));
        assert!(registry.reserve("p-2").is_ok());
    }

    #[tokio::test]
    async fn test_dropped_reservation_frees_participant() {
        let registry = SessionRegistry::new();

        drop(registry.reserve("p-1").unwrap());

        assert!(registry.reserve("p-1").is_ok());
    }

    #[tokio::test]
    async fn test_remove_during_start_withdraws_reservation() {
        let registry = SessionRegistry::new();
        let scheduler = scheduler();

        let reservation = registry.reserve("p-1").unwrap();
        assert!(registry.remove("p-1").await.is_none());
        assert!(reservation.is_withdrawn());

        let handle = spawn_session(&registry, &scheduler, "p-1");
        let err = registry.commit(reservation, handle.clone()).unwrap_err();
        assert!(matches!(err, PcError::UnknownParticipant(_)));
        assert!(!registry.contains("p-1"));

        registry.discard(&handle).await.unwrap();
        assert_eq!(scheduler.pool().loads(), vec![0]);
        assert!(registry.reserve("p-1").is_ok());
    }

    #[tokio::test]
    async fn test_discard_leaves_newer_session_registered() {
        let registry = SessionRegistry::new();
        let scheduler = scheduler();

        let reservation = registry.reserve("p-1").unwrap();
        let old = spawn_session(&registry, &scheduler, "p-1");
        registry.commit(reservation, old.clone()).unwrap();
        registry.remove("p-1").await.unwrap();

        let reservation = registry.reserve("p-1").unwrap();
        let new = spawn_session(&registry, &scheduler, "p-1");
        registry.commit(reservation, new.clone()).unwrap();

        assert!(registry.discard(&old).await.is_none());
        assert!(registry.get("p-1").unwrap().same_session(&new));
        assert_eq!(scheduler.pool().loads(), vec![1]);
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop() {
        let registry = SessionRegistry::new();
        assert!(registry.remove("ghost").await.is_none());
        assert!(registry.reserve("ghost").is_ok());
    }
}
