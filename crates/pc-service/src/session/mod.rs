//! Per-participant sessions.
//!
//! A session binds a node lease, a pipeline, a WebRTC endpoint and a source
//! endpoint to one participant. It is owned by a [`SessionActor`] and reached
//! through the [`SessionRegistry`].

mod actor;
mod messages;
mod registry;
mod state;

pub use actor::{MediaSession, SessionActor, SessionHandle};
pub use messages::{SessionMessage, SessionSummary};
pub use registry::SessionRegistry;
pub use state::PlaybackState;
