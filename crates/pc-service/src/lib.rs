//! Player Controller (PC) Service Library
//!
//! The Player Controller lets a WebRTC client watch a media source (a file or
//! stream URI) through a pool of remote media servers. It never touches media
//! itself; it is responsible for:
//!
//! - Admission control and node placement (authorization rule, per-node ceilings)
//! - The WebRTC offer/answer and ICE exchange for each participant
//! - Playback control (play, pause, seek, stop) on the participant's source
//! - Forwarding media server events to the participant as notifications
//!
//! # Architecture
//!
//! ```text
//! transport (WebSocket JSON-RPC, one connection per participant)
//! └── CommandDispatcher (fault boundary, one task per command)
//!     └── PlayerControl
//!         ├── SignalingHandshake -> Scheduler (NodePool + AuthorizationPolicy)
//!         └── PlaybackController
//!             └── SessionRegistry
//!                 └── SessionActor (one per participant, owns its NodeLease)
//!                     └── MediaEngine (KurentoEngine per node)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single-writer sessions**: each session is an actor; commands and engine
//!   events for one participant are applied in order
//! - **Lease-based load accounting**: dropping a `NodeLease` is the only way a
//!   node's load goes down, so every teardown path releases exactly once
//! - **Late events are dropped**: a stopped session's event receiver is gone
//!
//! # Modules
//!
//! - [`config`] - Service configuration from environment
//! - [`dispatcher`] - Command decoding and dispatch
//! - [`engine`] - Media engine capability
//! - [`errors`] - Error types with JSON-RPC error codes
//! - [`kms`] - Kurento Media Server adapter
//! - [`notify`] - Server-to-client notifications
//! - [`observability`] - Health endpoints and metrics
//! - [`playback`] - Play, pause, seek and stop
//! - [`scheduler`] - Node pool and placement
//! - [`session`] - Session actors and registry
//! - [`signaling`] - Session start and ICE forwarding
//! - [`transport`] - Client WebSocket signaling

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod kms;
pub mod notify;
pub mod observability;
pub mod playback;
pub mod scheduler;
pub mod session;
pub mod signaling;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;
