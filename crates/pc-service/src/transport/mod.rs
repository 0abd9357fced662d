//! Client-facing signaling transport.

pub mod connections;
pub mod websocket;

pub use connections::{ConnectionRegistry, DEFAULT_QUEUE_CAPACITY};
pub use websocket::{handle_frame, signaling_router, SignalingState};
