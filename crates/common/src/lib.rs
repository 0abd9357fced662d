//! Common utilities and types shared across Player Controller components.

#![warn(clippy::pedantic)]

/// Module for JSON-RPC 2.0 envelopes (client signaling and media server control)
pub mod jsonrpc;

/// Module for media types shared by the signaling and engine layers
pub mod types;
