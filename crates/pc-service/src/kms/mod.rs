//! Kurento Media Server adapter.
//!
//! [`KmsClient`] speaks the media server's JSON-RPC 2.0 protocol over a
//! WebSocket; [`KurentoEngine`] maps the [`MediaEngine`](crate::engine::MediaEngine)
//! capability onto it.

mod client;
mod engine;

pub use client::KmsClient;
pub use engine::KurentoEngine;

use crate::engine::EngineError;
use thiserror::Error;

/// Media server client errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KmsError {
    /// Could not open the WebSocket.
    #[error("Failed to connect to media server: {0}")]
    Connect(String),

    /// The media server answered with a JSON-RPC error.
    #[error("Media server error {code}: {message}")]
    Server { code: i64, message: String },

    /// The connection dropped before a response arrived.
    #[error("Media server connection closed")]
    Disconnected,

    /// A response did not have the expected shape.
    #[error("Malformed media server response: {0}")]
    Protocol(String),
}

impl KmsError {
    /// Convert into an engine error, naming the failed operation.
    #[must_use]
    pub fn into_engine_error(self, operation: &str) -> EngineError {
        match self {
            KmsError::Server { message, .. } => EngineError::Rejected {
                operation: operation.to_string(),
                message,
            },
            KmsError::Disconnected | KmsError::Connect(_) => EngineError::Disconnected,
            KmsError::Protocol(detail) => EngineError::Protocol(detail),
        }
    }
}
