//! Player Controller error types.
//!
//! Error types map to JSON-RPC error codes for client responses.
//! Internal details are logged server-side but not exposed to clients. A
//! handler fault is the exception: its message is what the client gets.

use crate::engine::EngineError;
use common::jsonrpc::{ErrorObject, INTERNAL_ERROR, INVALID_PARAMS};
use thiserror::Error;

/// Caller was not admitted by the authorization rule, or carried no identity.
pub const ADMISSION_DENIED: i64 = -32001;

/// No media node had spare capacity.
pub const NO_CAPACITY: i64 = -32002;

/// The media engine reported a failure.
pub const ENGINE_FAILURE: i64 = -32003;

/// Player Controller error type.
///
/// Maps to JSON-RPC error codes:
/// - `InvalidCommand`: `INVALID_PARAMS` (-32602)
/// - `AdmissionDenied`, `MissingIdentity`: -32001
/// - `NoCapacity`: -32002
/// - `Engine`, `SeekRejected`: -32003
/// - `HandlerFault`, `Internal`: `INTERNAL_ERROR` (-32603)
///
/// `DuplicateSession` and `UnknownParticipant` are absorbed by the dispatcher and
/// never reach a client; they still map to a code so the table is total.
#[derive(Debug, Error)]
pub enum PcError {
    /// Command payload could not be decoded.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Authorization rule rejected the caller.
    #[error("Admission denied for caller: {0}")]
    AdmissionDenied(String),

    /// Connection carried no caller identity.
    #[error("Caller identity missing for participant: {0}")]
    MissingIdentity(String),

    /// No node had spare capacity.
    #[error("No media node has capacity (last tried: {uri})")]
    NoCapacity { uri: String },

    /// A live session already exists for the participant.
    #[error("Session already exists: {0}")]
    DuplicateSession(String),

    /// No session exists for the participant.
    #[error("Participant has no session: {0}")]
    UnknownParticipant(String),

    /// The engine refused a seek.
    #[error("Seek rejected: {0}")]
    SeekRejected(String),

    /// Media engine failure.
    #[error("Media engine error: {0}")]
    Engine(#[from] EngineError),

    /// A command handler panicked or was aborted.
    #[error("Command handler fault: {0}")]
    HandlerFault(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PcError {
    /// Returns the JSON-RPC error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i64 {
        match self {
            PcError::InvalidCommand(_) => INVALID_PARAMS,
            PcError::AdmissionDenied(_) | PcError::MissingIdentity(_) => ADMISSION_DENIED,
            PcError::NoCapacity { .. } => NO_CAPACITY,
            PcError::Engine(_) | PcError::SeekRejected(_) => ENGINE_FAILURE,
            PcError::DuplicateSession(_)
            | PcError::UnknownParticipant(_)
            | PcError::HandlerFault(_)
            | PcError::Internal(_) => INTERNAL_ERROR,
        }
    }

    /// Returns the message sent to the client. Internal details stay out,
    /// except for a handler fault, which carries the panic message.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            PcError::InvalidCommand(msg) => format!("Invalid command: {msg}"),
            PcError::AdmissionDenied(_) => "User cannot create a new session".to_string(),
            PcError::MissingIdentity(_) => "Not enough information".to_string(),
            PcError::NoCapacity { .. } => "No resources left to create new session".to_string(),
            PcError::Engine(e) => e.to_string(),
            PcError::SeekRejected(_) => "Seek failed".to_string(),
            PcError::DuplicateSession(_) => "Session already started".to_string(),
            PcError::UnknownParticipant(_) => "Session not found".to_string(),
            PcError::HandlerFault(msg) => msg.clone(),
            PcError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Build the JSON-RPC error member sent back to the client.
    #[must_use]
    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject::new(self.error_code(), self.client_message())
    }
}
