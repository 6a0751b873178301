//! Orchestrator Errors

use thiserror::Error;

use crate::core::settings::ValidationError;
use crate::network::transport::TransportError;
use crate::session::state::OrchestratorState;

/// Errors returned by orchestrator commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    /// Configuration rejected before any transport call.
    #[error("Invalid session configuration: {0}")]
    Validation(#[from] ValidationError),

    /// Create/join issued while not idle.
    #[error("Already in a session")]
    AlreadyInSession,

    /// The local connection object could not be constructed.
    #[error("Could not create connection: {0}")]
    TransportCreate(String),

    /// The transport reported a connect or shutdown failure.
    #[error("Connection failed: {0}")]
    TransportResult(String),

    /// The browse connection could not be established.
    #[error("Session directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// Only the session authority may do this.
    #[error("Only the session host can do that")]
    NotAuthority,

    /// No active session connection.
    #[error("No active session")]
    NoActiveSession,

    /// Not allowed in the current state.
    #[error("Not allowed while {0}")]
    InvalidState(OrchestratorState),

    /// The orchestrator service task has stopped.
    #[error("Orchestrator service stopped")]
    ServiceStopped,
}

impl From<TransportError> for OrchestratorError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Create(reason) => Self::TransportCreate(reason),
            TransportError::Remote(reason) => Self::TransportResult(reason),
        }
    }
}
