//! Error types for the channel engine.

use protocol::{ProtocolError, SessionState};
use thiserror::Error;

use crate::config::ConfigError;

/// Channel error type.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The operation is not allowed in the current session state.
    #[error("cannot {operation} in the '{state}' state")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// A required value was not provided.
    #[error("missing required argument: {0}")]
    MissingArgument(&'static str),

    /// The transport failed or is closed.
    #[error("transport error: {0}")]
    Transport(#[from] ProtocolError),

    /// A negotiation step could not be processed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl ChannelError {
    pub(crate) fn invalid_state(operation: &'static str, state: SessionState) -> Self {
        ChannelError::InvalidState { operation, state }
    }

    /// Returns whether this is a precondition violation.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ChannelError::InvalidState { .. } | ChannelError::MissingArgument(_)
        )
    }
}

/// Result type alias for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
