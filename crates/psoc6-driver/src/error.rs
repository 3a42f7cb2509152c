//! Error types for the dual-core runtime

use thiserror::Error;

use crate::ipc::Direction;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors that can occur while moving images between the cores
#[derive(Debug, Error)]
pub enum DriverError {
    /// A send was attempted while the previous message is unreleased
    #[error("Pipe slot {direction} busy: previous message not yet released")]
    SlotBusy {
        /// Direction whose slot is occupied
        direction: Direction,
    },

    /// The other end of the pipe has gone away
    #[error("Peer disconnected on {direction}")]
    PeerDisconnected {
        /// Direction that lost its peer
        direction: Direction,
    },

    /// Operation not valid in the current state
    #[error("Invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// A simulated core stopped unexpectedly
    #[error("{core} fault: {reason}")]
    CoreFault {
        /// Core name
        core: &'static str,
        /// Reason for failure
        reason: String,
    },

    /// Model or image error
    #[error(transparent)]
    Model(#[from] psoc6_models::ModelError),

    /// I/O error on the console or an image source
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl DriverError {
    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create a core fault error
    pub fn core_fault(core: &'static str, reason: impl Into<String>) -> Self {
        Self::CoreFault {
            core,
            reason: reason.into(),
        }
    }
}
