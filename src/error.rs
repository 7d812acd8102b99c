//! Error taxonomy for the session SDK.

use thiserror::Error;

use crate::session::SessionState;

/// Errors surfaced by the public session API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SdkError {
    /// Missing or invalid configuration. Fatal to `init`, recoverable by re-`init`.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation is illegal in the current lifecycle state.
    #[error("Invalid state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// Any use of the session after `destroy`.
    #[error("Session has been destroyed")]
    Destroyed,

    /// A batch could not be delivered within the retry budget.
    #[error("Delivery failed after {attempts} attempt(s): {last_error}")]
    Delivery { attempts: u32, last_error: String },

    /// The host cannot provide something recording needs (runtime, producer).
    #[error("Capability unavailable: {0}")]
    Capability(String),
}

pub type Result<T> = std::result::Result<T, SdkError>;
