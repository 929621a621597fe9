//! Error types for the coordination crate.

use thiserror::Error;

/// Result type alias for coordination operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the coordination crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Message-level errors (structural validity, wire codec).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A calling collaborator violated a programming contract.
    ///
    /// These indicate a bug in the caller, not a transient condition, and
    /// are rejected at construction rather than recovered from.
    #[error("contract violation: {0}")]
    Contract(String),

    /// The requested operation is not valid in the current state.
    #[error("invalid in state {state}: {operation}")]
    InvalidState {
        state: &'static str,
        operation: &'static str,
    },

    /// Failure reported by the transport collaborator.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Structural message errors.
///
/// Raised at the validation boundary; a message failing these checks is
/// never dispatched to a state. Semantic failures (a Leader broadcast from
/// a host that is not the rightful leader) are not errors; the state
/// machine silently ignores them.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The source host id is missing or empty.
    #[error("message has no source host")]
    MissingSource,

    /// The channel id is missing or empty.
    #[error("message has no channel")]
    MissingChannel,

    /// A Leader or Identification payload carried an empty assignment.
    #[error("assignment payload is empty")]
    EmptyAssignments,

    /// Wire encoding failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Wire decoding failed.
    #[error("decode failed: {0}")]
    Decode(String),
}

impl From<bincode::Error> for ProtocolError {
    fn from(e: bincode::Error) -> Self {
        ProtocolError::Decode(e.to_string())
    }
}

impl Error {
    /// Shorthand for a contract violation.
    pub fn contract(msg: impl Into<String>) -> Self {
        Error::Contract(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_wraps_into_error() {
        let err: Error = ProtocolError::MissingSource.into();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(err.to_string().contains("no source"));
    }

    #[test]
    fn test_contract_shorthand() {
        let err = Error::contract("live host list is empty");
        assert!(err.to_string().contains("live host list"));
    }
}
