use std::io;
use thiserror::Error;

use crate::protocol::MessageKind;

/// Custom error types for the time protocol
#[derive(Error, Debug)]
pub enum Error {
    /// Datagram too short or carrying an unknown kind tag
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A well-formed message arrived on a channel that does not carry its kind
    #[error("Unexpected {kind} message on {channel} channel")]
    UnexpectedKind {
        /// Channel the message arrived on
        channel: &'static str,
        /// Kind that was received
        kind: MessageKind,
    },

    /// Correlation miss between a reply and the pending exchange
    #[error("Exchange id mismatch: expected {expected:?}, received {received}")]
    IdMismatch {
        /// Pending exchange id, if any
        expected: Option<u64>,
        /// Exchange id carried by the message
        received: u64,
    },

    #[error("Transport failure: {0}")]
    Transport(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new malformed message error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedMessage(msg.into())
    }

    /// Creates a new unexpected kind error
    pub fn unexpected_kind(channel: &'static str, kind: MessageKind) -> Self {
        Error::UnexpectedKind { channel, kind }
    }

    /// Creates a new id mismatch error
    pub fn id_mismatch(expected: Option<u64>, received: u64) -> Self {
        Error::IdMismatch { expected, received }
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Whether this error ends the loop that encountered it
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::malformed("short buffer");
        assert!(matches!(err, Error::MalformedMessage(_)));
        assert_eq!(err.to_string(), "Malformed message: short buffer");

        let err = Error::unexpected_kind("delay", MessageKind::Sync);
        assert_eq!(err.to_string(), "Unexpected SYNC message on delay channel");

        let err = Error::id_mismatch(Some(3), 4);
        assert_eq!(err.to_string(), "Exchange id mismatch: expected Some(3), received 4");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Transport(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_only_transport_is_fatal() {
        assert!(!Error::malformed("x").is_fatal());
        assert!(!Error::id_mismatch(None, 1).is_fatal());
        assert!(!Error::unexpected_kind("sync", MessageKind::DelayRequest).is_fatal());
        assert!(!Error::config("x").is_fatal());
    }
}
