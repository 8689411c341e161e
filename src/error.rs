//! Error taxonomy shared by the ingestion path and the transfer benchmark.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A frame was decoded from a buffer of the wrong length.
    #[error("malformed frame: expected {expected} bytes, got {actual}")]
    MalformedFrame { expected: usize, actual: usize },

    /// Nothing arrived in the queue within the requested window.
    #[error("queue is empty")]
    Empty,

    /// A send or recv did not complete.
    #[error("transfer {iteration} failed: {reason}")]
    TransferFailure { iteration: usize, reason: String },

    /// Rejected before any I/O was attempted.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The peer closed the stream.
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("coordinator hand-off failed: {0}")]
    HandOff(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    pub fn transfer_failure(iteration: usize, reason: impl ToString) -> Self {
        Self::TransferFailure {
            iteration,
            reason: reason.to_string(),
        }
    }

    pub fn hand_off(reason: impl ToString) -> Self {
        Self::HandOff(reason.to_string())
    }

    /// Steady-state signals that callers are expected to absorb.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Empty | Self::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable() {
        assert!(Error::Empty.is_recoverable());
        assert!(Error::ConnectionClosed.is_recoverable());
        assert!(
            !Error::MalformedFrame {
                expected: 792,
                actual: 10
            }
            .is_recoverable()
        );
        assert!(!Error::configuration("n_iter must be positive").is_recoverable());
        assert!(!Error::transfer_failure(3, "reset").is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = Error::transfer_failure(4, "broken pipe");
        assert_eq!(err.to_string(), "transfer 4 failed: broken pipe");
        let err = Error::MalformedFrame {
            expected: 792,
            actual: 791,
        };
        assert!(err.to_string().contains("791"));
    }
}
