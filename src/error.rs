//! Failure taxonomy for the AT driver.
//!
//! Retry loops are the only recovery sites in the crate; once a retry budget
//! is exhausted, the structured error propagates unchanged to the caller.

use std::io;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong between the caller and the modem.
#[derive(Debug, Error)]
pub enum Error {
    /// A bounded retry budget ran out: network time, signal strength,
    /// session attempts, or blank-line re-reads.
    #[error("{query} timed out after {attempts} attempts")]
    Timeout {
        query: &'static str,
        attempts: u32,
    },

    /// A response line did not match the expected literal.
    #[error("expected response {expected:?}, got {actual:?} instead")]
    ExpectationFailure { expected: String, actual: String },

    /// A prefix-matched data response was absent where required.
    #[error("{context}: unexpected response {response:?}")]
    DeviceError {
        context: &'static str,
        response: String,
    },

    /// The MT payload length disagreed with the length reported by the
    /// session that fetched it.
    #[error("incorrect content length, expected {expected} bytes, content {content:?}")]
    IncorrectContentLength { expected: usize, content: String },

    /// The MO payload exceeds what `+SBDWT` text mode accepts. Nothing was
    /// written to the wire.
    #[error("message too long, {len} bytes exceeds the 340-byte send limit")]
    MessageTooLong { len: usize },

    /// Underlying serial I/O failed.
    #[error("transport I/O failed")]
    Transport(#[from] io::Error),

    /// The message log could not be opened or appended. Kept apart from
    /// [`Error::Transport`] so a full disk is not mistaken for a dead
    /// serial link.
    #[error("message log I/O failed")]
    Log(#[source] io::Error),
}
