//! Error types for the socket transport.
//!
//! Every failure surfaced to callers falls into one of three categories,
//! available through [`Error::kind`]:
//!
//! - **InvalidArgument**: bad header, bad request target, wrongly shaped
//!   configuration. Raised synchronously, never recovered internally.
//! - **Runtime**: connection refused, TLS handshake failure, malformed
//!   response framing. The connection is closed on the way out.
//! - **Timeout**: tagged with the [`TimeoutPhase`] that exceeded its deadline.

use std::fmt;
use std::io;
use std::time::Duration;

/// The operation whose deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// TCP connect or TLS handshake.
    Connect,
    /// Waiting for response bytes.
    Read,
    /// Waiting for the socket to accept request bytes.
    Write,
}

impl TimeoutPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutPhase::Connect => "connect",
            TimeoutPhase::Read => "read",
            TimeoutPhase::Write => "write",
        }
    }
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    Runtime,
    Timeout,
}

/// Errors produced by the transport.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A header name or value failed validation.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// The request line could not be formed safely.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A configuration key has the wrong shape.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resolution or TCP connect failed.
    #[error("unable to connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    /// TLS material could not be loaded or the handshake failed.
    #[error("tls error: {0}")]
    Tls(String),

    /// The response violated HTTP/1.x framing.
    #[error("malformed response: {0}")]
    Protocol(String),

    /// The peer closed the connection before a complete response arrived.
    #[error("connection closed before complete response received")]
    ConnectionClosed,

    /// An operation needed a connection and none is open.
    #[error("not connected")]
    NotConnected,

    /// The socket kept accepting zero bytes.
    #[error("write stalled after {0} consecutive zero-byte writes")]
    WriteStalled(usize),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A deadline expired.
    #[error("{phase} timed out after {after:?}")]
    Timeout { phase: TimeoutPhase, after: Duration },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidHeader(_) | Error::InvalidRequest(_) | Error::InvalidConfig(_) => {
                ErrorKind::InvalidArgument
            }
            Error::Timeout { .. } => ErrorKind::Timeout,
            _ => ErrorKind::Runtime,
        }
    }

    /// The phase tag when this is a timeout.
    pub fn timeout_phase(&self) -> Option<TimeoutPhase> {
        match self {
            Error::Timeout { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    pub(crate) fn timeout(phase: TimeoutPhase, after: Duration) -> Self {
        Error::Timeout { phase, after }
    }
}

/// Whether an I/O error means a socket deadline expired.
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

pub type Result<T> = std::result::Result<T, Error>;
