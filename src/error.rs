//! Error types for chain connect attempts.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::ReplyCode;

/// Result type alias for sockschain operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Stage of a hop at which an attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolution,
    Connect,
    Negotiate,
    Auth,
    Request,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Resolution => "resolution",
            Phase::Connect => "connect",
            Phase::Negotiate => "negotiate",
            Phase::Auth => "auth",
            Phase::Request => "request",
        })
    }
}

/// Errors that can occur while building a tunnel.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller supplied an unusable chain or options
    #[error("configuration error: {0}")]
    Config(String),

    /// A name or credential field exceeds what the wire format can carry
    #[error("validation error: {0}")]
    Validation(String),

    /// DNS lookup failed or timed out
    #[error("failed to resolve {host}: {reason}")]
    Resolution { host: String, reason: String },

    /// Transport to a hop could not be opened
    #[error("failed to open transport: {0}")]
    Connect(#[source] io::Error),

    /// Proxy sent bytes that don't follow the protocol
    #[error("SOCKS5 protocol error: {0}")]
    Protocol(String),

    /// Proxy rejected the username/password
    #[error("proxy rejected credentials")]
    Auth,

    /// Proxy answered the connect request with a failure code
    #[error("proxy refused connect request: {0}")]
    ConnectReply(ReplyCode),

    /// Read or write on an open transport failed
    #[error("network error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connect attempt cancelled")]
    Cancelled,

    /// Handshake steps invoked out of order
    #[error("handshake step out of order: {0}")]
    InvalidState(&'static str),

    /// Failure attributed to a specific hop (1-based) and phase
    #[error("hop {hop} failed during {phase}: {source}")]
    Hop {
        hop: usize,
        phase: Phase,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Tag this error with the hop and phase it happened in.
    pub fn at_hop(self, hop: usize, phase: Phase) -> Self {
        match self {
            already @ Error::Hop { .. } => already,
            other => Error::Hop {
                hop,
                phase,
                source: Box::new(other),
            },
        }
    }

    /// The underlying failure with any hop tagging stripped.
    pub fn root(&self) -> &Error {
        match self {
            Error::Hop { source, .. } => source.root(),
            other => other,
        }
    }

    /// Hop index (1-based) the failure was attributed to, if any.
    pub fn hop(&self) -> Option<usize> {
        match self {
            Error::Hop { hop, .. } => Some(*hop),
            _ => None,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            Error::Hop { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Reply code of a refused connect request, if that's what this is.
    pub fn reply_code(&self) -> Option<ReplyCode> {
        match self.root() {
            Error::ConnectReply(code) => Some(*code),
            _ => None,
        }
    }

    /// Config and validation errors are the caller's fault.
    pub fn is_config(&self) -> bool {
        matches!(self.root(), Error::Config(_) | Error::Validation(_))
    }
}
