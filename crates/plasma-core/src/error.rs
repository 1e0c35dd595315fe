//! Error types for Plasma.
//!
//! Application-level errors become an `e.*` reply and the peer loop keeps
//! going. Only transport, handshake and internal failures end a session.

use thiserror::Error;

/// Core error type for Plasma operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Packet could not be parsed or its `type` is malformed.
    #[error("parse error: {0}")]
    Parse(String),

    /// A frame grew past the byte ceiling before it could be parsed.
    #[error("transport overflow: got {size}b, limit is {limit}b")]
    TransportOverflow {
        /// Bytes accumulated for the offending frame.
        size: usize,
        /// Ceiling in effect when the frame was rejected.
        limit: usize,
    },

    /// Chat message longer than the configured character limit.
    #[error("message exceeds {limit} characters")]
    ContentOverflow {
        /// Configured character limit.
        limit: usize,
    },

    /// A required field is absent or empty.
    #[error("missing field: {0}")]
    MissingField(String),

    /// A field is present but unacceptable.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Another authenticated peer already uses this name.
    #[error("name already taken")]
    NameConflict,

    /// Request is not valid in the current peer state.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Key exchange failed or timed out.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Cryptographic operation failed.
    /// Details are intentionally vague to prevent oracle attacks.
    #[error("cryptographic operation failed")]
    Crypto(String),

    /// Connection-level I/O error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Remote side closed the connection.
    #[error("connection closed")]
    Disconnected,

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),

    /// Encoding/decoding error.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Unexpected internal failure while serving a request.
    #[error("server error: {0}")]
    Server(String),
}

/// Result type alias using Plasma's Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error ends the session it occurred on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Disconnected | Error::Handshake(_) | Error::Server(_)
        )
    }

    /// Bytes past the ceiling, for a transport overflow.
    pub fn excess(&self) -> Option<usize> {
        match self {
            Error::TransportOverflow { size, limit } => Some(size.saturating_sub(*limit)),
            _ => None,
        }
    }

    /// Reply type a server sends for this error, if any.
    pub fn reply_kind(&self) -> Option<&'static str> {
        use crate::protocol::kind;

        let kind = match self {
            Error::Parse(_) => kind::ERR_PARSE,
            Error::TransportOverflow { .. } | Error::ContentOverflow { .. } => kind::ERR_OVERFLOW,
            Error::MissingField(_) => kind::ERR_MISSING,
            Error::InvalidInput(_) => kind::ERR_INVALID,
            Error::NameConflict => kind::ERR_TAKEN,
            Error::ProtocolViolation(_) => kind::ERR_UNEXPECTED,
            Error::NotFound(_) => kind::DOWNLOAD_INVALID_ID,
            Error::Crypto(_) => kind::ERR_SSL,
            Error::Server(_) | Error::Encoding(_) => kind::ERR_SERVER,
            Error::Handshake(_) | Error::Transport(_) | Error::Disconnected | Error::Config(_) => {
                return None
            }
        };
        Some(kind)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Encoding(e.to_string())
    }
}
