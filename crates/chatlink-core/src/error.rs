use thiserror::Error;

/// Why a connection attempt or an established session failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionFailure {
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out waiting for the broker")]
    Timeout,

    #[error("no heartbeat received within {window_ms}ms")]
    HeartbeatTimeout { window_ms: u64 },

    #[error("broker error: {0}")]
    Broker(String),

    #[error("socket closed (code {code}): {reason}")]
    Closed { code: u16, reason: String },

    #[error("gave up after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("connection attempt superseded by disconnect")]
    Superseded,
}

/// Errors produced by the chatlink client layer.
///
/// `Clone` so that a single connect outcome can be handed to every caller
/// that joined the same in-flight attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("connection error: {0}")]
    Connection(ConnectionFailure),

    #[error("not connected")]
    NotConnected,

    #[error("malformed payload on {destination}: {reason}")]
    MalformedPayload { destination: String, reason: String },

    #[error("retrieval error: {0}")]
    Retrieval(String),

    #[error("frame error: {0}")]
    Frame(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("config error: {0}")]
    Config(String),
}

impl ChatError {
    /// Shorthand for a transport-level connection error.
    pub fn transport(reason: impl Into<String>) -> Self {
        ChatError::Connection(ConnectionFailure::Transport(reason.into()))
    }

    /// True for errors the connection manager treats as a lost connection.
    pub fn is_connection(&self) -> bool {
        matches!(self, ChatError::Connection(_))
    }
}

impl From<ConnectionFailure> for ChatError {
    fn from(f: ConnectionFailure) -> Self {
        ChatError::Connection(f)
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Codec(e.to_string())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
