use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AseError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket connect failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("WebSocket transport error: {0}")]
    Transport(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The connection outlived its configured lifetime cap.
    #[error("connection deadlined")]
    ConnectionDeadlined,

    #[error("connection closed: {0}")]
    ConnectionClosed(CloseReason),

    #[error("header.status is required")]
    MissingStatus,

    /// The stream stopped accepting frames before the producer finished.
    #[error("stream is no longer accepting frames")]
    StreamEnded,

    #[error("response handler failed: {0}")]
    Handler(#[source] anyhow::Error),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("http_code: {status}, http_msg: {reason}, body: {body}")]
    UnexpectedStatus {
        status: u16,
        reason: String,
        body: String,
    },

    #[error("service error {code}: {message} (sid: {sid})")]
    Service {
        code: i32,
        message: String,
        sid: String,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::core::config::ConfigError),

    #[error("stream task failed: {0}")]
    Task(String),
}

impl AseError {
    /// Whether the error came from the connection lifetime cap rather than the network.
    pub fn is_deadlined(&self) -> bool {
        matches!(
            self,
            Self::ConnectionDeadlined | Self::ConnectionClosed(CloseReason::Deadlined)
        )
    }
}

/// Outcome of the one-shot WebSocket handshake.
///
/// Cloneable so that every caller blocked on the connect gate observes the
/// same cached failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("http_code: {status}, http_msg: {reason}, body: {body}")]
    Handshake {
        status: u16,
        reason: String,
        body: String,
    },

    #[error("dial failed: {0}")]
    Dial(String),

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("client was closed before connecting")]
    Closed,
}

/// Why a connection was torn down. Recorded once; every later operation
/// on the connection reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The server sent a `LastFrame` response.
    Completed,
    /// The caller closed the client.
    Requested,
    Failed(String),
    Deadlined,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "stream already completed by server"),
            Self::Requested => write!(f, "closed by caller"),
            Self::Failed(cause) => write!(f, "closed after failure: {}", cause),
            Self::Deadlined => write!(f, "connection lifetime elapsed"),
        }
    }
}
