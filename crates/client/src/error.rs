use janus_protocol::{DecodeError, ErrorMsg, Method};

/// Errors surfaced by the client.
///
/// Request-local failures (`Server`, `Timeout`, `Cancelled`, `Unexpected`)
/// only affect the caller that issued the request. Everything else ends the
/// connection when raised inside the background loops.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("transport closed")]
    TransportClosed,

    #[error("received a binary frame that is not valid UTF-8")]
    InvalidUtf8,

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// The gateway answered with an `error` message.
    #[error("gateway error {code}: {reason}")]
    Server { code: i64, reason: String },

    #[error("timeout waiting for response to '{method}'")]
    Timeout { method: Method },

    #[error("'{method}' request cancelled")]
    Cancelled { method: Method },

    #[error("unexpected '{kind}' response received to '{method}' request")]
    Unexpected { method: Method, kind: &'static str },

    #[error("'{method}' response did not carry a resource id")]
    MissingId { method: Method },

    /// A correlated reply arrived for a transaction this client never issued.
    #[error("received reply for unknown transaction '{0}'")]
    UnknownTransaction(String),

    #[error("transaction '{0}' is already registered")]
    DuplicateTransaction(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("session {0} is no longer available")]
    SessionGone(u64),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    /// Server-reported error code, if this is a gateway `error` reply.
    pub fn server_code(&self) -> Option<i64> {
        match self {
            Self::Server { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<ErrorMsg> for Error {
    fn from(msg: ErrorMsg) -> Self {
        Self::Server {
            code: msg.error.code,
            reason: msg.error.reason,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
