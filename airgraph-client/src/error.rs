use thiserror::Error;

use crate::classify::{classify, ErrorCategory};
use crate::protocol::{RequestId, ResponseStatus, StatusAttributes};

/// Connection-level failures. Fatal to whatever is using the connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("authentication rejected with status {code}: {message}")]
    Authentication { code: u16, message: String },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("websocket connection to {endpoint} failed: {source}")]
    WebSocket {
        endpoint: String,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
    #[error("connection lost: {0}")]
    Lost(String),
    #[error("connection closed")]
    Closed,
}

/// A terminal frame that reported failure.
#[derive(Debug, Clone, Error)]
#[error("request {request_id} failed with status {status_code} ({category}): {message}")]
pub struct ProtocolError {
    pub request_id: RequestId,
    pub status_code: u16,
    pub vendor_status_code: Option<i64>,
    pub message: String,
    pub attributes: StatusAttributes,
    pub category: ErrorCategory,
}

impl ProtocolError {
    pub fn from_status(request_id: RequestId, status: ResponseStatus) -> Self {
        let vendor_status_code = status.vendor_status_code();
        Self {
            request_id,
            status_code: status.code,
            vendor_status_code,
            category: classify(status.code, vendor_status_code),
            message: status.message,
            attributes: status.attributes,
        }
    }
}

/// Failure delivered through a result handle.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The connection failed or was closed before the request resolved.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The request could not be encoded; the connection is unaffected.
    #[error("failed to encode request: {0}")]
    Encode(String),
}

impl QueryError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            QueryError::Protocol(err) => err.category,
            QueryError::Transport(_) | QueryError::Encode(_) => ErrorCategory::Unknown,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, QueryError::Transport(_))
    }

    pub fn status_attributes(&self) -> Option<&StatusAttributes> {
        match self {
            QueryError::Protocol(err) => Some(&err.attributes),
            QueryError::Transport(_) | QueryError::Encode(_) => None,
        }
    }
}

impl From<TransportError> for QueryError {
    fn from(err: TransportError) -> Self {
        QueryError::Transport(err.to_string())
    }
}

/// An input record that cannot be turned into a query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed record: {reason}")]
pub struct MalformedRecord {
    pub reason: String,
}

impl MalformedRecord {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(format!("missing required field '{field}'"))
    }
}
