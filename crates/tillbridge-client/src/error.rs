use std::sync::Arc;
use thiserror::Error;
use tillbridge_protocol::{CodecError, Frame};

/// Errors surfaced by the bridge client.
///
/// `Clone` so one failed connect attempt can be reported to every caller
/// waiting on it.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// A command was issued with no connection up.
    #[error("Not connected to bridge")]
    NotConnected,

    /// The handshake did not finish within `connect_timeout`.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },

    /// The link dropped, or the client disconnected, while this was pending.
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("Payment collection already in progress")]
    CollectionInProgress,

    /// No settling event arrived before the collection deadline.
    #[error("Payment collection timed out after {timeout_ms}ms")]
    CollectionTimeout { timeout_ms: u64 },

    #[error("No receipt for {receipt_id} after {timeout_ms}ms")]
    ReceiptTimeout { receipt_id: String, timeout_ms: u64 },

    /// The bridge answered with an `ERROR` frame.
    #[error("Bridge error: {message}")]
    StompProtocol {
        message: String,
        detail: Option<String>,
    },

    /// Bad frame or payload from the bridge.
    #[error("Protocol error: {0}")]
    Protocol(#[from] tillbridge_core::Error),

    /// A command payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Socket failure. Wrapped in `Arc` to keep the enum `Clone`.
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
}

impl ClientError {
    /// Shorthand for [`ClientError::ConnectionLost`].
    ///
    /// ```
    /// use tillbridge_client::ClientError;
    ///
    /// let error = ClientError::connection_lost("bridge closed the connection");
    /// assert!(error.is_connection_lost());
    /// assert_eq!(error.to_string(), "Connection lost: bridge closed the connection");
    /// ```
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            reason: reason.into(),
        }
    }

    /// Build a [`ClientError::StompProtocol`] from an `ERROR` frame.
    ///
    /// The `message` header wins; the body is kept as `detail` unless it
    /// only repeats the message.
    pub fn from_error_frame(frame: &Frame) -> Self {
        let message = frame.error_message();
        let detail = frame
            .body_str()
            .map(str::trim)
            .filter(|body| !body.is_empty() && *body != message)
            .map(str::to_string);
        Self::StompProtocol { message, detail }
    }

    /// Whether this is [`ClientError::ConnectionLost`].
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<CodecError> for ClientError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(e) => e.into(),
            CodecError::Protocol(e) => e.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
