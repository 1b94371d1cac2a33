//! Error types for the transport layer and for streams running on it.

use oxygen_delta::DeltaError;
use oxygen_protocol::{ApplicationError, ProtocolError};

/// Errors that can occur on the connection itself.
///
/// Any of these means the link is gone or unusable. There is no automatic
/// reconnect: the caller builds a new [`Connection`](crate::Connection).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Resolving or connecting to the server failed.
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing a frame to the socket failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Reading a frame from the socket failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The connection was closed (by the peer or after a failure).
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// A peer announced a frame larger than the configured limit.
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    /// The connection was shut down locally.
    #[error("connection shut down")]
    Shutdown,
}

/// Errors that terminate a single stream.
///
/// A stream's [`on_message`](crate::StreamHandler::on_message) returns
/// one of these; dispatch then calls the stream's error hook and
/// unregisters it. Other subscribers and the connection are unaffected.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The stream received a malformed frame or an unknown opcode.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A delta payload could not be applied.
    #[error(transparent)]
    Codec(#[from] DeltaError),

    /// An UPDATE arrived for an object the client holds no snapshot of.
    ///
    /// The client's view is out of sync with the server. Applying the
    /// delta to anything else would corrupt the object silently.
    #[error("no snapshot for object {0}")]
    MissingSnapshot(i32),

    /// The server answered NACK. The request was understood and refused;
    /// the connection is fine.
    #[error(transparent)]
    Rejected(#[from] ApplicationError),

    /// The peer reported a failure (STATUS=ERROR or PROTOCOL_ERROR).
    #[error("{context} failed: {message}")]
    Remote {
        context: &'static str,
        message: String,
    },

    /// Local file I/O failed (transfer source or destination).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream could not send a follow-up frame.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A transfer ended before (or after) the announced size.
    #[error("transfer ended after {received} of {expected} bytes")]
    IncompleteTransfer { expected: u64, received: u64 },
}
