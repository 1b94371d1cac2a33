//! Error types for the protocol layer.
//!
//! Each crate in Oxygen defines its own error enum. When you see a
//! `ProtocolError`, you know the problem is in the bytes of a single
//! frame, not in the socket underneath it or the stream logic above it.

/// Errors that can occur while building or parsing a [`Message`](crate::Message).
///
/// `#[derive(thiserror::Error)]` generates the `std::error::Error` impl.
/// The `#[error("...")]` attribute on each variant is the text you see in
/// logs when the error is printed with `%err`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A read asked for more bytes than the message has left.
    ///
    /// Every typed read (`read_i32`, `read_string`, ...) is bounds-checked,
    /// so a short or corrupt frame surfaces here instead of reading past
    /// the end of the buffer.
    #[error("truncated message: needed {needed} bytes, {remaining} remaining")]
    TruncatedMessage { needed: usize, remaining: usize },

    /// A length prefix (string or byte blob) was negative.
    #[error("negative length prefix: {0}")]
    NegativeLength(i32),

    /// A string field did not contain valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// A raw frame's size field disagrees with the number of bytes present.
    #[error("frame size mismatch: header declares {declared} bytes, body has {actual}")]
    FrameSize { declared: usize, actual: usize },

    /// A stream received an opcode it does not understand in its current
    /// context.
    #[error("unexpected opcode {opcode} in {context}")]
    UnexpectedOpcode { context: &'static str, opcode: i32 },

    /// The message is well-formed bytes but violates a protocol rule,
    /// e.g. a reply that is neither `ACK` nor `NACK`.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
