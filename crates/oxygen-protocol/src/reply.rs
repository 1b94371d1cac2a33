//! The ACK/NACK convention used by simple (non-streaming) requests.
//!
//! A reply's payload starts with the string `"ACK"` or `"NACK"`. A NACK
//! carries `(code: i32, text: string)` after it. Anything that follows an
//! ACK is request-specific (e.g. the asset list).
//!
//! A NACK is not a failure of the protocol. The server understood the
//! request and said no. That is why [`ApplicationError`] is handed to the
//! caller as data instead of travelling through the transport error path.

use crate::{Message, ProtocolError};

pub const ACK: &str = "ACK";
pub const NACK: &str = "NACK";

/// A peer-issued rejection: error code plus human-readable text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("request rejected ({code}): {text}")]
pub struct ApplicationError {
    pub code: i32,
    pub text: String,
}

impl ApplicationError {
    pub fn new(code: i32, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }
}

/// The leading status of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Nack(ApplicationError),
}

impl Reply {
    /// Reads the status (and NACK details) from the front of a reply.
    ///
    /// On `Ack` the cursor is left on the first request-specific field.
    pub fn read(msg: &mut Message) -> Result<Self, ProtocolError> {
        let status = msg.read_string()?;
        match status.as_str() {
            ACK => Ok(Self::Ack),
            NACK => {
                let code = msg.read_i32()?;
                let text = msg.read_string()?;
                Ok(Self::Nack(ApplicationError { code, text }))
            }
            other => Err(ProtocolError::InvalidMessage(format!(
                "expected ACK or NACK, got {other:?}"
            ))),
        }
    }

    /// Writes this reply into `msg`. Servers and test peers use it.
    pub fn write(&self, msg: &mut Message) {
        match self {
            Self::Ack => {
                msg.write_string(ACK);
            }
            Self::Nack(err) => {
                msg.write_string(NACK)
                    .write_i32(err.code)
                    .write_string(&err.text);
            }
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    pub fn into_result(self) -> Result<(), ApplicationError> {
        match self {
            Self::Ack => Ok(()),
            Self::Nack(err) => Err(err),
        }
    }
}
