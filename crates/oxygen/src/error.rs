//! Unified error type for the Oxygen client.

use oxygen_delta::DeltaError;
use oxygen_protocol::ProtocolError;
use oxygen_transport::{StreamError, TransportError};

/// Top-level error that wraps all crate-specific errors.
///
/// Callers of the `oxygen` facade only deal with this one type; the
/// `#[from]` conversions let `?` lift sub-crate errors into it.
#[derive(Debug, thiserror::Error)]
pub enum OxygenError {
    /// The connection failed or is gone.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A delta payload could not be applied.
    #[error(transparent)]
    Codec(#[from] DeltaError),

    /// A stream or transfer failed.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A configuration file could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
