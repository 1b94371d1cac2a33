//! Chunked file transfer.
//!
//! Downloads and uploads share one sub-protocol, spoken on a stream
//! subscriber. A download looks like this:
//!
//! ```text
//! client                         server
//!   │── OPEN(name [, checksum]) ──►│
//!   │◄──────── STATUS(OK) ─────────│   or STATUS(ERROR, text): done
//!   │◄─── METADATA(name, sum) ─────│   optional
//!   │◄─ TRANSFER(name, size, C) ───│
//!   │◄──────── DATA(bytes) ────────│   ⌈size / C⌉ times
//!   │◄─────────── END ─────────────│
//! ```
//!
//! An upload is the mirror image: after the server's STATUS(OK) the
//! client sends TRANSFER, the DATA frames, and END. PROTOCOL_ERROR(text)
//! may arrive at any point and fails the transfer.
//!
//! Each stream object runs one transfer at a time. Starting another
//! while one is in flight is a no-op that returns `false`.

mod download;
mod upload;

pub use download::DownloadStream;
pub use upload::UploadStream;

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use oxygen_protocol::wire::CHUNK_SIZE;
use oxygen_protocol::{Message, ProtocolError, TransferStatus};
use oxygen_transport::StreamError;
use serde::{Deserialize, Serialize};

/// Where a transfer is in its lifecycle.
///
/// ```text
/// Idle → AwaitingOpenAck → Transferring → Done
///              │                │
///              └──────► Error ◄─┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    #[default]
    Idle,
    AwaitingOpenAck,
    Transferring,
    Done,
    Error,
}

impl TransferState {
    /// True while a transfer occupies the stream.
    pub fn is_active(self) -> bool {
        matches!(self, Self::AwaitingOpenAck | Self::Transferring)
    }
}

/// A snapshot of a stream's current (or last) transfer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransferProgress {
    pub state: TransferState,
    pub file_name: String,
    /// Announced size in bytes. Zero until known.
    pub total_size: u64,
    pub bytes_moved: u64,
}

/// What a finished transfer produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub file_name: String,
    pub path: PathBuf,
    pub bytes: u64,
    /// Checksum from the server's METADATA frame, if it sent one.
    pub checksum: Option<String>,
}

/// Fired exactly once per transfer, on success or on failure.
pub type TransferCallback = Box<dyn FnOnce(Result<TransferOutcome, StreamError>) + Send>;

/// Transfer tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes per DATA frame on upload.
    pub chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
        }
    }
}

type Progress = Arc<Mutex<TransferProgress>>;

/// Joins `name` onto `dir`, refusing anything that would leave `dir`.
fn resolve(dir: &Path, name: &str) -> Result<PathBuf, StreamError> {
    let relative = Path::new(name);
    let plain = !name.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !plain {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("transfer name {name:?} is not a plain relative path"),
        )
        .into());
    }
    Ok(dir.join(relative))
}

/// Reads a STATUS payload. `Err(Remote)` carries the server's text.
fn read_status(msg: &mut Message, context: &'static str) -> Result<(), StreamError> {
    let status = msg.read_i32()?;
    match TransferStatus::from_i32(status) {
        Some(TransferStatus::Ok) => Ok(()),
        Some(TransferStatus::Error) => Err(StreamError::Remote {
            context,
            message: msg.read_string()?,
        }),
        None => Err(ProtocolError::InvalidMessage(format!("unknown transfer status {status}")).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_plain_name_joins_dir() {
        let path = resolve(Path::new("/assets"), "maps/level1.bin").unwrap();
        assert_eq!(path, PathBuf::from("/assets/maps/level1.bin"));
    }

    #[test]
    fn test_resolve_rejects_escape() {
        assert!(resolve(Path::new("/assets"), "../secret").is_err());
        assert!(resolve(Path::new("/assets"), "/etc/passwd").is_err());
        assert!(resolve(Path::new("/assets"), "").is_err());
    }

    #[test]
    fn test_read_status_error_carries_text() {
        let mut msg = Message::new("", "");
        msg.write_i32(TransferStatus::Error as i32).write_string("no such file");
        match read_status(&mut msg, "download") {
            Err(StreamError::Remote { context, message }) => {
                assert_eq!(context, "download");
                assert_eq!(message, "no such file");
            }
            other => panic!("expected Remote, got {other:?}"),
        }
    }

    #[test]
    fn test_transfer_state_is_active() {
        assert!(!TransferState::Idle.is_active());
        assert!(TransferState::AwaitingOpenAck.is_active());
        assert!(TransferState::Transferring.is_active());
        assert!(!TransferState::Done.is_active());
        assert!(!TransferState::Error.is_active());
    }

    #[test]
    fn test_transfer_config_default_chunk() {
        assert_eq!(TransferConfig::default().chunk_size, 1024);
    }
}
