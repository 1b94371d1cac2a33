//! Constants and opcodes that appear on the wire.
//!
//! A frame looks like this (all integers little-endian):
//!
//! ```text
//! ┌──────────┬──────────────────┬──────────┬─────────────┬──────────────────┐
//! │ size: 4  │ correlation id: 4│ node:str │ message:str │ opcode payload   │
//! └──────────┴──────────────────┴──────────┴─────────────┴──────────────────┘
//!   size = total frame length − 8         str = [len: 4][raw bytes]
//! ```
//!
//! Streams put an `i32` opcode at the start of their payload. Each stream
//! kind has its own opcode table, so the same number means different
//! things depending on which stream it arrives on.

use std::time::Duration;

/// Bytes in the fixed frame header: the size field plus the correlation id.
pub const HEADER_LEN: usize = 8;

/// Correlation id carried by a message that has not been assigned one yet.
pub const UNSET_ID: i32 = -1;

/// TCP port the Oxygen server listens on by default.
pub const DEFAULT_PORT: u16 = 9888;

/// How often the client sends a keep-alive frame.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Node name of the keep-alive frame. The message name is empty and no
/// response is expected.
pub const HEARTBEAT_NODE: &str = "HEARTBEAT";

/// Bytes per DATA frame in the chunked transfer sub-protocol.
pub const CHUNK_SIZE: usize = 1024;

/// Opcodes of the object replication stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ObjectOp {
    New = 0,
    Update = 1,
    Delete = 2,
    End = 255,
}

impl ObjectOp {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::New),
            1 => Some(Self::Update),
            2 => Some(Self::Delete),
            255 => Some(Self::End),
            _ => None,
        }
    }
}

/// Opcodes of the chunked transfer sub-protocol (uploads and downloads).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TransferOp {
    /// Optional `{name, checksum}` sent by the server before TRANSFER.
    Metadata = 0,
    Transfer = 1,
    Data = 2,
    ProtocolError = 3,
    Open = 4,
    Status = 244,
    End = 255,
}

impl TransferOp {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Metadata),
            1 => Some(Self::Transfer),
            2 => Some(Self::Data),
            3 => Some(Self::ProtocolError),
            4 => Some(Self::Open),
            244 => Some(Self::Status),
            255 => Some(Self::End),
            _ => None,
        }
    }
}

/// Value carried by a `TransferOp::Status` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TransferStatus {
    Ok = 0,
    Error = 1,
}

impl TransferStatus {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Ok),
            1 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Opcodes of the level event (presence) stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum EventOp {
    UserConnected = 0,
    UserDisconnected = 1,
    UserCursorMoved = 2,
    End = 255,
}

impl EventOp {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::UserConnected),
            1 => Some(Self::UserDisconnected),
            2 => Some(Self::UserCursorMoved),
            255 => Some(Self::End),
            _ => None,
        }
    }
}

/// Opcodes of the plugin notification stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum PluginOp {
    TaskStarted = 0,
    TaskCompleted = 1,
    StreamEnded = 255,
}

impl PluginOp {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::TaskStarted),
            1 => Some(Self::TaskCompleted),
            255 => Some(Self::StreamEnded),
            _ => None,
        }
    }
}
