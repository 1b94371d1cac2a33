//! Wire protocol for Oxygen.
//!
//! This crate defines the bytes that travel between the client and the
//! Oxygen server:
//!
//! - **Message** ([`Message`]): one length-prefixed frame with a
//!   correlation id, a `node/message` address, and typed little-endian
//!   fields.
//! - **Wire constants** ([`wire`]): header size, default port, heartbeat
//!   interval, and the opcode tables of every stream kind.
//! - **Replies** ([`Reply`], [`ApplicationError`]): the ACK/NACK convention
//!   of simple requests.
//! - **Errors** ([`ProtocolError`]): what can go wrong reading a frame.
//!
//! # Architecture
//!
//! The protocol layer knows nothing about sockets or subscribers. It only
//! turns fields into bytes and bytes back into fields.
//!
//! ```text
//! Transport (frames) → Protocol (Message) → Streams (opcodes, state)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod error;
mod message;
mod reply;
pub mod wire;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use error::ProtocolError;
pub use message::{Message, parse_header};
pub use reply::{ACK, ApplicationError, NACK, Reply};
pub use wire::{
    EventOp, HEADER_LEN, ObjectOp, PluginOp, TransferOp, TransferStatus,
    UNSET_ID,
};
