//! Delta compression for replicated object snapshots.
//!
//! [`encode`] turns an `(old, new)` pair into a short sequence of blocks:
//! literal byte runs and run-length encoded subtraction diffs. [`decode`]
//! applies those blocks to `old` to rebuild `new`. Object replication uses
//! the pair in both directions: the server sends deltas against the
//! client's last snapshot, and the client sends deltas for its own edits.
//!
//! This is not a general-purpose compressor. It wins only when the two
//! buffers are mostly identical.

mod block;
mod codec;
mod error;

pub use block::{BLOCK_HEADER_LEN, DeltaBlock, MAX_BLOCK_LEN, Run, parse};
pub use codec::{decode, encode};
pub use error::DeltaError;
