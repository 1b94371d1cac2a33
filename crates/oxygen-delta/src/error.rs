/// Errors that can occur while decoding a delta payload.
///
/// Encoding never fails: inputs that do not fit the 16-bit block format
/// fall back to literal blocks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeltaError {
    /// The payload ended in the middle of a block.
    #[error("delta payload truncated at byte {offset}")]
    Truncated { offset: usize },

    /// A block header carried a flag that is neither literal nor delta.
    #[error("unknown delta block flag {0}")]
    UnknownBlock(u8),

    /// A delta block does not cover exactly the base snapshot.
    ///
    /// This is what a stale or mismatched snapshot looks like from the
    /// codec's side. Applying the block anyway would produce corrupt state.
    #[error("delta block covers {actual} bytes but the base snapshot has {expected}")]
    DeltaLength { expected: usize, actual: usize },

    /// Run-length pairs expanded past the length declared by their block.
    #[error("run-length pairs expand to {0} bytes, past the end of their block")]
    BlockTooLong(usize),
}
