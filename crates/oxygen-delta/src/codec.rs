//! `encode` and `decode`.
//!
//! The codec is tuned for one job: successive snapshots of the same
//! replicated object, where a small edit (one tile of a tilemap) leaves
//! almost every byte unchanged. For equal-length snapshots the diff is
//! mostly zeros, and run-length encoding squeezes those runs to three
//! bytes each.
//!
//! Both directions use the same convention, in wrapping 8-bit arithmetic:
//!
//! ```text
//! diff[i] = old[i] - new[i]        (encode)
//! new[i]  = old[i] - diff[i]       (decode)
//! ```

use crate::DeltaError;
use crate::block::{self, DeltaBlock, MAX_BLOCK_LEN, Run};

/// Computes the delta that turns `old` into `new`.
///
/// - `old` longer than `new`, or empty: `new` is sent literally.
/// - `new` longer than `old`: if `old` appears inside `new` at offset `k`,
///   the result is a literal prefix, a delta over `new[k..k + old.len()]`,
///   and a literal tail. Otherwise `new` is sent literally.
/// - equal lengths: one delta block over the whole buffer.
///
/// A delta region longer than a block can describe is sent literally.
///
/// ## Example
///
/// ```rust
/// let old = [0u8, 0, 0, 0];
/// let new = [1u8, 0, 0, 0];
/// let delta = oxygen_delta::encode(&old, &new);
/// assert_eq!(oxygen_delta::decode(&old, &delta).unwrap(), new);
/// ```
pub fn encode(old: &[u8], new: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();

    if old.is_empty() || old.len() > new.len() || old.len() > MAX_BLOCK_LEN {
        literal(&mut out, new);
    } else if old.len() == new.len() {
        delta(&mut out, old, new);
    } else {
        match find_sub_array(new, old) {
            Some(k) => {
                let end = k + old.len();
                literal(&mut out, &new[..k]);
                delta(&mut out, old, &new[k..end]);
                literal(&mut out, &new[end..]);
            }
            None => literal(&mut out, new),
        }
    }

    tracing::trace!(
        old = old.len(),
        new = new.len(),
        delta = out.len(),
        "encoded delta"
    );
    out
}

/// Rebuilds the new buffer from `old` and a payload produced by [`encode`].
///
/// # Errors
///
/// Malformed payloads fail with `Truncated`, `UnknownBlock`, or
/// `BlockTooLong`. A delta block whose length is not exactly `old.len()`
/// fails with `DeltaLength`: the payload was computed against a
/// different snapshot. So does a second delta block, since the base can
/// only be consumed once.
pub fn decode(old: &[u8], delta: &[u8]) -> Result<Vec<u8>, DeltaError> {
    let mut out = Vec::with_capacity(old.len());
    let mut consumed = 0;

    for block in block::parse(delta)? {
        match block {
            DeltaBlock::Uncompressed { bytes, .. } => out.extend_from_slice(&bytes),
            DeltaBlock::DeltaRunLength { length, runs, .. } => {
                let available = old.len() - consumed;
                if length != available {
                    return Err(DeltaError::DeltaLength {
                        expected: available,
                        actual: length,
                    });
                }
                consumed += length;
                let mut base = old.iter();
                for run in runs {
                    for (_, prev) in (0..run.count).zip(base.by_ref()) {
                        out.push(prev.wrapping_sub(run.value));
                    }
                }
            }
        }
    }

    Ok(out)
}

/// Position of the first occurrence of `needle` inside `haystack`.
fn find_sub_array(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Emits `bytes` as literal blocks, split at the block size limit.
fn literal(out: &mut Vec<u8>, bytes: &[u8]) {
    for chunk in bytes.chunks(MAX_BLOCK_LEN) {
        block::write_literal(out, chunk);
    }
}

/// Emits one delta block turning `old` into `new` (same length).
fn delta(out: &mut Vec<u8>, old: &[u8], new: &[u8]) {
    let mut runs: Vec<Run> = Vec::new();
    for (a, b) in old.iter().zip(new) {
        let value = a.wrapping_sub(*b);
        match runs.last_mut() {
            Some(run) if run.value == value && run.count < u16::MAX => run.count += 1,
            _ => runs.push(Run { value, count: 1 }),
        }
    }
    block::write_delta(out, old.len(), &runs);
}
