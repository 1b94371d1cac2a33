//! Delta blocks: the unit of the diff encoding.
//!
//! ```text
//! block   := [flag: u8][length: u16 LE] body
//! flag 0  := UNCOMPRESSED, body = `length` literal bytes
//! flag 1  := DELTA, body = (value: u8, run: u16 LE)* until runs sum to `length`
//! ```
//!
//! Blocks cover the new buffer in order, so a block's offset is implied
//! by the lengths of the blocks before it. [`parse`] fills it in anyway,
//! since it makes decode errors and tests easier to read.

use crate::DeltaError;

pub(crate) const FLAG_UNCOMPRESSED: u8 = 0;
pub(crate) const FLAG_DELTA: u8 = 1;

/// Header bytes in front of every block.
pub const BLOCK_HEADER_LEN: usize = 3;

/// Largest length a single block (or a single run) can declare.
pub const MAX_BLOCK_LEN: usize = u16::MAX as usize;

/// One `(value, count)` pair of a run-length encoded diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub value: u8,
    pub count: u16,
}

/// A parsed delta block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaBlock {
    /// Bytes copied verbatim into the new buffer.
    Uncompressed { offset: usize, bytes: Vec<u8> },
    /// A subtraction diff against the base snapshot, run-length encoded.
    DeltaRunLength {
        offset: usize,
        length: usize,
        runs: Vec<Run>,
    },
}

impl DeltaBlock {
    /// Where this block's output starts in the new buffer.
    pub fn offset(&self) -> usize {
        match self {
            Self::Uncompressed { offset, .. } | Self::DeltaRunLength { offset, .. } => *offset,
        }
    }

    /// How many bytes of the new buffer this block produces.
    pub fn len(&self) -> usize {
        match self {
            Self::Uncompressed { bytes, .. } => bytes.len(),
            Self::DeltaRunLength { length, .. } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Appends one UNCOMPRESSED block. `bytes` must fit in a block.
pub(crate) fn write_literal(out: &mut Vec<u8>, bytes: &[u8]) {
    debug_assert!(bytes.len() <= MAX_BLOCK_LEN);
    out.push(FLAG_UNCOMPRESSED);
    out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(bytes);
}

/// Appends one DELTA block covering `length` bytes.
pub(crate) fn write_delta(out: &mut Vec<u8>, length: usize, runs: &[Run]) {
    debug_assert!(length <= MAX_BLOCK_LEN);
    out.push(FLAG_DELTA);
    out.extend_from_slice(&(length as u16).to_le_bytes());
    for run in runs {
        out.push(run.value);
        out.extend_from_slice(&run.count.to_le_bytes());
    }
}

/// Splits a delta payload into its blocks.
pub fn parse(delta: &[u8]) -> Result<Vec<DeltaBlock>, DeltaError> {
    let mut reader = Reader { buf: delta, pos: 0 };
    let mut blocks = Vec::new();
    let mut offset = 0;

    while reader.pos < delta.len() {
        let flag = reader.u8()?;
        let length = reader.u16()? as usize;
        let block = match flag {
            FLAG_UNCOMPRESSED => DeltaBlock::Uncompressed {
                offset,
                bytes: reader.take(length)?.to_vec(),
            },
            FLAG_DELTA => {
                let mut runs = Vec::new();
                let mut produced = 0usize;
                while produced < length {
                    let value = reader.u8()?;
                    let count = reader.u16()?;
                    produced += count as usize;
                    runs.push(Run { value, count });
                }
                if produced > length {
                    return Err(DeltaError::BlockTooLong(produced));
                }
                DeltaBlock::DeltaRunLength {
                    offset,
                    length,
                    runs,
                }
            }
            other => return Err(DeltaError::UnknownBlock(other)),
        };
        offset += block.len();
        blocks.push(block);
    }

    Ok(blocks)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], DeltaError> {
        let end = self.pos + len;
        if end > self.buf.len() {
            return Err(DeltaError::Truncated { offset: self.pos });
        }
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, DeltaError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DeltaError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literal_then_delta_assigns_offsets() {
        let mut payload = Vec::new();
        write_literal(&mut payload, &[9, 9]);
        write_delta(&mut payload, 4, &[Run { value: 0, count: 4 }]);

        let blocks = parse(&payload).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].offset(), 0);
        assert_eq!(blocks[1].offset(), 2);
        assert_eq!(blocks[1].len(), 4);
    }

    #[test]
    fn test_parse_header_layout_is_flag_then_u16_le() {
        let mut payload = Vec::new();
        write_literal(&mut payload, &[7; 300]);
        assert_eq!(&payload[..3], &[FLAG_UNCOMPRESSED, 0x2C, 0x01]);
    }

    #[test]
    fn test_parse_unknown_flag_returns_error() {
        assert_eq!(parse(&[7, 0, 0]), Err(DeltaError::UnknownBlock(7)));
    }

    #[test]
    fn test_parse_short_literal_returns_truncated() {
        assert_eq!(
            parse(&[FLAG_UNCOMPRESSED, 4, 0, 1, 2]),
            Err(DeltaError::Truncated { offset: 3 })
        );
    }

    #[test]
    fn test_parse_runs_overshooting_block_return_too_long() {
        let mut payload = Vec::new();
        write_delta(&mut payload, 2, &[Run { value: 1, count: 5 }]);
        assert_eq!(parse(&payload), Err(DeltaError::BlockTooLong(5)));
    }
}
