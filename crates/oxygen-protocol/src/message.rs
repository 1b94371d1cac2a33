//! The [`Message`] type: one framed request or response.
//!
//! A `Message` owns the complete frame, header included. Builders append
//! little-endian fields to the end of the buffer; readers walk a cursor
//! forward through it. Nothing is parsed lazily except the opcode payload,
//! because every stream kind interprets that part differently.
//!
//! ## Why keep the header inside the buffer?
//!
//! The writer task sends the buffer as-is. If the header lived somewhere
//! else we would have to concatenate on every send. Instead, [`prepare`]
//! backfills the size and id fields in place, and [`into_frame`] hands
//! the finished bytes over without copying.
//!
//! [`prepare`]: Message::prepare
//! [`into_frame`]: Message::into_frame

use crate::ProtocolError;
use crate::wire::{HEADER_LEN, UNSET_ID};

/// A single protocol message (request, response, or stream event).
///
/// `Clone` duplicates the buffer AND the read cursor. Dispatch relies on
/// this: each callback gets its own copy, so one callback reading fields
/// never moves the cursor another callback sees.
///
/// ## Example
///
/// ```rust
/// use oxygen_protocol::Message;
///
/// let mut request = Message::new("ASSET_SVR", "ASSET_LIST");
/// request.write_i32(3).write_string("tiles.png");
///
/// // What the server would see after the frame crossed the wire:
/// let frame = request.into_frame();
/// let mut received = Message::from_frame(&frame).unwrap();
///
/// assert_eq!(received.node_name(), "ASSET_SVR");
/// assert_eq!(received.read_i32().unwrap(), 3);
/// assert_eq!(received.read_string().unwrap(), "tiles.png");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    node_name: String,
    message_name: String,
    id: i32,
    data: Vec<u8>,
    cursor: usize,
}

impl Message {
    /// Starts a new outbound message addressed to `node_name/message_name`.
    ///
    /// The correlation id is [`UNSET_ID`] until the connection assigns one.
    /// The read cursor sits just after the names, so a message can be
    /// written and then read back in the same order.
    pub fn new(
        node_name: impl Into<String>,
        message_name: impl Into<String>,
    ) -> Self {
        let node_name = node_name.into();
        let message_name = message_name.into();
        let mut msg = Self {
            node_name: String::new(),
            message_name: String::new(),
            id: UNSET_ID,
            data: Vec::with_capacity(
                HEADER_LEN + 8 + node_name.len() + message_name.len(),
            ),
            cursor: 0,
        };
        msg.data.extend_from_slice(&0i32.to_le_bytes());
        msg.data.extend_from_slice(&UNSET_ID.to_le_bytes());
        msg.write_string(&node_name);
        msg.write_string(&message_name);
        msg.cursor = msg.data.len();
        msg.node_name = node_name;
        msg.message_name = message_name;
        msg
    }

    /// Builds a message from a frame body (everything after the 8-byte
    /// header) and the correlation id read from that header.
    ///
    /// This is what the reader task calls for every inbound frame. The
    /// names are parsed immediately so dispatch can match on them.
    pub fn from_body(id: i32, body: &[u8]) -> Result<Self, ProtocolError> {
        let mut data = Vec::with_capacity(HEADER_LEN + body.len());
        data.extend_from_slice(&frame_size(HEADER_LEN + body.len()));
        data.extend_from_slice(&id.to_le_bytes());
        data.extend_from_slice(body);

        let mut msg = Self {
            node_name: String::new(),
            message_name: String::new(),
            id,
            data,
            cursor: HEADER_LEN,
        };
        msg.node_name = msg.read_string()?;
        msg.message_name = msg.read_string()?;
        Ok(msg)
    }

    /// Parses a complete wire frame (header + body).
    ///
    /// # Errors
    ///
    /// `TruncatedMessage` if the header itself is incomplete, `FrameSize`
    /// if the declared size disagrees with the bytes present.
    pub fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() < HEADER_LEN {
            return Err(ProtocolError::TruncatedMessage {
                needed: HEADER_LEN,
                remaining: frame.len(),
            });
        }
        let (size, id) = parse_header(&frame[..HEADER_LEN]);
        let actual = frame.len() - HEADER_LEN;
        if size < 0 || size as usize != actual {
            return Err(ProtocolError::FrameSize {
                declared: size.max(0) as usize,
                actual,
            });
        }
        Self::from_body(id, &frame[HEADER_LEN..])
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn message_name(&self) -> &str {
        &self.message_name
    }

    /// The correlation id, or [`UNSET_ID`].
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Stamps the correlation id into the message and its header.
    pub fn set_id(&mut self, id: i32) {
        self.id = id;
        self.data[4..HEADER_LEN].copy_from_slice(&id.to_le_bytes());
    }

    /// The whole frame as currently buffered. Call [`prepare`](Self::prepare)
    /// first if the size field must be accurate.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Everything after the 8-byte header.
    pub fn body(&self) -> &[u8] {
        &self.data[HEADER_LEN..]
    }

    /// Total frame length, header included.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false: a message carries at least its header.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left between the read cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    /// The unread tail of the message, without moving the cursor.
    pub fn remaining_bytes(&self) -> &[u8] {
        &self.data[self.cursor..]
    }

    // -----------------------------------------------------------------------
    // Framing
    // -----------------------------------------------------------------------

    /// Backfills the size field (`len - 8`) and the correlation id.
    ///
    /// Must run after the last write and before the bytes hit the socket.
    /// Calling it more than once is harmless; it just rewrites the header.
    pub fn prepare(&mut self) {
        let size = frame_size(self.data.len());
        self.data[..4].copy_from_slice(&size);
        self.data[4..HEADER_LEN].copy_from_slice(&self.id.to_le_bytes());
    }

    /// Prepares the message and gives up its buffer for transmission.
    pub fn into_frame(mut self) -> Vec<u8> {
        self.prepare();
        self.data
    }

    // -----------------------------------------------------------------------
    // Writers
    // -----------------------------------------------------------------------
    //
    // Each writer returns `&mut Self` so calls chain:
    //   msg.write_i32(1).write_string("name");

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.data.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.data.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_f64(&mut self, value: f64) -> &mut Self {
        self.data.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Appends `[len: i32][bytes]`. No escaping, no terminator.
    pub fn write_string(&mut self, value: &str) -> &mut Self {
        self.write_bytes(value.as_bytes())
    }

    /// Appends a length-prefixed byte blob.
    pub fn write_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.write_i32(value.len() as i32);
        self.data.extend_from_slice(value);
        self
    }

    /// Appends bytes with no length prefix.
    ///
    /// Used when a payload has already been laid out elsewhere, such as a
    /// replicated object record reconstructed by the delta codec.
    pub fn write_raw(&mut self, value: &[u8]) -> &mut Self {
        self.data.extend_from_slice(value);
        self
    }

    // -----------------------------------------------------------------------
    // Readers
    // -----------------------------------------------------------------------

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(buf))
    }

    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(f64::from_le_bytes(buf))
    }

    /// Reads a length-prefixed string. The bytes must be valid UTF-8.
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Reads a length-prefixed byte blob.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let start = self.cursor;
        let len = self.read_i32()?;
        if len < 0 {
            self.cursor = start;
            return Err(ProtocolError::NegativeLength(len));
        }
        match self.take(len as usize) {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(e) => {
                // Leave the cursor where it was so the caller can report
                // the failure against the field that actually broke.
                self.cursor = start;
                Err(e)
            }
        }
    }

    /// Reads exactly `len` bytes with no length prefix.
    pub fn read_raw(&mut self, len: usize) -> Result<&[u8], ProtocolError> {
        self.take(len)
    }

    /// Advances the cursor by `len` bytes, bounds-checked.
    fn take(&mut self, len: usize) -> Result<&[u8], ProtocolError> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(ProtocolError::TruncatedMessage {
                needed: len,
                remaining,
            });
        }
        let start = self.cursor;
        self.cursor += len;
        Ok(&self.data[start..self.cursor])
    }
}

/// Splits an 8-byte header into `(size, correlation id)`.
pub fn parse_header(header: &[u8]) -> (i32, i32) {
    let size = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let id = i32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    (size, id)
}

fn frame_size(total_len: usize) -> [u8; 4] {
    ((total_len - HEADER_LEN) as i32).to_le_bytes()
}
