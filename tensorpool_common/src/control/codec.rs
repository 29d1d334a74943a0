//! Message header, byte cursors and the inbound filter.
//!
//! Every control-plane fragment is:
//!
//! ```text
//! ┌──────────────────────── 8-byte header ────────────────────────┐
//! │ block_length u16 │ template_id u16 │ schema_id u16 │ version u16 │
//! ├───────────────────────────────────────────────────────────────┤
//! │ fixed block (block_length bytes)                              │
//! ├───────────────────────────────────────────────────────────────┤
//! │ variable data (u32 length-prefixed strings / lists)           │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! A fragment is only decoded when `schema_id` matches, `template_id`
//! matches and `version` is not newer than [`SCHEMA_VERSION`]. A longer
//! block from a newer minor revision is tolerated; trailing block bytes are
//! skipped.

use crate::consts::{SCHEMA_ID, SCHEMA_VERSION};
use thiserror::Error;

/// Encoded header length in bytes.
pub const HEADER_LEN: usize = 8;

/// Upper bound on list lengths accepted from the wire.
pub const MAX_WIRE_LIST: usize = 1024;

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Fragment ended early.
    #[error("Truncated fragment: need {needed} more bytes")]
    Truncated {
        /// Missing byte count.
        needed: usize,
    },

    /// Block shorter than this revision's fixed fields.
    #[error("Block length {actual} shorter than required {required}")]
    ShortBlock {
        /// Length declared in the header.
        actual: u16,
        /// Length required by the decoder.
        required: u16,
    },

    /// Non-UTF-8 string field.
    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    /// Enum field outside its defined values.
    #[error("Invalid value {value} for field {field}")]
    InvalidEnum {
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: u64,
    },

    /// List length above [`MAX_WIRE_LIST`].
    #[error("List length {0} exceeds limit")]
    ListTooLong(usize),
}

/// Fixed control-plane message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Length of the fixed block following the header.
    pub block_length: u16,
    /// Message template.
    pub template_id: u16,
    /// Schema the template belongs to.
    pub schema_id: u16,
    /// Schema version used by the sender.
    pub version: u16,
}

impl MessageHeader {
    /// Read the header from the start of a fragment.
    pub fn peek(fragment: &[u8]) -> Option<Self> {
        let mut r = WireReader::new(fragment);
        Some(Self {
            block_length: r.get_u16().ok()?,
            template_id: r.get_u16().ok()?,
            schema_id: r.get_u16().ok()?,
            version: r.get_u16().ok()?,
        })
    }

    /// Inbound filter: right schema, expected template, supported version.
    #[inline]
    pub fn accepts(&self, template_id: u16) -> bool {
        self.schema_id == SCHEMA_ID
            && self.template_id == template_id
            && self.version <= SCHEMA_VERSION
    }

    fn write(&self, w: &mut WireWriter) {
        w.put_u16(self.block_length);
        w.put_u16(self.template_id);
        w.put_u16(self.schema_id);
        w.put_u16(self.version);
    }
}

/// A message body with a fixed block and optional variable data.
pub trait WireMessage: Sized {
    /// Template identifier.
    const TEMPLATE_ID: u16;
    /// Fixed block length produced by this revision.
    const BLOCK_LENGTH: u16;

    /// Write the fixed block.
    fn encode_block(&self, block: &mut WireWriter);

    /// Write variable data following the block.
    fn encode_var(&self, _var: &mut WireWriter) {}

    /// Read the message from its block and variable data.
    fn decode(block: &mut WireReader<'_>, var: &mut WireReader<'_>) -> Result<Self, WireError>;

    /// Encode as a complete fragment (header + block + var).
    fn to_fragment(&self) -> Vec<u8> {
        let mut w = WireWriter::with_capacity(HEADER_LEN + Self::BLOCK_LENGTH as usize);
        MessageHeader {
            block_length: Self::BLOCK_LENGTH,
            template_id: Self::TEMPLATE_ID,
            schema_id: SCHEMA_ID,
            version: SCHEMA_VERSION,
        }
        .write(&mut w);
        self.encode_block(&mut w);
        debug_assert_eq!(w.len(), HEADER_LEN + Self::BLOCK_LENGTH as usize);
        self.encode_var(&mut w);
        w.into_inner()
    }

    /// Decode a fragment if it passes the header filter.
    ///
    /// Returns `Ok(None)` for fragments of another schema/template or a newer
    /// version; these are not errors.
    fn from_fragment(fragment: &[u8]) -> Result<Option<Self>, WireError> {
        let Some(header) = MessageHeader::peek(fragment) else {
            return Ok(None);
        };
        if !header.accepts(Self::TEMPLATE_ID) {
            return Ok(None);
        }
        decode_body(header, fragment).map(Some)
    }
}

/// Decode the body of a fragment whose header already passed the filter.
pub(crate) fn decode_body<M: WireMessage>(
    header: MessageHeader,
    fragment: &[u8],
) -> Result<M, WireError> {
    if header.block_length < M::BLOCK_LENGTH {
        return Err(WireError::ShortBlock {
            actual: header.block_length,
            required: M::BLOCK_LENGTH,
        });
    }
    let body = &fragment[HEADER_LEN..];
    let block_len = header.block_length as usize;
    if body.len() < block_len {
        return Err(WireError::Truncated {
            needed: block_len - body.len(),
        });
    }
    let mut block = WireReader::new(&body[..block_len]);
    let mut var = WireReader::new(&body[block_len..]);
    M::decode(&mut block, &mut var)
}

/// Little-endian append-only writer.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    /// Writer with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish and return the bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Append a `u8`.
    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Append a `u16`.
    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a `u32`.
    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a `u64`.
    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a boolean as one byte.
    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    /// Append length-prefixed bytes.
    pub fn put_bytes(&mut self, v: &[u8]) {
        self.put_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn put_str(&mut self, v: &str) {
        self.put_bytes(v.as_bytes());
    }
}

/// Little-endian cursor over a borrowed fragment.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Cursor at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated {
                needed: n - self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read a `u8`.
    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    /// Read a `u16`.
    pub fn get_u16(&mut self) -> Result<u16, WireError> {
        self.take_array().map(u16::from_le_bytes)
    }

    /// Read a `u32`.
    pub fn get_u32(&mut self) -> Result<u32, WireError> {
        self.take_array().map(u32::from_le_bytes)
    }

    /// Read a `u64`.
    pub fn get_u64(&mut self) -> Result<u64, WireError> {
        self.take_array().map(u64::from_le_bytes)
    }

    /// Read a one-byte boolean (non-zero = true).
    pub fn get_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.get_u8()? != 0)
    }

    /// Read length-prefixed bytes.
    pub fn get_bytes(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.get_u32()? as usize;
        self.take(len)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn get_str(&mut self) -> Result<String, WireError> {
        let bytes = self.get_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| WireError::InvalidUtf8)
    }

    /// Read a list count, bounded by [`MAX_WIRE_LIST`].
    pub fn get_count(&mut self) -> Result<usize, WireError> {
        let count = self.get_u32()? as usize;
        if count > MAX_WIRE_LIST {
            return Err(WireError::ListTooLong(count));
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping {
        value: u32,
        note: String,
    }

    impl WireMessage for Ping {
        const TEMPLATE_ID: u16 = 200;
        const BLOCK_LENGTH: u16 = 4;

        fn encode_block(&self, block: &mut WireWriter) {
            block.put_u32(self.value);
        }

        fn encode_var(&self, var: &mut WireWriter) {
            var.put_str(&self.note);
        }

        fn decode(block: &mut WireReader<'_>, var: &mut WireReader<'_>) -> Result<Self, WireError> {
            Ok(Self {
                value: block.get_u32()?,
                note: var.get_str()?,
            })
        }
    }

    fn ping_fragment() -> Vec<u8> {
        Ping {
            value: 7,
            note: "hi".to_string(),
        }
        .to_fragment()
    }

    #[test]
    fn header_is_little_endian() {
        let frag = ping_fragment();
        assert_eq!(&frag[0..2], &4u16.to_le_bytes());
        assert_eq!(&frag[2..4], &200u16.to_le_bytes());
        assert_eq!(&frag[4..6], &SCHEMA_ID.to_le_bytes());
        assert_eq!(&frag[6..8], &SCHEMA_VERSION.to_le_bytes());
    }

    #[test]
    fn filter_discards_foreign_schema() {
        let mut frag = ping_fragment();
        frag[4..6].copy_from_slice(&(SCHEMA_ID + 1).to_le_bytes());
        assert!(Ping::from_fragment(&frag).unwrap().is_none());
    }

    #[test]
    fn filter_discards_other_template() {
        let mut frag = ping_fragment();
        frag[2..4].copy_from_slice(&201u16.to_le_bytes());
        assert!(Ping::from_fragment(&frag).unwrap().is_none());
    }

    #[test]
    fn filter_discards_newer_version() {
        let mut frag = ping_fragment();
        frag[6..8].copy_from_slice(&(SCHEMA_VERSION + 1).to_le_bytes());
        assert!(Ping::from_fragment(&frag).unwrap().is_none());
    }

    #[test]
    fn filter_discards_runt_fragment() {
        assert!(Ping::from_fragment(&[1, 2, 3]).unwrap().is_none());
    }

    #[test]
    fn longer_block_is_skipped() {
        let mut w = WireWriter::default();
        MessageHeader {
            block_length: 8,
            template_id: 200,
            schema_id: SCHEMA_ID,
            version: SCHEMA_VERSION,
        }
        .write(&mut w);
        w.put_u32(9);
        w.put_u32(0xDEAD_BEEF);
        w.put_str("ok");
        let ping = Ping::from_fragment(&w.into_inner()).unwrap().unwrap();
        assert_eq!(ping.value, 9);
        assert_eq!(ping.note, "ok");
    }

    #[test]
    fn short_block_is_an_error() {
        let mut frag = ping_fragment();
        frag[0..2].copy_from_slice(&2u16.to_le_bytes());
        assert!(matches!(
            Ping::from_fragment(&frag),
            Err(WireError::ShortBlock { actual: 2, required: 4 })
        ));
    }

    #[test]
    fn truncated_var_data_is_an_error() {
        let frag = ping_fragment();
        let cut = &frag[..frag.len() - 1];
        assert!(matches!(Ping::from_fragment(cut), Err(WireError::Truncated { .. })));
    }

    #[test]
    fn list_count_is_bounded() {
        let mut w = WireWriter::default();
        w.put_u32(MAX_WIRE_LIST as u32 + 1);
        let bytes = w.into_inner();
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.get_count(), Err(WireError::ListTooLong(MAX_WIRE_LIST + 1)));
    }
}
