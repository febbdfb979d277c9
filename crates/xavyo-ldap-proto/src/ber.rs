//! Minimal BER (Basic Encoding Rules) reader and writer.
//!
//! LDAP restricts BER to definite lengths and primitive encodings for
//! the types it uses, which keeps this module small: a cursor-style
//! [`BerReader`] over a borrowed slice and an append-only [`BerWriter`]
//! that back-patches constructed lengths when a scope closes.

use crate::error::{ProtocolError, ProtocolResult};

/// Universal SEQUENCE, constructed.
pub const TAG_SEQUENCE: u8 = 0x30;
/// Universal SET, constructed.
pub const TAG_SET: u8 = 0x31;
/// Universal BOOLEAN.
pub const TAG_BOOLEAN: u8 = 0x01;
/// Universal INTEGER.
pub const TAG_INTEGER: u8 = 0x02;
/// Universal OCTET STRING.
pub const TAG_OCTET_STRING: u8 = 0x04;
/// Universal ENUMERATED.
pub const TAG_ENUMERATED: u8 = 0x0a;

/// Largest length form we accept: four octets, i.e. lengths up to u32.
const MAX_LENGTH_OCTETS: usize = 4;

/// Outcome of probing a buffer for one complete outer element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// Not enough bytes buffered to know the total size yet.
    Incomplete,
    /// The first element spans exactly this many bytes, header included.
    Complete(usize),
}

/// Probes `buf` for the total wire size of the first BER element.
///
/// Returns [`Boundary::Incomplete`] while the header or body is still
/// partial. Fails fast on indefinite lengths and on bodies larger than
/// `max`, so a garbage or hostile peer cannot make the caller buffer
/// without bound.
pub fn element_boundary(buf: &[u8], max: usize) -> ProtocolResult<Boundary> {
    if buf.len() < 2 {
        return Ok(Boundary::Incomplete);
    }
    let first = buf[1];
    let (length, header) = if first < 0x80 {
        (first as usize, 2)
    } else {
        let octets = (first & 0x7f) as usize;
        if octets == 0 {
            return Err(ProtocolError::IndefiniteLength);
        }
        if octets > MAX_LENGTH_OCTETS {
            return Err(ProtocolError::LengthTooLong { octets });
        }
        if buf.len() < 2 + octets {
            return Ok(Boundary::Incomplete);
        }
        let mut length = 0usize;
        for &b in &buf[2..2 + octets] {
            length = (length << 8) | b as usize;
        }
        (length, 2 + octets)
    };
    if length > max {
        return Err(ProtocolError::MessageTooLarge { length, max });
    }
    let total = header + length;
    if buf.len() < total {
        Ok(Boundary::Incomplete)
    } else {
        Ok(Boundary::Complete(total))
    }
}

/// Cursor over a borrowed BER-encoded slice.
#[derive(Debug)]
pub struct BerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Tag of the next element without advancing.
    pub fn peek_tag(&self) -> ProtocolResult<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(ProtocolError::Truncated)
    }

    fn take(&mut self, n: usize) -> ProtocolResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated);
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_length(&mut self) -> ProtocolResult<usize> {
        let first = self.take(1)?[0];
        if first < 0x80 {
            return Ok(first as usize);
        }
        let octets = (first & 0x7f) as usize;
        if octets == 0 {
            return Err(ProtocolError::IndefiniteLength);
        }
        if octets > MAX_LENGTH_OCTETS {
            return Err(ProtocolError::LengthTooLong { octets });
        }
        let mut length = 0usize;
        for &b in self.take(octets)? {
            length = (length << 8) | b as usize;
        }
        Ok(length)
    }

    /// Reads one full element, returning its tag and content octets.
    pub fn read_element(&mut self) -> ProtocolResult<(u8, &'a [u8])> {
        let tag = self.take(1)?[0];
        let length = self.read_length()?;
        let content = self.take(length)?;
        Ok((tag, content))
    }

    /// Reads an element and checks its tag.
    pub fn read_expected(&mut self, expected: u8) -> ProtocolResult<&'a [u8]> {
        let (tag, content) = self.read_element()?;
        if tag != expected {
            return Err(ProtocolError::UnexpectedTag {
                expected,
                found: tag,
            });
        }
        Ok(content)
    }

    /// Reads a constructed element and returns a reader over its body.
    pub fn read_nested(&mut self, expected: u8) -> ProtocolResult<BerReader<'a>> {
        Ok(BerReader::new(self.read_expected(expected)?))
    }

    /// INTEGER (or any integer-bodied tag the caller expects).
    pub fn read_integer_tagged(&mut self, expected: u8) -> ProtocolResult<i64> {
        let content = self.read_expected(expected)?;
        decode_integer(content)
    }

    pub fn read_integer(&mut self) -> ProtocolResult<i64> {
        self.read_integer_tagged(TAG_INTEGER)
    }

    pub fn read_enumerated(&mut self) -> ProtocolResult<i64> {
        self.read_integer_tagged(TAG_ENUMERATED)
    }

    pub fn read_bool(&mut self) -> ProtocolResult<bool> {
        let content = self.read_expected(TAG_BOOLEAN)?;
        if content.len() != 1 {
            return Err(ProtocolError::InvalidBoolean);
        }
        Ok(content[0] != 0)
    }

    /// OCTET STRING content as raw bytes.
    pub fn read_octets(&mut self) -> ProtocolResult<&'a [u8]> {
        self.read_expected(TAG_OCTET_STRING)
    }

    /// OCTET STRING content as UTF-8, which is what LDAPString requires.
    pub fn read_string(&mut self, field: &'static str) -> ProtocolResult<String> {
        let content = self.read_octets()?;
        string_from(content, field)
    }
}

/// Decodes a two's-complement INTEGER body.
pub fn decode_integer(content: &[u8]) -> ProtocolResult<i64> {
    if content.is_empty() || content.len() > 8 {
        return Err(ProtocolError::InvalidInteger {
            length: content.len(),
        });
    }
    let mut value = if content[0] & 0x80 != 0 { -1i64 } else { 0i64 };
    for &b in content {
        value = (value << 8) | b as i64;
    }
    Ok(value)
}

pub(crate) fn string_from(content: &[u8], field: &'static str) -> ProtocolResult<String> {
    std::str::from_utf8(content)
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidUtf8 { field })
}

/// Append-only BER writer.
///
/// Constructed elements open with [`BerWriter::begin`], which records a
/// mark, and close with [`BerWriter::end`], which splices the definite
/// length in front of whatever was written in between. Message sizes
/// here are small enough that the splice is not worth avoiding.
#[derive(Debug, Default)]
pub struct BerWriter {
    buf: Vec<u8>,
}

impl BerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Opens a constructed element; returns the mark to pass to [`end`].
    ///
    /// [`end`]: BerWriter::end
    pub fn begin(&mut self, tag: u8) -> usize {
        self.buf.push(tag);
        self.buf.len()
    }

    /// Closes the element opened at `mark`.
    pub fn end(&mut self, mark: usize) {
        let length = self.buf.len() - mark;
        let encoded = encode_length(length);
        self.buf.splice(mark..mark, encoded);
    }

    /// One complete element with the given tag and content.
    pub fn write_element(&mut self, tag: u8, content: &[u8]) {
        self.buf.push(tag);
        self.buf.extend(encode_length(content.len()));
        self.buf.extend_from_slice(content);
    }

    pub fn write_integer_tagged(&mut self, tag: u8, value: i64) {
        let body = encode_integer(value);
        self.write_element(tag, &body);
    }

    pub fn write_integer(&mut self, value: i64) {
        self.write_integer_tagged(TAG_INTEGER, value);
    }

    pub fn write_enumerated(&mut self, value: i64) {
        self.write_integer_tagged(TAG_ENUMERATED, value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_element(TAG_BOOLEAN, &[if value { 0xff } else { 0x00 }]);
    }

    pub fn write_octets(&mut self, content: &[u8]) {
        self.write_element(TAG_OCTET_STRING, content);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_element(TAG_OCTET_STRING, value.as_bytes());
    }

    /// Raw bytes, already encoded.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

/// Encodes a definite length: short form below 128, long form above.
fn encode_length(length: usize) -> Vec<u8> {
    if length < 0x80 {
        return vec![length as u8];
    }
    let bytes = (length as u64).to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    let mut body = Vec::with_capacity(1 + 8 - skip);
    body.push(0x80 | (8 - skip) as u8);
    body.extend_from_slice(&bytes[skip..]);
    body
}

/// Minimal two's-complement INTEGER body.
pub(crate) fn integer_body(value: i64) -> Vec<u8> {
    encode_integer(value)
}

fn encode_integer(value: i64) -> Vec<u8> {
    let mut bytes = value.to_be_bytes().to_vec();
    while bytes.len() > 1 {
        let drop = (bytes[0] == 0x00 && bytes[1] & 0x80 == 0)
            || (bytes[0] == 0xff && bytes[1] & 0x80 != 0);
        if !drop {
            break;
        }
        bytes.remove(0);
    }
    bytes
}
