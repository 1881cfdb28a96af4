//! Payload readers and writers.
//!
//! Strings cross the wire in Big5 and live in memory as UTF-8. Only the
//! byte boundary transcodes.

use bytes::Bytes;
use encoding_rs::{EncoderResult, BIG5};

/// Error types for payload parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("Read past end of payload: pos={pos}, want={want}, len={len}")]
    Truncated { pos: usize, want: usize, len: usize },

    #[error("String not NUL terminated at pos={0}")]
    Unterminated(usize),

    #[error("Invalid field {field}: {value}")]
    InvalidField { field: &'static str, value: i64 },

    #[error("No handler for opcode {0}")]
    Unhandled(u8),
}

/// Encodes a UTF-8 string as Big5. Characters Big5 cannot represent
/// become a single `?`.
pub fn encode_big5(s: &str) -> Vec<u8> {
    if s.is_ascii() {
        return s.as_bytes().to_vec();
    }
    let mut encoder = BIG5.new_encoder();
    let mut out = Vec::with_capacity(s.len() * 2);
    let mut src = s;
    loop {
        let need = encoder
            .max_buffer_length_from_utf8_without_replacement(src.len())
            .unwrap_or(src.len() * 2 + 2);
        out.reserve(need);
        let (result, read) = encoder.encode_from_utf8_to_vec_without_replacement(src, &mut out, true);
        src = &src[read..];
        match result {
            EncoderResult::InputEmpty => break,
            EncoderResult::OutputFull => {}
            EncoderResult::Unmappable(_) => out.push(b'?'),
        }
    }
    out
}

/// Decodes Big5 bytes into UTF-8.
pub fn decode_big5(raw: &[u8]) -> String {
    if raw.is_ascii() {
        return String::from_utf8_lossy(raw).into_owned();
    }
    let (out, _) = BIG5.decode_without_bom_handling(raw);
    out.into_owned()
}

/// Encodes `s` as Big5 and cuts it to at most `max` bytes without splitting
/// a double-byte character.
pub fn truncate_big5(s: &str, max: usize) -> Vec<u8> {
    let encoded = encode_big5(s);
    if encoded.len() <= max {
        return encoded;
    }
    let mut end = 0;
    while end < max {
        let step = if encoded[end] >= 0x81 { 2 } else { 1 };
        if end + step > max {
            break;
        }
        end += step;
    }
    encoded[..end].to_vec()
}

/// Cursor over a decrypted client payload. Position 0 is the opcode.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 1 }
    }

    pub fn opcode(&self) -> u8 {
        self.data.first().copied().unwrap_or(0)
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take(&mut self, want: usize) -> Result<&'a [u8], PacketError> {
        if self.remaining() < want {
            return Err(PacketError::Truncated {
                pos: self.pos,
                want,
                len: self.data.len(),
            });
        }
        let data = self.data;
        let out = &data[self.pos..self.pos + want];
        self.pos += want;
        Ok(out)
    }

    pub fn c(&mut self) -> Result<u8, PacketError> {
        Ok(self.take(1)?[0])
    }

    pub fn h(&mut self) -> Result<u16, PacketError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn d(&mut self) -> Result<i32, PacketError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn s(&mut self) -> Result<String, PacketError> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(PacketError::Unterminated(self.pos))?;
        let raw = &rest[..nul];
        self.pos += nul + 1;
        Ok(decode_big5(raw))
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], PacketError> {
        self.take(n)
    }

    /// Consumes and returns everything left.
    pub fn rest(&mut self) -> &'a [u8] {
        let data = self.data;
        let start = self.pos.min(data.len());
        self.pos = data.len();
        &data[start..]
    }
}

/// Builds one server payload. The first byte is the opcode.
#[derive(Debug, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new(opcode: u8) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.push(opcode);
        Self { buf }
    }

    pub fn c(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn h(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn d(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn du(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Big5 string with a NUL terminator.
    pub fn s(&mut self, v: &str) -> &mut Self {
        self.buf.extend_from_slice(&encode_big5(v));
        self.buf.push(0);
        self
    }

    /// Pre-encoded Big5 bytes with a NUL terminator.
    pub fn s_raw(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self.buf.push(0);
        self
    }

    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// Zero-padded fixed-width field.
    pub fn fixed(&mut self, v: &[u8], width: usize) -> &mut Self {
        let n = v.len().min(width);
        self.buf.extend_from_slice(&v[..n]);
        self.buf.resize(self.buf.len() + (width - n), 0);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finishes the payload padded to a 4-byte boundary.
    pub fn finish(&mut self) -> Bytes {
        let pad = (4 - self.buf.len() % 4) % 4;
        self.buf.resize(self.buf.len() + pad, 0);
        Bytes::from(std::mem::take(&mut self.buf))
    }

    /// Finishes the payload without padding.
    pub fn finish_raw(&mut self) -> Bytes {
        Bytes::from(std::mem::take(&mut self.buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_primitives() {
        let data = [29u8, 0x7f, 0x34, 0x12, 0xff, 0xff, 0xff, 0xff, b'h', b'i', 0, 9];
        let mut r = Reader::new(&data);
        assert_eq!(r.opcode(), 29);
        assert_eq!(r.c().unwrap(), 0x7f);
        assert_eq!(r.h().unwrap(), 0x1234);
        assert_eq!(r.d().unwrap(), -1);
        assert_eq!(r.s().unwrap(), "hi");
        assert_eq!(r.rest(), &[9]);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_reader_truncated() {
        let data = [1u8, 2];
        let mut r = Reader::new(&data);
        assert!(matches!(r.h(), Err(PacketError::Truncated { .. })));
    }

    #[test]
    fn test_reader_unterminated_string() {
        let data = [1u8, b'a', b'b'];
        let mut r = Reader::new(&data);
        assert_eq!(r.s(), Err(PacketError::Unterminated(1)));
    }

    #[test]
    fn test_writer_layout_and_padding() {
        let out = Writer::new(8).c(1).h(0x0203).d(-2).finish();
        assert_eq!(out.len(), 8);
        assert_eq!(&out[..], &[8, 1, 0x03, 0x02, 0xfe, 0xff, 0xff, 0xff]);

        let padded = Writer::new(8).c(1).finish();
        assert_eq!(padded.len(), 4);
        assert_eq!(&padded[..], &[8, 1, 0, 0]);

        let raw = Writer::new(8).c(1).finish_raw();
        assert_eq!(raw.len(), 2);
    }

    #[test]
    fn test_empty_string_is_single_nul() {
        let out = Writer::new(1).s("").finish_raw();
        assert_eq!(&out[..], &[1, 0]);
    }

    #[test]
    fn test_big5_string_through_writer_and_reader() {
        let name = "天堂";
        let out = Writer::new(81).s(name).finish_raw();
        assert_eq!(out.len(), 1 + 4 + 1);
        let mut r = Reader::new(&out);
        assert_eq!(r.s().unwrap(), name);
    }

    #[test]
    fn test_truncate_big5_keeps_whole_characters() {
        let s = "天堂天堂";
        assert_eq!(truncate_big5(s, 8).len(), 8);
        assert_eq!(truncate_big5(s, 7).len(), 6);
        assert_eq!(truncate_big5("abc", 2), b"ab".to_vec());
        assert_eq!(decode_big5(&truncate_big5(s, 5)), "天堂");
    }

    #[test]
    fn test_unmappable_becomes_question_mark() {
        assert_eq!(encode_big5("a😀b"), b"a?b".to_vec());
        assert_eq!(encode_big5("😀😀"), b"??".to_vec());
        let sky = encode_big5("天");
        assert_eq!(sky.len(), 2);
        let mut want = sky.clone();
        want.push(b'?');
        assert_eq!(encode_big5("天😀"), want);
        // Cut after encoding: the stand-in costs one byte, not a numeric reference.
        assert_eq!(truncate_big5("天😀天", 3), want);
    }

    #[test]
    fn test_fixed_width_field() {
        let out = Writer::new(0).fixed(b"ab", 4).finish_raw();
        assert_eq!(&out[..], &[0, b'a', b'b', 0, 0]);
        let cut = Writer::new(0).fixed(b"abcdef", 3).finish_raw();
        assert_eq!(&cut[..], &[0, b'a', b'b', b'c']);
    }
}
