//! Byte-level layout of the compact list: header, predecessor-length
//! fields, entry encodings and integer payloads.
//!
//! Everything here works on plain slices and fails closed: every read is
//! bounds-checked and reports a [`DecodeError`] instead of panicking.

use crate::error::DecodeError;
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Total length (u32) + tail offset (u32) + entry count (u16).
pub(crate) const HEADER_SIZE: usize = 10;
pub(crate) const END: u8 = 0xFF;
/// First byte of a 5-byte predecessor-length field.
pub(crate) const BIG_PREVLEN: u8 = 254;
/// Stored entry count once the real count no longer fits.
pub(crate) const COUNT_SATURATED: u16 = u16::MAX;

const STR_MASK: u8 = 0xC0;
const STR_06B: u8 = 0x00;
const STR_14B: u8 = 0x40;
const STR_32B: u8 = 0x80;
const INT_16B: u8 = 0xC0;
const INT_32B: u8 = 0xD0;
const INT_64B: u8 = 0xE0;
const INT_24B: u8 = 0xF0;
const INT_8B: u8 = 0xFE;
const INT_IMM_MIN: u8 = 0xF1;
const INT_IMM_MAX: u8 = 0xFD;

const INT24_MIN: i64 = -(1 << 23);
const INT24_MAX: i64 = (1 << 23) - 1;

/// Longest input that is still considered for integer encoding.
const MAX_INT_TEXT: usize = 31;

/// Encoding class of one entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// String of up to 63 bytes, length in the header byte.
    Str6,
    /// String of up to 16383 bytes, 14-bit big-endian length.
    Str14,
    /// Longer string, 32-bit big-endian length.
    Str32,
    Int8,
    Int16,
    Int24,
    Int32,
    Int64,
    /// Value 0..=12 stored in the header byte itself.
    Imm(u8),
}

impl Encoding {
    pub fn is_str(self) -> bool {
        matches!(self, Encoding::Str6 | Encoding::Str14 | Encoding::Str32)
    }

    /// Bytes taken by the encoding header.
    pub fn header_len(self) -> usize {
        match self {
            Encoding::Str14 => 2,
            Encoding::Str32 => 5,
            _ => 1,
        }
    }

    /// Narrowest string class able to hold `len` bytes.
    pub(crate) fn for_str(len: usize) -> Self {
        if len <= 0x3f {
            Encoding::Str6
        } else if len <= 0x3fff {
            Encoding::Str14
        } else {
            Encoding::Str32
        }
    }

    /// Narrowest integer class able to hold `v`.
    pub(crate) fn for_int(v: i64) -> Self {
        if (0..=12).contains(&v) {
            Encoding::Imm(v as u8)
        } else if i8::try_from(v).is_ok() {
            Encoding::Int8
        } else if i16::try_from(v).is_ok() {
            Encoding::Int16
        } else if (INT24_MIN..=INT24_MAX).contains(&v) {
            // Checked before int32: e.g. 128000 takes three bytes.
            Encoding::Int24
        } else if i32::try_from(v).is_ok() {
            Encoding::Int32
        } else {
            Encoding::Int64
        }
    }

    /// Payload size of an integer class. Strings carry their length in the
    /// header instead.
    fn int_payload_len(self) -> usize {
        match self {
            Encoding::Int8 => 1,
            Encoding::Int16 => 2,
            Encoding::Int24 => 3,
            Encoding::Int32 => 4,
            Encoding::Int64 => 8,
            _ => 0,
        }
    }
}

/// Decoded layout of one entry. Offsets are relative to the buffer start.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub offset: usize,
    /// Size in bytes of the preceding entry (0 for the head).
    pub prev_len: usize,
    /// Width of the predecessor-length field: 1 or 5.
    pub prev_len_size: usize,
    pub encoding: Encoding,
    pub header_len: usize,
    pub payload_len: usize,
}

impl Entry {
    /// Total bytes occupied by the entry.
    pub fn size(&self) -> usize {
        self.prev_len_size + self.header_len + self.payload_len
    }

    pub fn payload_offset(&self) -> usize {
        self.offset + self.prev_len_size + self.header_len
    }

    pub(crate) fn payload<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        let start = self.payload_offset();
        &buf[start..start + self.payload_len]
    }
}

/// Width of the predecessor-length field needed to store `len`.
#[inline]
pub(crate) fn prevlen_size(len: usize) -> usize {
    if len < BIG_PREVLEN as usize {
        1
    } else {
        5
    }
}

/// Minimal-width predecessor-length field for `len`; the field is the
/// first `n` bytes of the returned array.
pub(crate) fn encode_prevlen(len: usize) -> ([u8; 5], usize) {
    let mut out = [0u8; 5];
    let width = prevlen_size(len);
    if width == 1 {
        out[0] = len as u8;
    } else {
        out[0] = BIG_PREVLEN;
        LittleEndian::write_u32(&mut out[1..], len as u32);
    }
    (out, width)
}

/// Read the predecessor-length field at `offset`, returning its value and
/// width. `limit` is the first byte the field may not touch.
pub(crate) fn read_prevlen(
    buf: &[u8],
    offset: usize,
    limit: usize,
) -> Result<(usize, usize), DecodeError> {
    let first = *buf
        .get(offset)
        .filter(|_| offset < limit)
        .ok_or(DecodeError::OutOfBounds { offset })?;
    match first {
        END => Err(DecodeError::InvalidEncoding {
            offset,
            byte: first,
        }),
        BIG_PREVLEN => {
            if offset + 5 > limit {
                return Err(DecodeError::OutOfBounds { offset });
            }
            let len = LittleEndian::read_u32(&buf[offset + 1..offset + 5]);
            Ok((len as usize, 5))
        }
        small => Ok((small as usize, 1)),
    }
}

/// Decode the encoding header at `offset`: class, header width and
/// payload length.
fn read_encoding(
    buf: &[u8],
    offset: usize,
    limit: usize,
) -> Result<(Encoding, usize, usize), DecodeError> {
    let oob = DecodeError::OutOfBounds { offset };
    if offset >= limit {
        return Err(oob);
    }
    let byte = buf[offset];
    if byte & STR_MASK != STR_MASK {
        return match byte & STR_MASK {
            STR_06B => Ok((Encoding::Str6, 1, (byte & 0x3f) as usize)),
            STR_14B => {
                if offset + 2 > limit {
                    return Err(oob);
                }
                let len = BigEndian::read_u16(&buf[offset..offset + 2]) & 0x3fff;
                Ok((Encoding::Str14, 2, len as usize))
            }
            _ => {
                if offset + 5 > limit {
                    return Err(oob);
                }
                let len = BigEndian::read_u32(&buf[offset + 1..offset + 5]);
                Ok((Encoding::Str32, 5, len as usize))
            }
        };
    }
    let enc = match byte {
        INT_8B => Encoding::Int8,
        INT_16B => Encoding::Int16,
        INT_24B => Encoding::Int24,
        INT_32B => Encoding::Int32,
        INT_64B => Encoding::Int64,
        INT_IMM_MIN..=INT_IMM_MAX => Encoding::Imm((byte & 0x0f) - 1),
        _ => return Err(DecodeError::InvalidEncoding { offset, byte }),
    };
    Ok((enc, 1, enc.int_payload_len()))
}

/// Decode the entry starting at `offset`. The entry must end at or before
/// `limit` (the offset of the end marker).
pub(crate) fn decode_entry(buf: &[u8], offset: usize, limit: usize) -> Result<Entry, DecodeError> {
    let (prev_len, prev_len_size) = read_prevlen(buf, offset, limit)?;
    let (encoding, header_len, payload_len) =
        read_encoding(buf, offset + prev_len_size, limit)?;
    let entry = Entry {
        offset,
        prev_len,
        prev_len_size,
        encoding,
        header_len,
        payload_len,
    };
    match offset.checked_add(entry.size()) {
        Some(end) if end <= limit => Ok(entry),
        _ => Err(DecodeError::OutOfBounds { offset }),
    }
}

/// Canonical decimal integer: `0`, or an optional `-` followed by a
/// non-zero digit and more digits, in range for i64. No sign prefix `+`,
/// no whitespace, no leading zeros, no `-0`.
pub(crate) fn parse_i64(s: &[u8]) -> Option<i64> {
    if s.is_empty() || s.len() > MAX_INT_TEXT {
        return None;
    }
    if s == b"0" {
        return Some(0);
    }
    let digits = s.strip_prefix(b"-").unwrap_or(s);
    match digits.split_first() {
        Some((b'1'..=b'9', rest)) if rest.iter().all(u8::is_ascii_digit) => {}
        _ => return None,
    }
    core::str::from_utf8(s).ok()?.parse().ok()
}

/// Encoded form chosen for an input byte string.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Encoded<'a> {
    Int(Encoding, i64),
    Str(&'a [u8]),
}

impl<'a> Encoded<'a> {
    pub(crate) fn classify(s: &'a [u8]) -> Self {
        match parse_i64(s) {
            Some(v) => Encoded::Int(Encoding::for_int(v), v),
            None => Encoded::Str(s),
        }
    }

    fn encoding(&self) -> Encoding {
        match *self {
            Encoded::Int(enc, _) => enc,
            Encoded::Str(s) => Encoding::for_str(s.len()),
        }
    }

    /// Header plus payload size.
    pub(crate) fn body_len(&self) -> usize {
        let enc = self.encoding();
        enc.header_len()
            + match *self {
                Encoded::Int(..) => enc.int_payload_len(),
                Encoded::Str(s) => s.len(),
            }
    }

    /// Full entry bytes given the size of the preceding entry.
    pub(crate) fn to_entry(&self, prev_len: usize) -> Vec<u8> {
        let (field, width) = encode_prevlen(prev_len);
        let mut out = Vec::with_capacity(width + self.body_len());
        out.extend_from_slice(&field[..width]);
        match *self {
            Encoded::Str(s) => {
                match Encoding::for_str(s.len()) {
                    Encoding::Str6 => out.push(STR_06B | s.len() as u8),
                    Encoding::Str14 => {
                        let mut h = [0u8; 2];
                        BigEndian::write_u16(&mut h, ((STR_14B as u16) << 8) | s.len() as u16);
                        out.extend_from_slice(&h);
                    }
                    _ => {
                        let mut h = [STR_32B, 0, 0, 0, 0];
                        BigEndian::write_u32(&mut h[1..], s.len() as u32);
                        out.extend_from_slice(&h);
                    }
                }
                out.extend_from_slice(s);
            }
            Encoded::Int(enc, v) => {
                let mut payload = [0u8; 8];
                let n = enc.int_payload_len();
                let header = match enc {
                    Encoding::Int8 => {
                        payload[0] = v as i8 as u8;
                        INT_8B
                    }
                    Encoding::Int16 => {
                        LittleEndian::write_i16(&mut payload, v as i16);
                        INT_16B
                    }
                    Encoding::Int24 => {
                        LittleEndian::write_i24(&mut payload, v as i32);
                        INT_24B
                    }
                    Encoding::Int32 => {
                        LittleEndian::write_i32(&mut payload, v as i32);
                        INT_32B
                    }
                    Encoding::Int64 => {
                        LittleEndian::write_i64(&mut payload, v);
                        INT_64B
                    }
                    Encoding::Imm(i) => INT_IMM_MIN + i,
                    Encoding::Str6 | Encoding::Str14 | Encoding::Str32 => {
                        unreachable!("integer value with a string encoding")
                    }
                };
                out.push(header);
                out.extend_from_slice(&payload[..n]);
            }
        }
        out
    }
}

/// Decode an integer payload of class `enc`.
pub(crate) fn read_int(enc: Encoding, payload: &[u8]) -> i64 {
    match enc {
        Encoding::Int8 => payload[0] as i8 as i64,
        Encoding::Int16 => LittleEndian::read_i16(payload) as i64,
        Encoding::Int24 => LittleEndian::read_i24(payload) as i64,
        Encoding::Int32 => LittleEndian::read_i32(payload) as i64,
        Encoding::Int64 => LittleEndian::read_i64(payload),
        Encoding::Imm(v) => v as i64,
        Encoding::Str6 | Encoding::Str14 | Encoding::Str32 => {
            unreachable!("string entry decoded as an integer")
        }
    }
}

/// Fixed header fields of a list buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ListHeader {
    pub(crate) total_len: usize,
    pub(crate) tail: usize,
    pub(crate) count: u16,
}

impl ListHeader {
    pub(crate) fn empty() -> Self {
        Self {
            total_len: HEADER_SIZE + 1,
            tail: HEADER_SIZE,
            count: 0,
        }
    }

    pub(crate) fn read(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_SIZE + 1 {
            return Err(DecodeError::Truncated { len: buf.len() });
        }
        Ok(Self::load(buf))
    }

    /// Unchecked read; `buf` must hold at least the header.
    pub(crate) fn load(buf: &[u8]) -> Self {
        Self {
            total_len: LittleEndian::read_u32(&buf[0..4]) as usize,
            tail: LittleEndian::read_u32(&buf[4..8]) as usize,
            count: LittleEndian::read_u16(&buf[8..10]),
        }
    }

    pub(crate) fn write(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.total_len as u32);
        LittleEndian::write_u32(&mut buf[4..8], self.tail as u32);
        LittleEndian::write_u16(&mut buf[8..10], self.count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_integer_parsing() {
        assert_eq!(parse_i64(b"0"), Some(0));
        assert_eq!(parse_i64(b"128000"), Some(128000));
        assert_eq!(parse_i64(b"-42"), Some(-42));
        assert_eq!(parse_i64(b"9223372036854775807"), Some(i64::MAX));
        assert_eq!(parse_i64(b"-9223372036854775808"), Some(i64::MIN));
        let bad_inputs: [&[u8]; 10] = [
            b"",
            b"-",
            b"-0",
            b"+1",
            b"01",
            b" 1",
            b"1 ",
            b"1a",
            b"9223372036854775808",
            b"0000000000000000000000000000000001",
        ];
        for bad in bad_inputs {
            assert_eq!(parse_i64(bad), None, "{:?}", String::from_utf8_lossy(bad));
        }
    }

    #[test]
    fn integer_class_is_narrowest() {
        assert_eq!(Encoding::for_int(0), Encoding::Imm(0));
        assert_eq!(Encoding::for_int(12), Encoding::Imm(12));
        assert_eq!(Encoding::for_int(13), Encoding::Int8);
        assert_eq!(Encoding::for_int(-1), Encoding::Int8);
        assert_eq!(Encoding::for_int(-129), Encoding::Int16);
        assert_eq!(Encoding::for_int(40_000), Encoding::Int24);
        assert_eq!(Encoding::for_int(128_000), Encoding::Int24);
        assert_eq!(Encoding::for_int(INT24_MAX + 1), Encoding::Int32);
        assert_eq!(Encoding::for_int(i32::MIN as i64 - 1), Encoding::Int64);
    }

    #[test]
    fn string_class_is_narrowest() {
        assert_eq!(Encoding::for_str(0), Encoding::Str6);
        assert_eq!(Encoding::for_str(63), Encoding::Str6);
        assert_eq!(Encoding::for_str(64), Encoding::Str14);
        assert_eq!(Encoding::for_str(16383), Encoding::Str14);
        assert_eq!(Encoding::for_str(16384), Encoding::Str32);
    }

    #[test]
    fn entry_bytes_match_wire_layout() {
        assert_eq!(Encoded::classify(b"foo").to_entry(0), b"\x00\x03foo".to_vec());
        assert_eq!(Encoded::classify(b"5").to_entry(3), vec![3, 0xF6]);
        assert_eq!(Encoded::classify(b"-2").to_entry(0), vec![0, 0xFE, 0xFE]);
        assert_eq!(
            Encoded::classify(b"128000").to_entry(0),
            vec![0, 0xF0, 0x00, 0xF4, 0x01]
        );
        assert_eq!(
            Encoded::classify(b"1000").to_entry(300),
            vec![0xFE, 0x2C, 0x01, 0x00, 0x00, 0xC0, 0xE8, 0x03]
        );

        let s = vec![b'x'; 300];
        let e = Encoded::classify(&s).to_entry(0);
        assert_eq!(&e[..3], &[0x00, 0x41, 0x2C]);
        assert_eq!(e.len(), 3 + 300);

        let s = vec![b'y'; 20_000];
        let e = Encoded::classify(&s).to_entry(0);
        assert_eq!(&e[..6], &[0x00, 0x80, 0x00, 0x00, 0x4E, 0x20]);
    }

    /// Invariant: decoding an encoded entry recovers its layout and value.
    #[test]
    fn decode_recovers_layout() {
        let cases: [(&[u8], Encoding); 7] = [
            (b"hello", Encoding::Str6),
            (b"7", Encoding::Imm(7)),
            (b"-100", Encoding::Int8),
            (b"30000", Encoding::Int16),
            (b"-8388608", Encoding::Int24),
            (b"2147483647", Encoding::Int32),
            (b"-9223372036854775808", Encoding::Int64),
        ];
        for (input, enc) in cases {
            let mut buf = Encoded::classify(input).to_entry(260);
            let limit = buf.len();
            buf.push(END);
            let e = decode_entry(&buf, 0, limit).unwrap();
            assert_eq!(e.encoding, enc);
            assert_eq!(e.prev_len, 260);
            assert_eq!(e.prev_len_size, 5);
            assert_eq!(e.size(), limit);
            let payload = e.payload(&buf);
            if enc.is_str() {
                assert_eq!(payload, input);
            } else {
                let text = read_int(enc, payload).to_string();
                assert_eq!(text.as_bytes(), input);
            }
        }
    }

    #[test]
    fn decode_fails_closed() {
        // Truncated 5-byte predecessor field.
        assert_eq!(
            decode_entry(&[0xFE, 1, 0, END], 0, 3),
            Err(DecodeError::OutOfBounds { offset: 0 })
        );
        // Unknown integer class.
        assert_eq!(
            decode_entry(&[0, 0xC1, END], 0, 2),
            Err(DecodeError::InvalidEncoding {
                offset: 1,
                byte: 0xC1
            })
        );
        // String payload running past the end marker.
        assert_eq!(
            decode_entry(&[0, 0x05, b'a', END], 0, 3),
            Err(DecodeError::OutOfBounds { offset: 0 })
        );
        // The end marker is not an entry.
        assert!(matches!(
            read_prevlen(&[END], 0, 1),
            Err(DecodeError::InvalidEncoding { byte: END, .. })
        ));
    }

    #[test]
    fn non_minimal_prevlen_is_accepted() {
        let buf = [0xFE, 3, 0, 0, 0, 0xF2, END];
        let e = decode_entry(&buf, 0, 6).unwrap();
        assert_eq!((e.prev_len, e.prev_len_size), (3, 5));
        assert_eq!(e.encoding, Encoding::Imm(1));
    }

    #[test]
    fn header_round_trips() {
        let mut buf = [0u8; 11];
        let h = ListHeader {
            total_len: 11,
            tail: 10,
            count: 0,
        };
        h.write(&mut buf);
        assert_eq!(ListHeader::read(&buf).unwrap(), h);
        assert_eq!(h, ListHeader::empty());
        assert_eq!(
            ListHeader::read(&buf[..5]),
            Err(DecodeError::Truncated { len: 5 })
        );
    }
}
