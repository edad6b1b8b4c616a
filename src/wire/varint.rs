//! Varint, zigzag and tag primitives
//!
//! Layout follows the usual tag/length/value conventions: every field starts
//! with a varint holding `field_number << 3 | wire_type`.

use bytes::{BufMut, BytesMut};

use super::error::{WireError, WireResult};

/// Maximum encoded length of a 64-bit varint
pub const MAX_VARINT_LEN: usize = 10;

/// Wire types understood by the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    pub fn as_u8(self) -> u8 {
        match self {
            WireType::Varint => 0,
            WireType::Fixed64 => 1,
            WireType::LengthDelimited => 2,
            WireType::Fixed32 => 5,
        }
    }
}

/// Map a signed value onto the unsigned range so small magnitudes stay short
#[inline]
pub fn zigzag_encode(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

#[inline]
pub fn zigzag_decode(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

pub fn put_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

pub fn put_tag(buf: &mut BytesMut, field: u32, wire_type: WireType) {
    put_varint(buf, (u64::from(field) << 3) | u64::from(wire_type.as_u8()));
}

/// Number of bytes `value` occupies as a varint
pub fn varint_len(value: u64) -> usize {
    let bits = 64 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Cursor over an input slice
///
/// Every read checks the remaining length first, so malformed input surfaces
/// as a [`WireError`] instead of a panic.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_varint(&mut self) -> WireResult<u64> {
        let start = self.pos;
        let mut value: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let Some(&byte) = self.data.get(self.pos) else {
                return Err(WireError::Truncated {
                    offset: start,
                    needed: i + 1,
                    available: self.data.len() - start,
                });
            };
            self.pos += 1;
            value |= u64::from(byte & 0x7F) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(WireError::VarintOverflow { offset: start })
    }

    /// Read a tag, returning the field number and raw wire type
    pub fn read_tag(&mut self) -> WireResult<(u32, u8)> {
        let tag = self.read_varint()?;
        Ok(((tag >> 3) as u32, (tag & 0x7) as u8))
    }

    pub fn read_bytes(&mut self, len: usize) -> WireResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(WireError::Truncated {
                offset: self.pos,
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a length prefix followed by that many bytes
    pub fn read_length_delimited(&mut self) -> WireResult<&'a [u8]> {
        let offset = self.pos;
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| WireError::Truncated {
            offset,
            needed: usize::MAX,
            available: self.remaining(),
        })?;
        self.read_bytes(len)
    }

    pub fn read_sint32(&mut self, field: u32) -> WireResult<i32> {
        let raw = self.read_varint()?;
        let raw = u32::try_from(raw).map_err(|_| WireError::ValueOutOfRange { field })?;
        Ok(zigzag_decode(raw))
    }

    pub fn read_uint32(&mut self, field: u32) -> WireResult<u32> {
        let raw = self.read_varint()?;
        u32::try_from(raw).map_err(|_| WireError::ValueOutOfRange { field })
    }

    pub fn read_int64(&mut self) -> WireResult<i64> {
        Ok(self.read_varint()? as i64)
    }

    pub fn read_bool(&mut self) -> WireResult<bool> {
        Ok(self.read_varint()? != 0)
    }

    pub fn read_string(&mut self, field: u32) -> WireResult<&'a str> {
        let bytes = self.read_length_delimited()?;
        std::str::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8 { field })
    }

    /// Skip a field whose number is not recognized at this nesting level
    pub fn skip(&mut self, field: u32, wire_type: u8) -> WireResult<()> {
        match wire_type {
            0 => self.read_varint().map(|_| ()),
            1 => self.read_bytes(8).map(|_| ()),
            2 => self.read_length_delimited().map(|_| ()),
            5 => self.read_bytes(4).map(|_| ()),
            other => Err(WireError::InvalidWireType {
                field,
                wire_type: other,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_single_and_multi_byte() {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, 1);
        put_varint(&mut buf, 300);
        assert_eq!(&buf[..], &[0x01, 0xAC, 0x02]);

        let mut reader = Reader::new(&buf);
        assert_eq!(reader.read_varint().unwrap(), 1);
        assert_eq!(reader.read_varint().unwrap(), 300);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_varint_len_matches_encoding() {
        for value in [0u64, 1, 127, 128, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut buf = BytesMut::new();
            put_varint(&mut buf, value);
            assert_eq!(buf.len(), varint_len(value), "value {value}");
        }
    }

    #[test]
    fn test_zigzag_keeps_small_values_small() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        for v in [i32::MIN, -65_536, -1, 0, 1, 65_536, i32::MAX] {
            assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        }
    }

    #[test]
    fn test_truncated_varint_fails() {
        let mut reader = Reader::new(&[0x80, 0x80]);
        assert!(matches!(
            reader.read_varint(),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn test_overlong_varint_fails() {
        let data = [0xFFu8; 11];
        let mut reader = Reader::new(&data);
        assert_eq!(
            reader.read_varint(),
            Err(WireError::VarintOverflow { offset: 0 })
        );
    }

    #[test]
    fn test_length_past_end_fails() {
        // declared length 5, only 2 bytes follow
        let mut reader = Reader::new(&[0x05, 0x01, 0x02]);
        assert!(matches!(
            reader.read_length_delimited(),
            Err(WireError::Truncated { needed: 5, .. })
        ));
    }

    #[test]
    fn test_skip_unknown_wire_type() {
        let mut reader = Reader::new(&[]);
        assert_eq!(
            reader.skip(9, 3),
            Err(WireError::InvalidWireType {
                field: 9,
                wire_type: 3
            })
        );
    }
}
