//! Byte codec from Orange Paper Section 4.1 (C1)
//!
//! Readers and writers over a byte range with an *exhaustion* flag and an
//! optional *limit*. Reading past the end or past a set limit invalidates
//! the reader without panicking; callers check `is_valid()` after a parse.
//! Writing into a bounded sink that would overflow fails fast and returns
//! an error rather than partially writing.

use crate::error::{ConsensusError, Result};

/// A cursor over an in-memory byte slice.
///
/// Mirrors the teacher's error-as-value discipline: no method panics on
/// malformed input. Once `valid` goes false it stays false; every read
/// after that point returns `UnexpectedEnd` without touching `position`.
pub struct Reader<'a> {
    data: &'a [u8],
    position: usize,
    limit: Option<usize>,
    valid: bool,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Reader { data, position: 0, limit: None, valid: true }
    }

    /// Construct a reader that additionally fails once `limit` bytes have
    /// been consumed, even if `data` is longer (used to bound a
    /// length-prefixed sub-region such as a witness element).
    pub fn with_limit(data: &'a [u8], limit: usize) -> Self {
        Reader { data, position: 0, limit: Some(limit), valid: true }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn check_limit(&self, len: usize) -> bool {
        match self.limit {
            Some(limit) => self.position + len <= limit,
            None => true,
        }
    }

    /// Read `len` raw bytes, advancing the cursor. Returns an empty slice
    /// and invalidates the reader on exhaustion or limit violation.
    pub fn read_bytes(&mut self, len: usize) -> &'a [u8] {
        if !self.valid || len > self.remaining() || !self.check_limit(len) {
            self.valid = false;
            return &[];
        }
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        slice
    }

    pub fn read_array<const N: usize>(&mut self) -> [u8; N] {
        let bytes = self.read_bytes(N);
        let mut out = [0u8; N];
        if bytes.len() == N {
            out.copy_from_slice(bytes);
        } else {
            self.valid = false;
        }
        out
    }

    pub fn read_u8(&mut self) -> u8 {
        let bytes = self.read_bytes(1);
        bytes.first().copied().unwrap_or(0)
    }

    pub fn read_u16_le(&mut self) -> u16 {
        u16::from_le_bytes(self.read_array())
    }

    pub fn read_u32_le(&mut self) -> u32 {
        u32::from_le_bytes(self.read_array())
    }

    pub fn read_u64_le(&mut self) -> u64 {
        u64::from_le_bytes(self.read_array())
    }

    pub fn read_i64_le(&mut self) -> i64 {
        i64::from_le_bytes(self.read_array())
    }

    pub fn read_u32_be(&mut self) -> u32 {
        u32::from_be_bytes(self.read_array())
    }

    /// Bitcoin varint: 1 byte for <0xfd, 0xfd+u16 for <=0xffff, 0xfe+u32,
    /// 0xff+u64. Non-canonical (e.g. 0xfd-prefixed value that fits in one
    /// byte) is accepted on read per upstream behavior; this crate does not
    /// enforce minimal varint encoding since no consensus rule does either.
    pub fn read_varint(&mut self) -> u64 {
        if !self.valid {
            return 0;
        }
        let prefix = self.read_u8();
        match prefix {
            0xfd => self.read_u16_le() as u64,
            0xfe => self.read_u32_le() as u64,
            0xff => self.read_u64_le(),
            n => n as u64,
        }
    }

    /// Length-prefixed byte string: varint length, then that many bytes.
    pub fn read_var_bytes(&mut self) -> Vec<u8> {
        let len = self.read_varint();
        self.read_bytes(len as usize).to_vec()
    }

    /// Finish the read, producing an error if the reader was ever invalidated.
    pub fn finish(self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(ConsensusError::UnexpectedEnd("reader"))
        }
    }
}

/// A growable or bounded byte sink.
pub struct Writer {
    data: Vec<u8>,
    limit: Option<usize>,
}

impl Writer {
    pub fn new() -> Self {
        Writer { data: Vec::new(), limit: None }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Writer { data: Vec::with_capacity(capacity), limit: None }
    }

    /// A sink that refuses to grow past `limit` bytes.
    pub fn bounded(limit: usize) -> Self {
        Writer { data: Vec::with_capacity(limit.min(1 << 20)), limit: Some(limit) }
    }

    fn check(&self, additional: usize) -> Result<()> {
        if let Some(limit) = self.limit {
            if self.data.len() + additional > limit {
                return Err(ConsensusError::SinkOverflow("writer"));
            }
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.check(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_bytes(&[v])
    }

    pub fn write_u16_le(&mut self, v: u16) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_u32_le(&mut self, v: u32) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_u64_le(&mut self, v: u64) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_i64_le(&mut self, v: i64) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        self.write_bytes(&encode_varint(value))
    }

    pub fn write_var_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_varint(bytes.len() as u64)?;
        self.write_bytes(bytes)
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

/// Standalone varint encoder, used where only the bytes (not a sink) are wanted.
pub fn encode_varint(value: u64) -> Vec<u8> {
    if value < 0xfd {
        vec![value as u8]
    } else if value <= 0xffff {
        let mut out = vec![0xfd];
        out.extend_from_slice(&(value as u16).to_le_bytes());
        out
    } else if value <= 0xffff_ffff {
        let mut out = vec![0xfe];
        out.extend_from_slice(&(value as u32).to_le_bytes());
        out
    } else {
        let mut out = vec![0xff];
        out.extend_from_slice(&value.to_le_bytes());
        out
    }
}

/// Serialized size of a varint encoding of `value`, without allocating.
pub fn varint_size(value: u64) -> usize {
    if value < 0xfd {
        1
    } else if value <= 0xffff {
        3
    } else if value <= 0xffff_ffff {
        5
    } else {
        9
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_round_trip() {
        for value in [0u64, 1, 252, 253, 254, 0xffff, 0x1_0000, u32::MAX as u64, u64::MAX] {
            let encoded = encode_varint(value);
            assert_eq!(encoded.len(), varint_size(value));
            let mut reader = Reader::new(&encoded);
            assert_eq!(reader.read_varint(), value);
            assert!(reader.is_valid());
        }
    }

    #[test]
    fn test_varint_boundaries() {
        assert_eq!(encode_varint(0), vec![0]);
        assert_eq!(encode_varint(252), vec![252]);
        assert_eq!(encode_varint(253), vec![0xfd, 253, 0]);
        assert_eq!(encode_varint(65535), vec![0xfd, 255, 255]);
        assert_eq!(encode_varint(65536), vec![0xfe, 0, 0, 1, 0]);
    }

    #[test]
    fn test_reader_exhaustion_invalidates() {
        let data = [1u8, 2, 3];
        let mut reader = Reader::new(&data);
        let _ = reader.read_bytes(4);
        assert!(!reader.is_valid());
        assert!(reader.finish().is_err());
    }

    #[test]
    fn test_reader_limit() {
        let data = [1u8, 2, 3, 4, 5];
        let mut reader = Reader::with_limit(&data, 3);
        let _ = reader.read_bytes(3);
        assert!(reader.is_valid());
        let _ = reader.read_bytes(1);
        assert!(!reader.is_valid());
    }

    #[test]
    fn test_writer_bounded_overflow() {
        let mut writer = Writer::bounded(4);
        assert!(writer.write_bytes(&[1, 2, 3, 4]).is_ok());
        assert!(writer.write_bytes(&[5]).is_err());
    }

    #[test]
    fn test_writer_var_bytes() {
        let mut writer = Writer::new();
        writer.write_var_bytes(&[1, 2, 3]).unwrap();
        assert_eq!(writer.into_vec(), vec![3, 1, 2, 3]);
    }

    #[test]
    fn test_read_u32_le_matches_bitcoin_wire_order() {
        let data = [0x01, 0x00, 0x00, 0x00];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.read_u32_le(), 1);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_varint_round_trip(value in any::<u64>()) {
            let encoded = encode_varint(value);
            let mut reader = Reader::new(&encoded);
            let decoded = reader.read_varint();
            prop_assert!(reader.is_valid());
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(encoded.len(), varint_size(value));
        }

        #[test]
        fn prop_var_bytes_round_trip(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            let mut writer = Writer::new();
            writer.write_var_bytes(&bytes).unwrap();
            let serialized = writer.into_vec();
            let mut reader = Reader::new(&serialized);
            let decoded = reader.read_var_bytes();
            prop_assert!(reader.is_valid());
            prop_assert_eq!(decoded, bytes);
        }
    }
}
