//! Borrowing byte reader for object payloads.

use crate::error::{CodecError, CodecResult};
use crate::vuint;

/// A borrowing cursor over an object payload.
///
/// The inverse of [`crate::Writer`]: varints, strings, and byte runs are
/// read back in the order they were written. All reads are bounds-checked
/// and return [`CodecError`] instead of panicking.
#[derive(Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Creates a reader over `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> CodecResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    /// Reads a varint.
    pub fn read_vuint(&mut self) -> CodecResult<u64> {
        let (value, consumed) = vuint::decode(&self.data[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }

    /// Reads a varint and checks that it fits in 32 bits.
    pub fn read_vu32(&mut self) -> CodecResult<u32> {
        let value = self.read_vuint()?;
        u32::try_from(value).map_err(|_| CodecError::IntegerOverflow { value, width: 32 })
    }

    /// Reads a boolean byte.
    pub fn read_bool(&mut self) -> CodecResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a varint-length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> CodecResult<String> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    /// Reads a varint-length-prefixed byte run.
    pub fn read_bytes(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.read_vuint()?;
        let len = usize::try_from(len).map_err(|_| CodecError::IntegerOverflow {
            value: len,
            width: 64,
        })?;
        self.read_raw(len)
    }

    /// Reads `len` raw bytes.
    pub fn read_raw(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(CodecError::UnexpectedEof)?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Skips over one varint without decoding it.
    pub fn skip_vuint(&mut self) -> CodecResult<()> {
        let first = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        let len = vuint::decoded_len(first);
        if self.pos + len > self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        self.pos += len;
        Ok(())
    }

    /// Returns the current read position.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns the unread remainder of the input.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Returns `true` if all input has been consumed.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_past_end_fails() {
        let mut r = Reader::new(&[1]);
        assert_eq!(r.read_u8().unwrap(), 1);
        assert_eq!(r.read_u8(), Err(CodecError::UnexpectedEof));
    }

    #[test]
    fn read_vu32_rejects_wide_values() {
        let bytes = vuint::encode(u64::from(u32::MAX) + 1);
        let mut r = Reader::new(&bytes);
        assert!(matches!(
            r.read_vu32(),
            Err(CodecError::IntegerOverflow { width: 32, .. })
        ));
    }

    #[test]
    fn skip_vuint_advances_past_value() {
        let mut buf = vuint::encode(1_000_000);
        buf.push(0x2A);
        let mut r = Reader::new(&buf);
        r.skip_vuint().unwrap();
        assert_eq!(r.read_u8().unwrap(), 0x2A);
        assert!(r.is_eof());
    }

    #[test]
    fn invalid_utf8_string_fails() {
        let mut buf = vuint::encode(2);
        buf.extend_from_slice(&[0xFF, 0xFE]);
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_string(), Err(CodecError::InvalidUtf8));
    }

    #[test]
    fn position_and_remaining_track_reads() {
        let mut r = Reader::new(&[1, 2, 3]);
        assert_eq!(r.position(), 0);
        r.read_u8().unwrap();
        assert_eq!(r.position(), 1);
        assert_eq!(r.remaining(), &[2, 3]);
    }
}
