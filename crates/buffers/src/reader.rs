//! Binary buffer reader with cursor tracking.

use std::str;

use crate::{BufferError, Result};

/// A binary buffer reader over a byte slice.
///
/// Every read is bounds-checked: running past the end yields
/// [`BufferError::UnexpectedEnd`] instead of truncating silently.
///
/// # Example
///
/// ```
/// use ycrdt_buffers::Reader;
///
/// let data = [0x01, 0xac, 0x02];
/// let mut reader = Reader::new(&data);
///
/// assert_eq!(reader.u8().unwrap(), 0x01);
/// assert_eq!(reader.var_uint().unwrap(), 300);
/// assert!(reader.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    /// The underlying byte slice.
    pub uint8: &'a [u8],
    /// Current cursor position.
    pub x: usize,
}

impl<'a> Reader<'a> {
    pub fn new(uint8: &'a [u8]) -> Self {
        Self { uint8, x: 0 }
    }

    /// Number of unread bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.uint8.len() - self.x
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x >= self.uint8.len()
    }

    /// The unread tail of the buffer.
    pub fn remaining(&self) -> &'a [u8] {
        &self.uint8[self.x..]
    }

    /// Reads an unsigned 8-bit integer.
    #[inline]
    pub fn u8(&mut self) -> Result<u8> {
        let val = *self.uint8.get(self.x).ok_or(BufferError::UnexpectedEnd)?;
        self.x += 1;
        Ok(val)
    }

    /// Returns the next `size` bytes and advances the cursor.
    pub fn buf(&mut self, size: usize) -> Result<&'a [u8]> {
        let end = self.x.checked_add(size).ok_or(BufferError::UnexpectedEnd)?;
        if end > self.uint8.len() {
            return Err(BufferError::UnexpectedEnd);
        }
        let bin = &self.uint8[self.x..end];
        self.x = end;
        Ok(bin)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.buf(N)?);
        Ok(out)
    }

    /// Reads a 32-bit float (big-endian).
    pub fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.array()?))
    }

    /// Reads a 64-bit float (big-endian).
    pub fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_be_bytes(self.array()?))
    }

    /// Reads a signed 64-bit integer (big-endian).
    pub fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    /// Reads an unsigned variable-length integer.
    pub fn var_uint(&mut self) -> Result<u64> {
        let mut num: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let r = self.u8()?;
            if shift >= 64 || (shift == 63 && (r & 0x7F) > 1) {
                return Err(BufferError::VarIntOverflow);
            }
            num |= ((r & 0x7F) as u64) << shift;
            if r < 0x80 {
                return Ok(num);
            }
            shift += 7;
        }
    }

    /// Reads a signed variable-length integer as `(magnitude, negative)`.
    ///
    /// Keeps the sign of a negative zero, which a plain `i64` cannot hold.
    pub fn var_int_parts(&mut self) -> Result<(u64, bool)> {
        let r = self.u8()?;
        let negative = r & 0x40 != 0;
        let mut num = (r & 0x3F) as u64;
        if r & 0x80 == 0 {
            return Ok((num, negative));
        }
        let mut shift: u32 = 6;
        loop {
            let r = self.u8()?;
            if shift >= 64 || (shift == 62 && (r & 0x7F) > 3) {
                return Err(BufferError::VarIntOverflow);
            }
            num |= ((r & 0x7F) as u64) << shift;
            if r < 0x80 {
                return Ok((num, negative));
            }
            shift += 7;
        }
    }

    /// Reads a signed variable-length integer.
    pub fn var_int(&mut self) -> Result<i64> {
        let (magnitude, negative) = self.var_int_parts()?;
        let num = i64::try_from(magnitude).map_err(|_| BufferError::VarIntOverflow)?;
        Ok(if negative { -num } else { num })
    }

    /// Reads a length-prefixed byte array.
    pub fn var_buf(&mut self) -> Result<&'a [u8]> {
        let len = self.var_uint()?;
        let len = usize::try_from(len).map_err(|_| BufferError::UnexpectedEnd)?;
        self.buf(len)
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn var_string(&mut self) -> Result<&'a str> {
        let bytes = self.var_buf()?;
        str::from_utf8(bytes).map_err(|_| BufferError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Writer;

    #[test]
    fn reads_back_var_ints() {
        let mut w = Writer::new();
        for n in [0i64, 1, -1, 63, -64, 1 << 20, -(1 << 40), i64::MAX, -i64::MAX] {
            w.var_int(n);
        }
        let data = w.flush();
        let mut r = Reader::new(&data);
        for n in [0i64, 1, -1, 63, -64, 1 << 20, -(1 << 40), i64::MAX, -i64::MAX] {
            assert_eq!(r.var_int().unwrap(), n);
        }
        assert!(r.is_empty());
    }

    #[test]
    fn max_var_uint() {
        let mut w = Writer::new();
        w.var_uint(u64::MAX);
        let data = w.flush();
        assert_eq!(Reader::new(&data).var_uint().unwrap(), u64::MAX);
    }

    #[test]
    fn truncated_input_is_an_error() {
        let mut r = Reader::new(&[0x80]);
        assert_eq!(r.var_uint(), Err(BufferError::UnexpectedEnd));
        let mut r = Reader::new(&[5, b'a']);
        assert_eq!(r.var_string(), Err(BufferError::UnexpectedEnd));
        let mut r = Reader::new(&[]);
        assert_eq!(r.u8(), Err(BufferError::UnexpectedEnd));
    }

    #[test]
    fn overlong_var_uint_overflows() {
        let data = [0xff; 11];
        assert_eq!(Reader::new(&data).var_uint(), Err(BufferError::VarIntOverflow));
    }

    #[test]
    fn invalid_utf8() {
        let mut r = Reader::new(&[2, 0xc3, 0x28]);
        assert_eq!(r.var_string(), Err(BufferError::InvalidUtf8));
    }
}
