//! Binary buffer writer with auto-growing capacity.

/// A binary buffer writer that grows automatically as needed.
///
/// # Example
///
/// ```
/// use ycrdt_buffers::Writer;
///
/// let mut writer = Writer::new();
/// writer.u8(0x01);
/// writer.var_uint(300);
/// let data = writer.flush();
/// assert_eq!(data, [0x01, 0xac, 0x02]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Writer {
    /// The underlying byte buffer.
    pub uint8: Vec<u8>,
}

impl Writer {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self { uint8: Vec::new() }
    }

    /// Creates a writer with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { uint8: Vec::with_capacity(capacity) }
    }

    /// Number of bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.uint8.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.uint8.is_empty()
    }

    /// Returns the written data and leaves the writer empty.
    pub fn flush(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.uint8)
    }

    /// Consumes the writer, returning the written data.
    pub fn into_inner(self) -> Vec<u8> {
        self.uint8
    }

    /// Writes an unsigned 8-bit integer.
    #[inline]
    pub fn u8(&mut self, val: u8) {
        self.uint8.push(val);
    }

    /// Writes raw bytes without a length prefix.
    #[inline]
    pub fn buf(&mut self, data: &[u8]) {
        self.uint8.extend_from_slice(data);
    }

    /// Writes a 32-bit float (big-endian).
    #[inline]
    pub fn f32(&mut self, val: f32) {
        self.buf(&val.to_be_bytes());
    }

    /// Writes a 64-bit float (big-endian).
    #[inline]
    pub fn f64(&mut self, val: f64) {
        self.buf(&val.to_be_bytes());
    }

    /// Writes a signed 64-bit integer (big-endian).
    #[inline]
    pub fn i64(&mut self, val: i64) {
        self.buf(&val.to_be_bytes());
    }

    /// Writes an unsigned variable-length integer.
    ///
    /// Little-endian groups of 7 bits; the high bit of each byte flags that
    /// another byte follows.
    pub fn var_uint(&mut self, mut num: u64) {
        while num > 0x7F {
            self.uint8.push(0x80 | (num & 0x7F) as u8);
            num >>= 7;
        }
        self.uint8.push(num as u8);
    }

    /// Writes a signed variable-length integer.
    ///
    /// First byte layout: `|c s xxxxxx|` — continuation flag, sign flag and
    /// the lowest 6 bits of the magnitude. Following bytes are plain 7-bit
    /// groups as in [`Writer::var_uint`].
    pub fn var_int(&mut self, num: i64) {
        self.var_int_parts(num.unsigned_abs(), num < 0);
    }

    /// Writes a signed variable-length integer given as magnitude and sign.
    ///
    /// Allows encoding a negative zero, which the optimized RLE codecs use to
    /// flag that a run length follows a zero value.
    pub fn var_int_parts(&mut self, magnitude: u64, negative: bool) {
        let mut num = magnitude;
        let cont = if num > 0x3F { 0x80 } else { 0 };
        let sign = if negative { 0x40 } else { 0 };
        self.uint8.push(cont | sign | (num & 0x3F) as u8);
        num >>= 6;
        while num > 0 {
            let cont = if num > 0x7F { 0x80 } else { 0 };
            self.uint8.push(cont | (num & 0x7F) as u8);
            num >>= 7;
        }
    }

    /// Writes a byte array prefixed by its length.
    pub fn var_buf(&mut self, data: &[u8]) {
        self.var_uint(data.len() as u64);
        self.buf(data);
    }

    /// Writes a UTF-8 string prefixed by its byte length.
    pub fn var_string(&mut self, s: &str) {
        self.var_buf(s.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_uint_boundaries() {
        let mut w = Writer::new();
        w.var_uint(0);
        w.var_uint(127);
        w.var_uint(128);
        assert_eq!(w.flush(), [0x00, 0x7f, 0x80, 0x01]);
    }

    #[test]
    fn var_int_sign_bit() {
        let mut w = Writer::new();
        w.var_int(-1);
        w.var_int(63);
        w.var_int(64);
        assert_eq!(w.flush(), [0x41, 0x3f, 0x80, 0x01]);
    }

    #[test]
    fn negative_zero() {
        let mut w = Writer::new();
        w.var_int_parts(0, true);
        assert_eq!(w.flush(), [0x40]);
    }

    #[test]
    fn var_string_is_length_prefixed() {
        let mut w = Writer::new();
        w.var_string("hé");
        assert_eq!(w.flush(), [3, b'h', 0xc3, 0xa9]);
    }
}
