//! Run-length and delta column codecs.
//!
//! Each encoder accumulates one logical column of values and is serialized
//! with `finish`; the matching decoder replays the column value by value.
//! Run lengths are stored off by one or two ("non-standard" but compact),
//! because a run always holds at least one value and the optimized codecs
//! only write a length for runs of two or more.

use crate::{BufferError, Reader, Result, Writer};

// ── RleEncoder / RleDecoder ───────────────────────────────────────────────

/// Plain run-length encoding of bytes: `value, count - 1, value, ...`.
///
/// The count of the final run is omitted; the decoder repeats the last value
/// once its input is exhausted.
#[derive(Debug, Default)]
pub struct RleEncoder {
    w: Writer,
    s: Option<u8>,
    count: u64,
}

impl RleEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, v: u8) {
        if self.s == Some(v) {
            self.count += 1;
        } else {
            if self.count > 0 {
                self.w.var_uint(self.count - 1);
            }
            self.count = 1;
            self.w.u8(v);
            self.s = Some(v);
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.w.into_inner()
    }
}

#[derive(Debug)]
pub struct RleDecoder<'a> {
    r: Reader<'a>,
    s: u8,
    /// Remaining repetitions of `s`; negative once the column is exhausted
    /// and `s` repeats forever.
    count: i64,
}

impl<'a> RleDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { r: Reader::new(data), s: 0, count: 0 }
    }

    pub fn read(&mut self) -> Result<u8> {
        if self.count == 0 {
            self.s = self.r.u8()?;
            if self.r.is_empty() {
                self.count = -1;
            } else {
                let n = self.r.var_uint()?;
                self.count = i64::try_from(n)
                    .ok()
                    .and_then(|n| n.checked_add(1))
                    .ok_or(BufferError::VarIntOverflow)?;
            }
        }
        self.count -= 1;
        Ok(self.s)
    }
}

// ── UintOptRleEncoder / UintOptRleDecoder ────────────────────────────────

/// Optimized RLE for unsigned integers.
///
/// A single value is written as a positive signed varint. A run is written
/// as the negated value (negative zero included) followed by `count - 2`.
#[derive(Debug, Default)]
pub struct UintOptRleEncoder {
    w: Writer,
    s: u64,
    count: u64,
}

impl UintOptRleEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, v: u64) {
        if self.count > 0 && self.s == v {
            self.count += 1;
        } else {
            self.flush();
            self.count = 1;
            self.s = v;
        }
    }

    fn flush(&mut self) {
        if self.count > 0 {
            self.w.var_int_parts(self.s, self.count > 1);
            if self.count > 1 {
                self.w.var_uint(self.count - 2);
            }
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.flush();
        self.w.into_inner()
    }
}

#[derive(Debug)]
pub struct UintOptRleDecoder<'a> {
    r: Reader<'a>,
    s: u64,
    count: u64,
}

impl<'a> UintOptRleDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { r: Reader::new(data), s: 0, count: 0 }
    }

    pub fn read(&mut self) -> Result<u64> {
        if self.count == 0 {
            let (s, negative) = self.r.var_int_parts()?;
            self.s = s;
            self.count = 1;
            if negative {
                self.count = self
                    .r
                    .var_uint()?
                    .checked_add(2)
                    .ok_or(BufferError::VarIntOverflow)?;
            }
        }
        self.count -= 1;
        Ok(self.s)
    }
}

// ── IntDiffOptRleEncoder / IntDiffOptRleDecoder ──────────────────────────

/// Delta encoding of integers with run-length compression of equal deltas.
///
/// Each entry is `diff * 2 + has_count` as a signed varint, followed by
/// `count - 2` when `has_count` is set. Monotonic clocks with a constant
/// step collapse into a single entry.
#[derive(Debug, Default)]
pub struct IntDiffOptRleEncoder {
    w: Writer,
    s: i64,
    count: u64,
    diff: i64,
}

impl IntDiffOptRleEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, v: i64) {
        if self.count > 0 && self.diff == v - self.s {
            self.s = v;
            self.count += 1;
        } else {
            self.flush();
            self.count = 1;
            self.diff = v - self.s;
            self.s = v;
        }
    }

    fn flush(&mut self) {
        if self.count > 0 {
            let encoded = self.diff * 2 + if self.count == 1 { 0 } else { 1 };
            self.w.var_int(encoded);
            if self.count > 1 {
                self.w.var_uint(self.count - 2);
            }
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.flush();
        self.w.into_inner()
    }
}

#[derive(Debug)]
pub struct IntDiffOptRleDecoder<'a> {
    r: Reader<'a>,
    s: i64,
    count: u64,
    diff: i64,
}

impl<'a> IntDiffOptRleDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { r: Reader::new(data), s: 0, count: 0, diff: 0 }
    }

    pub fn read(&mut self) -> Result<i64> {
        if self.count == 0 {
            let diff = self.r.var_int()?;
            let has_count = diff & 1 != 0;
            self.diff = diff >> 1;
            self.count = 1;
            if has_count {
                self.count = self
                    .r
                    .var_uint()?
                    .checked_add(2)
                    .ok_or(BufferError::VarIntOverflow)?;
            }
        }
        self.s = self.s.wrapping_add(self.diff);
        self.count -= 1;
        Ok(self.s)
    }
}

// ── StringEncoder / StringDecoder ────────────────────────────────────────

/// Concatenates all strings of a column into one UTF-8 string and stores
/// the individual lengths (in UTF-16 code units) in a [`UintOptRleEncoder`].
#[derive(Debug, Default)]
pub struct StringEncoder {
    s: String,
    lens: UintOptRleEncoder,
}

impl StringEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, string: &str) {
        self.s.push_str(string);
        self.lens.write(string.encode_utf16().count() as u64);
    }

    pub fn finish(self) -> Vec<u8> {
        let mut w = Writer::with_capacity(self.s.len() + 8);
        w.var_string(&self.s);
        w.buf(&self.lens.finish());
        w.into_inner()
    }
}

#[derive(Debug)]
pub struct StringDecoder<'a> {
    s: &'a str,
    /// Byte offset of the next unread string.
    pos: usize,
    lens: UintOptRleDecoder<'a>,
}

impl<'a> StringDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let s = r.var_string()?;
        Ok(Self { s, pos: 0, lens: UintOptRleDecoder::new(r.remaining()) })
    }

    pub fn read(&mut self) -> Result<&'a str> {
        let mut units = self.lens.read()?;
        let rest = &self.s[self.pos..];
        let mut end = 0;
        let mut chars = rest.chars();
        while units > 0 {
            let c = chars.next().ok_or(BufferError::UnexpectedEnd)?;
            units = units.saturating_sub(c.len_utf16() as u64);
            end += c.len_utf8();
        }
        self.pos += end;
        Ok(&rest[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rle_repeats_last_value_forever() {
        let mut e = RleEncoder::new();
        for v in [1, 1, 1, 7, 0] {
            e.write(v);
        }
        let data = e.finish();
        assert_eq!(data, [1, 2, 7, 0, 0]);
        let mut d = RleDecoder::new(&data);
        let read: Vec<u8> = (0..7).map(|_| d.read().unwrap()).collect();
        assert_eq!(read, [1, 1, 1, 7, 0, 0, 0]);
    }

    #[test]
    fn uint_opt_rle_runs_of_zero() {
        let mut e = UintOptRleEncoder::new();
        for v in [0, 0, 0, 5, 9, 9] {
            e.write(v);
        }
        let data = e.finish();
        // -0 run of 3, single 5, -9 run of 2
        assert_eq!(data, [0x40, 1, 5, 0x49, 0]);
        let mut d = UintOptRleDecoder::new(&data);
        let read: Vec<u64> = (0..6).map(|_| d.read().unwrap()).collect();
        assert_eq!(read, [0, 0, 0, 5, 9, 9]);
        assert!(d.read().is_err());
    }

    #[test]
    fn int_diff_collapses_constant_steps() {
        let mut e = IntDiffOptRleEncoder::new();
        for v in [3, 4, 5, 6, 2] {
            e.write(v);
        }
        let data = e.finish();
        // diff 3 once, diff 1 three times, diff -4 once
        assert_eq!(data, [6, 3, 1, 0x48]);
        let mut d = IntDiffOptRleDecoder::new(&data);
        let read: Vec<i64> = (0..5).map(|_| d.read().unwrap()).collect();
        assert_eq!(read, [3, 4, 5, 6, 2]);
    }

    #[test]
    fn string_column_splits_by_utf16_length() {
        let mut e = StringEncoder::new();
        for s in ["ab", "", "😀x", "é"] {
            e.write(s);
        }
        let data = e.finish();
        let mut d = StringDecoder::new(&data).unwrap();
        assert_eq!(d.read().unwrap(), "ab");
        assert_eq!(d.read().unwrap(), "");
        assert_eq!(d.read().unwrap(), "😀x");
        assert_eq!(d.read().unwrap(), "é");
    }

    #[test]
    fn rle_run_length_overflow_is_an_error() {
        let mut w = Writer::new();
        w.u8(5);
        w.var_uint(i64::MAX as u64);
        let data = w.flush();
        let mut d = RleDecoder::new(&data);
        assert!(matches!(d.read(), Err(BufferError::VarIntOverflow)));
    }
}
