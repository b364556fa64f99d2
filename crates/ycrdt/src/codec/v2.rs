//! Columnar update format.
//!
//! Layout: a feature-flag varint (always 0), nine length-prefixed column
//! streams in a fixed order, then the rest stream appended without a length
//! prefix:
//!
//! 1. key clock (diff RLE)
//! 2. client (uint RLE)
//! 3. left clock (diff RLE)
//! 4. right clock (diff RLE)
//! 5. info byte (RLE)
//! 6. string
//! 7. parent info (RLE)
//! 8. type ref (uint RLE)
//! 9. length (uint RLE)

use std::collections::HashMap;
use std::sync::Arc;

use ycrdt_buffers::{
    IntDiffOptRleDecoder, IntDiffOptRleEncoder, Reader, RleDecoder, RleEncoder, StringDecoder,
    StringEncoder, UintOptRleDecoder, UintOptRleEncoder, Writer,
};

use super::{Decoder, Encoder};
use crate::any::Any;
use crate::error::{Error, Result};
use crate::id::{clock_from_u64, ClientID, ID};

fn clock_from_i64(v: i64) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::InvalidRange { clock: v as u64, len: 0 })
}

#[derive(Debug, Default)]
pub struct EncoderV2 {
    rest: Writer,
    key_clock: IntDiffOptRleEncoder,
    key_map: HashMap<String, u64>,
    next_key_clock: u64,
    client: UintOptRleEncoder,
    left_clock: IntDiffOptRleEncoder,
    right_clock: IntDiffOptRleEncoder,
    info: RleEncoder,
    string: StringEncoder,
    parent_info: RleEncoder,
    type_ref: UintOptRleEncoder,
    len: UintOptRleEncoder,
    ds_curr_val: u32,
}

impl EncoderV2 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Encoder for EncoderV2 {
    fn rest(&mut self) -> &mut Writer {
        &mut self.rest
    }

    fn write_left_id(&mut self, id: &ID) {
        self.client.write(id.client);
        self.left_clock.write(id.clock as i64);
    }

    fn write_right_id(&mut self, id: &ID) {
        self.client.write(id.client);
        self.right_clock.write(id.clock as i64);
    }

    fn write_client(&mut self, client: ClientID) {
        self.client.write(client);
    }

    fn write_info(&mut self, info: u8) {
        self.info.write(info);
    }

    fn write_string(&mut self, s: &str) {
        self.string.write(s);
    }

    fn write_parent_info(&mut self, is_root_name: bool) {
        self.parent_info.write(is_root_name as u8);
    }

    fn write_type_ref(&mut self, type_ref: u8) {
        self.type_ref.write(type_ref as u64);
    }

    fn write_len(&mut self, len: u32) {
        self.len.write(len as u64);
    }

    fn write_any(&mut self, any: &Any) {
        any.encode(&mut self.rest);
    }

    fn write_buf(&mut self, buf: &[u8]) {
        self.rest.var_buf(buf);
    }

    fn write_json(&mut self, value: &Any) {
        value.encode(&mut self.rest);
    }

    /// Repeated keys are written as the clock of their first occurrence.
    fn write_key(&mut self, key: &str) {
        match self.key_map.get(key) {
            Some(clock) => self.key_clock.write(*clock as i64),
            None => {
                let clock = self.next_key_clock;
                self.next_key_clock += 1;
                self.key_clock.write(clock as i64);
                self.string.write(key);
                self.key_map.insert(key.to_owned(), clock);
            }
        }
    }

    fn reset_ds_cur_val(&mut self) {
        self.ds_curr_val = 0;
    }

    /// Ranges of one client must be written in ascending clock order.
    fn write_ds_clock(&mut self, clock: u32) {
        debug_assert!(clock >= self.ds_curr_val);
        let diff = clock.saturating_sub(self.ds_curr_val);
        self.ds_curr_val = clock;
        self.rest.var_uint(diff as u64);
    }

    fn write_ds_len(&mut self, len: u32) {
        debug_assert!(len > 0);
        self.rest.var_uint(len.saturating_sub(1) as u64);
        self.ds_curr_val += len;
    }

    fn to_vec(self) -> Vec<u8> {
        let mut w = Writer::new();
        w.var_uint(0);
        w.var_buf(&self.key_clock.finish());
        w.var_buf(&self.client.finish());
        w.var_buf(&self.left_clock.finish());
        w.var_buf(&self.right_clock.finish());
        w.var_buf(&self.info.finish());
        w.var_buf(&self.string.finish());
        w.var_buf(&self.parent_info.finish());
        w.var_buf(&self.type_ref.finish());
        w.var_buf(&self.len.finish());
        w.buf(&self.rest.into_inner());
        w.into_inner()
    }
}

#[derive(Debug)]
pub struct DecoderV2<'a> {
    rest: Reader<'a>,
    keys: Vec<Arc<str>>,
    key_clock: IntDiffOptRleDecoder<'a>,
    client: UintOptRleDecoder<'a>,
    left_clock: IntDiffOptRleDecoder<'a>,
    right_clock: IntDiffOptRleDecoder<'a>,
    info: RleDecoder<'a>,
    string: StringDecoder<'a>,
    parent_info: RleDecoder<'a>,
    type_ref: UintOptRleDecoder<'a>,
    len: UintOptRleDecoder<'a>,
    ds_curr_val: u32,
}

impl<'a> Decoder<'a> for DecoderV2<'a> {
    fn new(data: &'a [u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        // feature flag, currently unused
        r.var_uint()?;
        let key_clock = IntDiffOptRleDecoder::new(r.var_buf()?);
        let client = UintOptRleDecoder::new(r.var_buf()?);
        let left_clock = IntDiffOptRleDecoder::new(r.var_buf()?);
        let right_clock = IntDiffOptRleDecoder::new(r.var_buf()?);
        let info = RleDecoder::new(r.var_buf()?);
        let string = StringDecoder::new(r.var_buf()?)?;
        let parent_info = RleDecoder::new(r.var_buf()?);
        let type_ref = UintOptRleDecoder::new(r.var_buf()?);
        let len = UintOptRleDecoder::new(r.var_buf()?);
        Ok(Self {
            rest: Reader::new(r.remaining()),
            keys: Vec::new(),
            key_clock,
            client,
            left_clock,
            right_clock,
            info,
            string,
            parent_info,
            type_ref,
            len,
            ds_curr_val: 0,
        })
    }

    fn rest(&mut self) -> &mut Reader<'a> {
        &mut self.rest
    }

    fn read_left_id(&mut self) -> Result<ID> {
        let client = self.client.read()?;
        Ok(ID::new(client, clock_from_i64(self.left_clock.read()?)?))
    }

    fn read_right_id(&mut self) -> Result<ID> {
        let client = self.client.read()?;
        Ok(ID::new(client, clock_from_i64(self.right_clock.read()?)?))
    }

    fn read_client(&mut self) -> Result<ClientID> {
        Ok(self.client.read()?)
    }

    fn read_info(&mut self) -> Result<u8> {
        Ok(self.info.read()?)
    }

    fn read_string(&mut self) -> Result<&'a str> {
        Ok(self.string.read()?)
    }

    fn read_parent_info(&mut self) -> Result<bool> {
        Ok(self.parent_info.read()? == 1)
    }

    fn read_type_ref(&mut self) -> Result<u64> {
        Ok(self.type_ref.read()?)
    }

    fn read_len(&mut self) -> Result<u32> {
        clock_from_u64(self.len.read()?)
    }

    fn read_any(&mut self) -> Result<Any> {
        Any::decode(&mut self.rest)
    }

    fn read_buf(&mut self) -> Result<&'a [u8]> {
        Ok(self.rest.var_buf()?)
    }

    fn read_json(&mut self) -> Result<Any> {
        Any::decode(&mut self.rest)
    }

    fn read_key(&mut self) -> Result<Arc<str>> {
        let clock = self.key_clock.read()?;
        if let Ok(idx) = usize::try_from(clock) {
            if let Some(key) = self.keys.get(idx) {
                return Ok(key.clone());
            }
        }
        let key: Arc<str> = Arc::from(self.string.read()?);
        self.keys.push(key.clone());
        Ok(key)
    }

    fn reset_ds_cur_val(&mut self) {
        self.ds_curr_val = 0;
    }

    fn read_ds_clock(&mut self) -> Result<u32> {
        let diff = clock_from_u64(self.rest.var_uint()?)?;
        self.ds_curr_val = self
            .ds_curr_val
            .checked_add(diff)
            .ok_or(Error::InvalidRange { clock: diff as u64, len: 0 })?;
        Ok(self.ds_curr_val)
    }

    fn read_ds_len(&mut self) -> Result<u32> {
        let raw = self.rest.var_uint()?;
        let len = raw
            .checked_add(1)
            .ok_or(Error::InvalidRange { clock: self.ds_curr_val as u64, len: raw })?;
        let len = clock_from_u64(len)?;
        self.ds_curr_val = self
            .ds_curr_val
            .checked_add(len)
            .ok_or(Error::InvalidRange { clock: self.ds_curr_val as u64, len: len as u64 })?;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_encoder_layout() {
        let data = EncoderV2::new().to_vec();
        // flag, nine empty columns; the string column holds an empty string
        // and an empty length stream
        assert_eq!(data, [0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn columns_are_read_back_independently() {
        let mut e = EncoderV2::new();
        e.write_info(0x84);
        e.write_left_id(&ID::new(7, 3));
        e.write_key("bold");
        e.write_right_id(&ID::new(7, 9));
        e.write_key("bold");
        e.write_len(5);
        e.write_buf(&[1, 2]);
        let data = e.to_vec();

        let mut d = DecoderV2::new(&data).unwrap();
        assert_eq!(d.read_info().unwrap(), 0x84);
        assert_eq!(d.read_left_id().unwrap(), ID::new(7, 3));
        assert_eq!(&*d.read_key().unwrap(), "bold");
        assert_eq!(d.read_right_id().unwrap(), ID::new(7, 9));
        assert_eq!(&*d.read_key().unwrap(), "bold");
        assert_eq!(d.read_len().unwrap(), 5);
        assert_eq!(d.read_buf().unwrap(), [1, 2]);
    }

    #[test]
    fn delete_set_clocks_are_relative() {
        let mut e = EncoderV2::new();
        e.reset_ds_cur_val();
        e.write_ds_clock(4);
        e.write_ds_len(2);
        e.write_ds_clock(10);
        e.write_ds_len(1);
        let data = e.to_vec();
        assert_eq!(&data[11..], [4, 1, 4, 0]);

        let mut d = DecoderV2::new(&data).unwrap();
        d.reset_ds_cur_val();
        assert_eq!(d.read_ds_clock().unwrap(), 4);
        assert_eq!(d.read_ds_len().unwrap(), 2);
        assert_eq!(d.read_ds_clock().unwrap(), 10);
        assert_eq!(d.read_ds_len().unwrap(), 1);
    }

    #[test]
    fn oversized_delete_length_is_rejected() {
        let mut data = EncoderV2::new().to_vec();
        let mut tail = Writer::new();
        tail.var_uint(0);
        tail.var_uint(u64::MAX);
        data.extend(tail.into_inner());

        let mut d = DecoderV2::new(&data).unwrap();
        d.reset_ds_cur_val();
        assert_eq!(d.read_ds_clock().unwrap(), 0);
        assert!(matches!(d.read_ds_len(), Err(Error::InvalidRange { .. })));
    }

    #[test]
    fn update_with_oversized_delete_length_fails_to_decode() {
        let mut data = EncoderV2::new().to_vec();
        let mut tail = Writer::new();
        // no structs; one client with one range at clock 0
        for v in [0, 1, 1, 1, 0, u64::MAX] {
            tail.var_uint(v);
        }
        data.extend(tail.into_inner());
        let err = crate::update::Update::decode_v2(&data).unwrap_err();
        assert!(matches!(err, Error::InvalidRange { .. }));
    }
}
