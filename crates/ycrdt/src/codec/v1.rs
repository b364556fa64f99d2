//! Verbose update format: every field in place, varint encoded.

use std::sync::Arc;

use ycrdt_buffers::{Reader, Writer};

use super::{Decoder, Encoder};
use crate::any::Any;
use crate::error::Result;
use crate::id::{clock_from_u64, ClientID, ID};

#[derive(Debug, Default)]
pub struct EncoderV1 {
    w: Writer,
}

impl EncoderV1 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Encoder for EncoderV1 {
    fn rest(&mut self) -> &mut Writer {
        &mut self.w
    }

    fn write_left_id(&mut self, id: &ID) {
        self.w.var_uint(id.client);
        self.w.var_uint(id.clock as u64);
    }

    fn write_right_id(&mut self, id: &ID) {
        self.write_left_id(id);
    }

    fn write_client(&mut self, client: ClientID) {
        self.w.var_uint(client);
    }

    fn write_info(&mut self, info: u8) {
        self.w.u8(info);
    }

    fn write_string(&mut self, s: &str) {
        self.w.var_string(s);
    }

    fn write_parent_info(&mut self, is_root_name: bool) {
        self.w.var_uint(is_root_name as u64);
    }

    fn write_type_ref(&mut self, type_ref: u8) {
        self.w.var_uint(type_ref as u64);
    }

    fn write_len(&mut self, len: u32) {
        self.w.var_uint(len as u64);
    }

    fn write_any(&mut self, any: &Any) {
        any.encode(&mut self.w);
    }

    fn write_buf(&mut self, buf: &[u8]) {
        self.w.var_buf(buf);
    }

    fn write_json(&mut self, value: &Any) {
        self.w.var_string(&value.to_json_string());
    }

    fn write_key(&mut self, key: &str) {
        self.w.var_string(key);
    }

    fn reset_ds_cur_val(&mut self) {}

    fn write_ds_clock(&mut self, clock: u32) {
        self.w.var_uint(clock as u64);
    }

    fn write_ds_len(&mut self, len: u32) {
        self.w.var_uint(len as u64);
    }

    fn to_vec(self) -> Vec<u8> {
        self.w.into_inner()
    }
}

#[derive(Debug)]
pub struct DecoderV1<'a> {
    r: Reader<'a>,
}

impl<'a> DecoderV1<'a> {
    fn read_clock(&mut self) -> Result<u32> {
        clock_from_u64(self.r.var_uint()?)
    }
}

impl<'a> Decoder<'a> for DecoderV1<'a> {
    fn new(data: &'a [u8]) -> Result<Self> {
        Ok(Self { r: Reader::new(data) })
    }

    fn rest(&mut self) -> &mut Reader<'a> {
        &mut self.r
    }

    fn read_left_id(&mut self) -> Result<ID> {
        let client = self.r.var_uint()?;
        Ok(ID::new(client, self.read_clock()?))
    }

    fn read_right_id(&mut self) -> Result<ID> {
        self.read_left_id()
    }

    fn read_client(&mut self) -> Result<ClientID> {
        Ok(self.r.var_uint()?)
    }

    fn read_info(&mut self) -> Result<u8> {
        Ok(self.r.u8()?)
    }

    fn read_string(&mut self) -> Result<&'a str> {
        Ok(self.r.var_string()?)
    }

    fn read_parent_info(&mut self) -> Result<bool> {
        Ok(self.r.var_uint()? == 1)
    }

    fn read_type_ref(&mut self) -> Result<u64> {
        Ok(self.r.var_uint()?)
    }

    fn read_len(&mut self) -> Result<u32> {
        self.read_clock()
    }

    fn read_any(&mut self) -> Result<Any> {
        Any::decode(&mut self.r)
    }

    fn read_buf(&mut self) -> Result<&'a [u8]> {
        Ok(self.r.var_buf()?)
    }

    fn read_json(&mut self) -> Result<Any> {
        Any::from_json_str(self.r.var_string()?)
    }

    fn read_key(&mut self) -> Result<Arc<str>> {
        Ok(Arc::from(self.r.var_string()?))
    }

    fn reset_ds_cur_val(&mut self) {}

    fn read_ds_clock(&mut self) -> Result<u32> {
        self.read_clock()
    }

    fn read_ds_len(&mut self) -> Result<u32> {
        self.read_clock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_written_in_place() {
        let mut e = EncoderV1::new();
        e.write_info(0b1000_0100);
        e.write_left_id(&ID::new(300, 2));
        e.write_string("ab");
        e.write_parent_info(true);
        let data = e.to_vec();
        assert_eq!(data, [0x84, 0xac, 0x02, 2, 2, b'a', b'b', 1]);

        let mut d = DecoderV1::new(&data).unwrap();
        assert_eq!(d.read_info().unwrap(), 0x84);
        assert_eq!(d.read_left_id().unwrap(), ID::new(300, 2));
        assert_eq!(d.read_string().unwrap(), "ab");
        assert!(d.read_parent_info().unwrap());
        assert!(d.rest().is_empty());
    }

    #[test]
    fn json_fields_are_strings() {
        let mut e = EncoderV1::new();
        e.write_json(&Any::Undefined);
        e.write_json(&Any::from("x"));
        let data = e.to_vec();
        let mut d = DecoderV1::new(&data).unwrap();
        assert_eq!(d.read_json().unwrap(), Any::Undefined);
        assert_eq!(d.read_json().unwrap(), Any::from("x"));
    }
}
