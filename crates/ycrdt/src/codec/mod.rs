//! Field-level update codecs.
//!
//! Structs and delete sets are written through [`Encoder`] and read back
//! through [`Decoder`]. The two wire formats differ only in how fields are
//! packed:
//!
//! - [`v1`]: every field is written in place, one after another.
//! - [`v2`]: fields are routed into column streams (clients, clocks, info
//!   bytes, strings, ...) that are run-length compressed independently;
//!   payload bytes that fit no column go to a trailing "rest" stream.

use std::sync::Arc;

use ycrdt_buffers::{Reader, Writer};

use crate::any::Any;
use crate::error::Result;
use crate::id::{ClientID, ID};

pub mod v1;
pub mod v2;

pub use v1::{DecoderV1, EncoderV1};
pub use v2::{DecoderV2, EncoderV2};

pub trait Encoder: Default {
    /// Stream for counters and payload bytes written as plain varints.
    fn rest(&mut self) -> &mut Writer;
    fn write_left_id(&mut self, id: &ID);
    fn write_right_id(&mut self, id: &ID);
    fn write_client(&mut self, client: ClientID);
    fn write_info(&mut self, info: u8);
    fn write_string(&mut self, s: &str);
    fn write_parent_info(&mut self, is_root_name: bool);
    fn write_type_ref(&mut self, type_ref: u8);
    fn write_len(&mut self, len: u32);
    fn write_any(&mut self, any: &Any);
    fn write_buf(&mut self, buf: &[u8]);
    fn write_json(&mut self, value: &Any);
    fn write_key(&mut self, key: &str);

    fn reset_ds_cur_val(&mut self);
    fn write_ds_clock(&mut self, clock: u32);
    fn write_ds_len(&mut self, len: u32);

    fn to_vec(self) -> Vec<u8>;
}

pub trait Decoder<'a>: Sized {
    fn new(data: &'a [u8]) -> Result<Self>;
    fn rest(&mut self) -> &mut Reader<'a>;
    fn read_left_id(&mut self) -> Result<ID>;
    fn read_right_id(&mut self) -> Result<ID>;
    fn read_client(&mut self) -> Result<ClientID>;
    fn read_info(&mut self) -> Result<u8>;
    fn read_string(&mut self) -> Result<&'a str>;
    fn read_parent_info(&mut self) -> Result<bool>;
    fn read_type_ref(&mut self) -> Result<u64>;
    fn read_len(&mut self) -> Result<u32>;
    fn read_any(&mut self) -> Result<Any>;
    fn read_buf(&mut self) -> Result<&'a [u8]>;
    fn read_json(&mut self) -> Result<Any>;
    fn read_key(&mut self) -> Result<Arc<str>>;

    fn reset_ds_cur_val(&mut self);
    fn read_ds_clock(&mut self) -> Result<u32>;
    fn read_ds_len(&mut self) -> Result<u32>;
}
