//! JSON-like values carried by list, map, embed and format content.
//!
//! Binary layout, one tag byte followed by the payload:
//!
//! | tag | value                                   |
//! |-----|-----------------------------------------|
//! | 127 | undefined                               |
//! | 126 | null                                    |
//! | 125 | integer (signed varint, `|n| < 2^31`)   |
//! | 124 | float32 (big-endian)                    |
//! | 123 | float64 (big-endian)                    |
//! | 122 | bigint (int64, big-endian)              |
//! | 121 | false                                   |
//! | 120 | true                                    |
//! | 119 | string (length-prefixed UTF-8)          |
//! | 118 | object (count, then key/value pairs)    |
//! | 117 | array (count, then values)              |
//! | 116 | byte array (length-prefixed)            |

use std::fmt;

use indexmap::IndexMap;
use serde_json::Value;
use ycrdt_buffers::{Reader, Writer};

use crate::error::{Error, Result};

const BITS31: f64 = 0x7FFF_FFFF as f64;
/// Deepest array/map nesting accepted from a decoded buffer.
pub const MAX_NESTING: usize = 128;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Any {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i64),
    String(String),
    Buffer(Vec<u8>),
    Array(Vec<Any>),
    Map(IndexMap<String, Any>),
}

impl Any {
    pub fn encode(&self, w: &mut Writer) {
        match self {
            Any::Undefined => w.u8(127),
            Any::Null => w.u8(126),
            Any::Number(n) => {
                let n = *n;
                if n.fract() == 0.0 && n.abs() <= BITS31 {
                    w.u8(125);
                    w.var_int_parts(n.abs() as u64, n.is_sign_negative());
                } else if (n as f32) as f64 == n {
                    w.u8(124);
                    w.f32(n as f32);
                } else {
                    w.u8(123);
                    w.f64(n);
                }
            }
            Any::BigInt(n) => {
                w.u8(122);
                w.i64(*n);
            }
            Any::Bool(false) => w.u8(121),
            Any::Bool(true) => w.u8(120),
            Any::String(s) => {
                w.u8(119);
                w.var_string(s);
            }
            Any::Map(map) => {
                w.u8(118);
                w.var_uint(map.len() as u64);
                for (key, value) in map {
                    w.var_string(key);
                    value.encode(w);
                }
            }
            Any::Array(items) => {
                w.u8(117);
                w.var_uint(items.len() as u64);
                for item in items {
                    item.encode(w);
                }
            }
            Any::Buffer(buf) => {
                w.u8(116);
                w.var_buf(buf);
            }
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Any> {
        Self::decode_at(r, 0)
    }

    fn decode_at(r: &mut Reader<'_>, depth: usize) -> Result<Any> {
        let tag = r.u8()?;
        if matches!(tag, 117 | 118) && depth >= MAX_NESTING {
            return Err(Error::NestingTooDeep(MAX_NESTING));
        }
        Ok(match tag {
            127 => Any::Undefined,
            126 => Any::Null,
            125 => {
                let (magnitude, negative) = r.var_int_parts()?;
                let n = magnitude as f64;
                Any::Number(if negative { -n } else { n })
            }
            124 => Any::Number(r.f32()? as f64),
            123 => Any::Number(r.f64()?),
            122 => Any::BigInt(r.i64()?),
            121 => Any::Bool(false),
            120 => Any::Bool(true),
            119 => Any::String(r.var_string()?.to_owned()),
            118 => {
                let len = r.var_uint()?;
                let mut map = IndexMap::new();
                for _ in 0..len {
                    let key = r.var_string()?.to_owned();
                    map.insert(key, Any::decode_at(r, depth + 1)?);
                }
                Any::Map(map)
            }
            117 => {
                let len = r.var_uint()?;
                let mut items = Vec::new();
                for _ in 0..len {
                    items.push(Any::decode_at(r, depth + 1)?);
                }
                Any::Array(items)
            }
            116 => Any::Buffer(r.var_buf()?.to_vec()),
            other => return Err(Error::UnknownAnyTag(other)),
        })
    }

    /// JSON text of this value; `undefined` has no JSON form and is spelled
    /// out literally.
    pub fn to_json_string(&self) -> String {
        match self {
            Any::Undefined => "undefined".to_owned(),
            other => Value::from(other).to_string(),
        }
    }

    pub fn from_json_str(s: &str) -> Result<Any> {
        if s == "undefined" {
            return Ok(Any::Undefined);
        }
        let value: Value = serde_json::from_str(s)?;
        Ok(Any::from(value))
    }
}

impl fmt::Display for Any {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json_string())
    }
}

// ── serde_json interop ─────────────────────────────────────────────────────

impl From<Value> for Any {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Any::Null,
            Value::Bool(b) => Any::Bool(b),
            Value::Number(n) => Any::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Any::String(s),
            Value::Array(items) => Any::Array(items.into_iter().map(Any::from).collect()),
            Value::Object(map) => Any::Map(map.into_iter().map(|(k, v)| (k, Any::from(v))).collect()),
        }
    }
}

impl From<&Any> for Value {
    fn from(any: &Any) -> Self {
        match any {
            Any::Undefined | Any::Null => Value::Null,
            Any::Bool(b) => Value::Bool(*b),
            Any::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
                    Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null)
                }
            }
            Any::BigInt(n) => Value::from(*n),
            Any::String(s) => Value::String(s.clone()),
            Any::Buffer(buf) => Value::Array(buf.iter().map(|b| Value::from(*b)).collect()),
            Any::Array(items) => Value::Array(items.iter().map(Value::from).collect()),
            Any::Map(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect()),
        }
    }
}

impl From<Any> for Value {
    fn from(any: Any) -> Self {
        Value::from(&any)
    }
}

// ── Primitive conversions ──────────────────────────────────────────────────

impl From<bool> for Any {
    fn from(v: bool) -> Self {
        Any::Bool(v)
    }
}

impl From<f64> for Any {
    fn from(v: f64) -> Self {
        Any::Number(v)
    }
}

impl From<i32> for Any {
    fn from(v: i32) -> Self {
        Any::Number(v as f64)
    }
}

impl From<i64> for Any {
    fn from(v: i64) -> Self {
        Any::BigInt(v)
    }
}

impl From<&str> for Any {
    fn from(v: &str) -> Self {
        Any::String(v.to_owned())
    }
}

impl From<String> for Any {
    fn from(v: String) -> Self {
        Any::String(v)
    }
}

impl From<Vec<u8>> for Any {
    fn from(v: Vec<u8>) -> Self {
        Any::Buffer(v)
    }
}

impl From<Vec<Any>> for Any {
    fn from(v: Vec<Any>) -> Self {
        Any::Array(v)
    }
}

impl From<IndexMap<String, Any>> for Any {
    fn from(v: IndexMap<String, Any>) -> Self {
        Any::Map(v)
    }
}
