//! Payloads carried by items.
//!
//! Every content kind reports its length in the unit its parent counts in
//! (list elements, or UTF-16 code units for strings), knows whether it
//! contributes to the parent's visible length, and can be split in two or
//! appended to a neighbouring content of the same kind.

use std::sync::Arc;

use crate::any::Any;
use crate::codec::{Decoder, Encoder};
use crate::error::{Error, Result};

// ── Content refs (low five bits of the info byte) ──────────────────────────

pub const BLOCK_GC_REF: u8 = 0;
pub const CONTENT_DELETED: u8 = 1;
pub const CONTENT_JSON: u8 = 2;
pub const CONTENT_BINARY: u8 = 3;
pub const CONTENT_STRING: u8 = 4;
pub const CONTENT_EMBED: u8 = 5;
pub const CONTENT_FORMAT: u8 = 6;
pub const CONTENT_TYPE: u8 = 7;
pub const CONTENT_ANY: u8 = 8;
pub const CONTENT_DOC: u8 = 9;
pub const BLOCK_SKIP_REF: u8 = 10;

// ── TypeRef ────────────────────────────────────────────────────────────────

/// Kind of a shared container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Array,
    Map,
    Text,
    XmlElement(Arc<str>),
    XmlFragment,
    XmlHook(Arc<str>),
    XmlText,
    /// Root container that was only ever referenced by remote updates.
    Undefined,
}

impl TypeRef {
    pub fn id(&self) -> u8 {
        match self {
            TypeRef::Array => 0,
            TypeRef::Map => 1,
            TypeRef::Text => 2,
            TypeRef::XmlElement(_) => 3,
            TypeRef::XmlFragment => 4,
            TypeRef::XmlHook(_) => 5,
            TypeRef::XmlText => 6,
            TypeRef::Undefined => 15,
        }
    }

    pub(crate) fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_type_ref(self.id());
        match self {
            TypeRef::XmlElement(name) | TypeRef::XmlHook(name) => encoder.write_key(name),
            _ => {}
        }
    }

    pub(crate) fn decode<'a, D: Decoder<'a>>(decoder: &mut D) -> Result<Self> {
        Ok(match decoder.read_type_ref()? {
            0 => TypeRef::Array,
            1 => TypeRef::Map,
            2 => TypeRef::Text,
            3 => TypeRef::XmlElement(decoder.read_key()?),
            4 => TypeRef::XmlFragment,
            5 => TypeRef::XmlHook(decoder.read_key()?),
            6 => TypeRef::XmlText,
            15 => TypeRef::Undefined,
            other => return Err(Error::UnknownTypeRef(other)),
        })
    }
}

// ── ItemContent ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ItemContent {
    /// Tombstone that only remembers how many elements it covered.
    Deleted(u32),
    /// Legacy JSON-encoded list elements.
    Json(Vec<Any>),
    Binary(Vec<u8>),
    /// Text run; its length is measured in UTF-16 code units.
    String(String),
    Embed(Any),
    Format { key: Arc<str>, value: Any },
    /// Nested shared container; its state lives in the type registry under
    /// the owning item's id.
    Type(TypeRef),
    Any(Vec<Any>),
    Doc { guid: Arc<str>, opts: Any },
}

impl ItemContent {
    pub fn content_ref(&self) -> u8 {
        match self {
            ItemContent::Deleted(_) => CONTENT_DELETED,
            ItemContent::Json(_) => CONTENT_JSON,
            ItemContent::Binary(_) => CONTENT_BINARY,
            ItemContent::String(_) => CONTENT_STRING,
            ItemContent::Embed(_) => CONTENT_EMBED,
            ItemContent::Format { .. } => CONTENT_FORMAT,
            ItemContent::Type(_) => CONTENT_TYPE,
            ItemContent::Any(_) => CONTENT_ANY,
            ItemContent::Doc { .. } => CONTENT_DOC,
        }
    }

    pub fn len(&self) -> u32 {
        match self {
            ItemContent::Deleted(len) => *len,
            ItemContent::Json(values) | ItemContent::Any(values) => values.len() as u32,
            ItemContent::String(s) => utf16_len(s),
            ItemContent::Binary(_)
            | ItemContent::Embed(_)
            | ItemContent::Format { .. }
            | ItemContent::Type(_)
            | ItemContent::Doc { .. } => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this content adds to the visible length of its parent.
    pub fn is_countable(&self) -> bool {
        !matches!(self, ItemContent::Deleted(_) | ItemContent::Format { .. })
    }

    /// Splits off everything from `offset` onwards. Returns `None` for
    /// content kinds that always have length 1.
    pub fn splice(&mut self, offset: u32) -> Option<ItemContent> {
        match self {
            ItemContent::Deleted(len) => {
                let right = *len - offset;
                *len = offset;
                Some(ItemContent::Deleted(right))
            }
            ItemContent::Json(values) => Some(ItemContent::Json(values.split_off(offset as usize))),
            ItemContent::Any(values) => Some(ItemContent::Any(values.split_off(offset as usize))),
            ItemContent::String(s) => {
                let (left, right) = split_utf16(s, offset);
                *s = left;
                Some(ItemContent::String(right))
            }
            _ => None,
        }
    }

    /// Appends `right` when both contents are of a mergeable kind.
    pub fn merge(&mut self, right: &ItemContent) -> bool {
        match (self, right) {
            (ItemContent::Deleted(a), ItemContent::Deleted(b)) => {
                *a += *b;
                true
            }
            (ItemContent::Json(a), ItemContent::Json(b)) | (ItemContent::Any(a), ItemContent::Any(b)) => {
                a.extend(b.iter().cloned());
                true
            }
            (ItemContent::String(a), ItemContent::String(b)) => {
                a.push_str(b);
                true
            }
            _ => false,
        }
    }

    /// Writes the content, skipping its first `offset` elements.
    pub(crate) fn encode<E: Encoder>(&self, encoder: &mut E, offset: u32) {
        match self {
            ItemContent::Deleted(len) => encoder.write_len(*len - offset),
            ItemContent::Json(values) => {
                encoder.write_len(values.len() as u32 - offset);
                for value in &values[offset as usize..] {
                    encoder.write_string(&value.to_json_string());
                }
            }
            ItemContent::Binary(buf) => encoder.write_buf(buf),
            ItemContent::String(s) => {
                if offset == 0 {
                    encoder.write_string(s);
                } else {
                    encoder.write_string(&split_utf16(s, offset).1);
                }
            }
            ItemContent::Embed(value) => encoder.write_json(value),
            ItemContent::Format { key, value } => {
                encoder.write_key(key);
                encoder.write_json(value);
            }
            ItemContent::Type(type_ref) => type_ref.encode(encoder),
            ItemContent::Any(values) => {
                encoder.write_len(values.len() as u32 - offset);
                for value in &values[offset as usize..] {
                    encoder.write_any(value);
                }
            }
            ItemContent::Doc { guid, opts } => {
                encoder.write_string(guid);
                encoder.write_any(opts);
            }
        }
    }

    pub(crate) fn decode<'a, D: Decoder<'a>>(decoder: &mut D, content_ref: u8) -> Result<Self> {
        Ok(match content_ref {
            CONTENT_DELETED => ItemContent::Deleted(decoder.read_len()?),
            CONTENT_JSON => {
                let len = decoder.read_len()?;
                let mut values = Vec::new();
                for _ in 0..len {
                    values.push(Any::from_json_str(decoder.read_string()?)?);
                }
                ItemContent::Json(values)
            }
            CONTENT_BINARY => ItemContent::Binary(decoder.read_buf()?.to_vec()),
            CONTENT_STRING => ItemContent::String(decoder.read_string()?.to_owned()),
            CONTENT_EMBED => ItemContent::Embed(decoder.read_json()?),
            CONTENT_FORMAT => {
                let key = decoder.read_key()?;
                ItemContent::Format { key, value: decoder.read_json()? }
            }
            CONTENT_TYPE => ItemContent::Type(TypeRef::decode(decoder)?),
            CONTENT_ANY => {
                let len = decoder.read_len()?;
                let mut values = Vec::new();
                for _ in 0..len {
                    values.push(decoder.read_any()?);
                }
                ItemContent::Any(values)
            }
            CONTENT_DOC => {
                let guid = Arc::from(decoder.read_string()?);
                ItemContent::Doc { guid, opts: decoder.read_any()? }
            }
            other => return Err(Error::UnknownContentRef(other)),
        })
    }
}

// ── UTF-16 helpers ─────────────────────────────────────────────────────────

pub(crate) fn utf16_len(s: &str) -> u32 {
    s.chars().map(|c| c.len_utf16() as u32).sum()
}

/// Splits `s` after `offset` UTF-16 code units. A surrogate pair cut in half
/// becomes one U+FFFD on each side, so both halves keep their lengths.
pub(crate) fn split_utf16(s: &str, offset: u32) -> (String, String) {
    let mut units = 0u32;
    for (i, c) in s.char_indices() {
        if units == offset {
            return (s[..i].to_owned(), s[i..].to_owned());
        }
        let width = c.len_utf16() as u32;
        if units + width > offset {
            let after = i + c.len_utf8();
            return (format!("{}\u{FFFD}", &s[..i]), format!("\u{FFFD}{}", &s[after..]));
        }
        units += width;
    }
    (s.to_owned(), String::new())
}
