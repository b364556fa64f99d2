//! Structs: the units of a client's history.
//!
//! A client's history is a contiguous sequence of [`Block`]s. Live content
//! is carried by [`Item`]s; [`Block::GC`] marks reclaimed ranges and
//! [`Block::Skip`] marks ranges an update does not carry (never stored).

pub mod content;
pub mod item;

pub use content::{ItemContent, TypeRef};
pub use item::{Item, TypePtr};

use crate::codec::{Decoder, Encoder};
use crate::error::{Error, Result};
use crate::id::ID;
use content::{BLOCK_GC_REF, BLOCK_SKIP_REF};
use item::CONTENT_REF_MASK;

/// Clock range without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub id: ID,
    pub len: u32,
}

impl BlockRange {
    pub fn new(id: ID, len: u32) -> Self {
        Self { id, len }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Item(Box<Item>),
    GC(BlockRange),
    Skip(BlockRange),
}

impl Block {
    pub fn id(&self) -> &ID {
        match self {
            Block::Item(item) => &item.id,
            Block::GC(range) | Block::Skip(range) => &range.id,
        }
    }

    pub fn len(&self) -> u32 {
        match self {
            Block::Item(item) => item.len,
            Block::GC(range) | Block::Skip(range) => range.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_id(&self) -> ID {
        let id = self.id();
        ID::new(id.client, id.clock + self.len() - 1)
    }

    /// GC ranges count as deleted; skips are not part of any history.
    pub fn is_deleted(&self) -> bool {
        match self {
            Block::Item(item) => item.deleted,
            Block::GC(_) => true,
            Block::Skip(_) => false,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Block::Skip(_))
    }

    pub fn as_item(&self) -> Option<&Item> {
        match self {
            Block::Item(item) => Some(item),
            _ => None,
        }
    }

    pub fn as_item_mut(&mut self) -> Option<&mut Item> {
        match self {
            Block::Item(item) => Some(item),
            _ => None,
        }
    }

    /// Merge of two adjacent blocks of the struct store.
    pub(crate) fn try_merge(&mut self, right: &Block) -> bool {
        match (self, right) {
            (Block::GC(a), Block::GC(b)) | (Block::Skip(a), Block::Skip(b)) => {
                a.len += b.len;
                true
            }
            (Block::Item(a), Block::Item(b)) => a.try_merge(b),
            _ => false,
        }
    }

    /// Merge of two adjacent blocks of a decoded update.
    pub(crate) fn try_merge_detached(&mut self, right: &Block) -> bool {
        match (self, right) {
            (Block::GC(a), Block::GC(b)) | (Block::Skip(a), Block::Skip(b)) => {
                a.len += b.len;
                true
            }
            (Block::Item(a), Block::Item(b)) => a.try_merge_detached(b),
            _ => false,
        }
    }

    /// Copy of this block without its first `diff` elements.
    pub(crate) fn slice(&self, diff: u32) -> Block {
        if diff == 0 {
            return self.clone();
        }
        match self {
            Block::GC(r) => Block::GC(BlockRange::new(ID::new(r.id.client, r.id.clock + diff), r.len - diff)),
            Block::Skip(r) => {
                Block::Skip(BlockRange::new(ID::new(r.id.client, r.id.clock + diff), r.len - diff))
            }
            Block::Item(item) => match item.slice(diff) {
                Some(right) => Block::Item(Box::new(right)),
                None => self.clone(),
            },
        }
    }

    pub(crate) fn encode<E: Encoder>(&self, encoder: &mut E, offset: u32) {
        match self {
            Block::Item(item) => item.encode(encoder, offset),
            Block::GC(range) => {
                encoder.write_info(BLOCK_GC_REF);
                encoder.write_len(range.len - offset);
            }
            Block::Skip(range) => {
                encoder.write_info(BLOCK_SKIP_REF);
                encoder.rest().var_uint((range.len - offset) as u64);
            }
        }
    }

    pub(crate) fn decode<'a, D: Decoder<'a>>(decoder: &mut D, id: ID) -> Result<Block> {
        let info = decoder.read_info()?;
        let block = match info & CONTENT_REF_MASK {
            BLOCK_GC_REF => Block::GC(BlockRange::new(id, decoder.read_len()?)),
            BLOCK_SKIP_REF => {
                let len = crate::id::clock_from_u64(decoder.rest().var_uint()?)?;
                Block::Skip(BlockRange::new(id, len))
            }
            _ => Block::Item(Box::new(Item::decode(decoder, id, info)?)),
        };
        if block.len() == 0 {
            return Err(Error::InvalidRange { clock: id.clock as u64, len: 0 });
        }
        Ok(block)
    }
}

impl From<Item> for Block {
    fn from(item: Item) -> Self {
        Block::Item(Box::new(item))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DecoderV2, EncoderV2};

    #[test]
    fn gc_and_skip_decode_with_offset() {
        let mut e = EncoderV2::new();
        Block::GC(BlockRange::new(ID::new(3, 0), 5)).encode(&mut e, 2);
        Block::Skip(BlockRange::new(ID::new(3, 5), 4)).encode(&mut e, 0);
        let data = e.to_vec();
        let mut d = DecoderV2::new(&data).unwrap();
        assert_eq!(Block::decode(&mut d, ID::new(3, 2)).unwrap(), Block::GC(BlockRange::new(ID::new(3, 2), 3)));
        assert_eq!(Block::decode(&mut d, ID::new(3, 5)).unwrap(), Block::Skip(BlockRange::new(ID::new(3, 5), 4)));
    }

    #[test]
    fn ranges_merge_only_with_same_kind() {
        let mut gc = Block::GC(BlockRange::new(ID::new(1, 0), 2));
        assert!(gc.try_merge(&Block::GC(BlockRange::new(ID::new(1, 2), 3))));
        assert_eq!(gc.len(), 5);
        assert!(!gc.try_merge(&Block::Skip(BlockRange::new(ID::new(1, 5), 1))));
        assert_eq!(gc.slice(1).id(), &ID::new(1, 1));
        assert!(gc.is_deleted());
    }
}
