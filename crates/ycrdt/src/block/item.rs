//! The live payload struct.

use std::sync::Arc;

use super::content::{ItemContent, BLOCK_GC_REF, BLOCK_SKIP_REF};
use crate::codec::{Decoder, Encoder};
use crate::error::{Error, Result};
use crate::id::ID;
use crate::types::BranchPtr;

pub(crate) const HAS_ORIGIN: u8 = 0b1000_0000;
pub(crate) const HAS_RIGHT_ORIGIN: u8 = 0b0100_0000;
pub(crate) const HAS_PARENT_SUB: u8 = 0b0010_0000;
pub(crate) const CONTENT_REF_MASK: u8 = 0b0001_1111;

/// Parent reference of an item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypePtr {
    /// Not encoded (inferred from the neighbours during integration), or
    /// not resolvable because the parent was garbage collected.
    Unknown,
    Branch(BranchPtr),
    /// Id of the item that holds the parent type; resolved on integration.
    Id(ID),
}

/// A run of `len` consecutive elements inserted by one client.
///
/// `left` holds the last id of the left neighbour and `right` the first id
/// of the right neighbour, so both stay valid when either neighbour is
/// split or merged.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: ID,
    pub len: u32,
    pub left: Option<ID>,
    pub right: Option<ID>,
    pub origin: Option<ID>,
    pub right_origin: Option<ID>,
    pub parent: TypePtr,
    pub parent_sub: Option<Arc<str>>,
    pub content: ItemContent,
    pub deleted: bool,
    /// Pins the item against garbage collection.
    pub keep: bool,
}

impl Item {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ID,
        left: Option<ID>,
        origin: Option<ID>,
        right: Option<ID>,
        right_origin: Option<ID>,
        parent: TypePtr,
        parent_sub: Option<Arc<str>>,
        content: ItemContent,
    ) -> Self {
        Self {
            id,
            len: content.len(),
            left,
            right,
            origin,
            right_origin,
            parent,
            parent_sub,
            content,
            deleted: false,
            keep: false,
        }
    }

    pub fn last_id(&self) -> ID {
        ID::new(self.id.client, self.id.clock + self.len - 1)
    }

    pub fn is_countable(&self) -> bool {
        self.content.is_countable()
    }

    /// Whether this item contributes to its parent's visible length.
    pub fn is_visible(&self) -> bool {
        !self.deleted && self.is_countable()
    }

    pub fn info(&self) -> u8 {
        let mut info = self.content.content_ref() & CONTENT_REF_MASK;
        if self.origin.is_some() {
            info |= HAS_ORIGIN;
        }
        if self.right_origin.is_some() {
            info |= HAS_RIGHT_ORIGIN;
        }
        if self.parent_sub.is_some() {
            info |= HAS_PARENT_SUB;
        }
        info
    }

    /// Cuts the item after `diff` elements and returns the right part.
    /// Neighbour pointers outside the pair need no update.
    pub(crate) fn split(&mut self, diff: u32) -> Option<Item> {
        let content = self.content.splice(diff)?;
        let id = ID::new(self.id.client, self.id.clock + diff);
        let origin = ID::new(self.id.client, self.id.clock + diff - 1);
        let right = Item {
            id,
            len: self.len - diff,
            left: Some(origin),
            right: self.right,
            origin: Some(origin),
            right_origin: self.right_origin,
            parent: self.parent.clone(),
            parent_sub: self.parent_sub.clone(),
            content,
            deleted: self.deleted,
            keep: self.keep,
        };
        self.right = Some(id);
        self.len = diff;
        Some(right)
    }

    fn continues(&self, right: &Item) -> bool {
        self.id.client == right.id.client
            && self.id.clock + self.len == right.id.clock
            && right.origin == Some(self.last_id())
            && self.right_origin == right.right_origin
            && self.deleted == right.deleted
            && self.content.content_ref() == right.content.content_ref()
    }

    /// Absorbs `right` if it is this item's direct, unmodified continuation.
    pub(crate) fn try_merge(&mut self, right: &Item) -> bool {
        if self.right == Some(right.id) && self.continues(right) && self.content.merge(&right.content) {
            self.keep |= right.keep;
            self.right = right.right;
            self.len += right.len;
            true
        } else {
            false
        }
    }

    /// Merge used on decoded updates, where neighbour pointers are not
    /// known and only the causal anchors decide.
    pub(crate) fn try_merge_detached(&mut self, right: &Item) -> bool {
        if self.continues(right) && self.content.merge(&right.content) {
            self.len += right.len;
            true
        } else {
            false
        }
    }

    /// Copy of this item without its first `diff` elements, anchored to the
    /// element before the cut.
    pub(crate) fn slice(&self, diff: u32) -> Option<Item> {
        let mut copy = self.clone();
        let right = copy.split(diff)?;
        Some(Item { left: None, right: None, ..right })
    }

    pub(crate) fn encode<E: Encoder>(&self, encoder: &mut E, offset: u32) {
        let origin = if offset > 0 {
            Some(ID::new(self.id.client, self.id.clock + offset - 1))
        } else {
            self.origin
        };
        if origin.is_none() && self.right_origin.is_none() && self.parent == TypePtr::Unknown {
            // Orphaned content cannot be placed by a receiver; ship it as a tombstone.
            encoder.write_info(BLOCK_GC_REF);
            encoder.write_len(self.len - offset);
            return;
        }
        let mut info = self.info();
        if origin.is_some() {
            info |= HAS_ORIGIN;
        }
        encoder.write_info(info);
        if let Some(origin) = &origin {
            encoder.write_left_id(origin);
        }
        if let Some(right_origin) = &self.right_origin {
            encoder.write_right_id(right_origin);
        }
        if origin.is_none() && self.right_origin.is_none() {
            match &self.parent {
                TypePtr::Branch(BranchPtr::Root(name)) => {
                    encoder.write_parent_info(true);
                    encoder.write_string(name);
                }
                TypePtr::Branch(BranchPtr::Nested(id)) | TypePtr::Id(id) => {
                    encoder.write_parent_info(false);
                    encoder.write_left_id(id);
                }
                TypePtr::Unknown => {}
            }
            if let Some(sub) = &self.parent_sub {
                encoder.write_string(sub);
            }
        }
        self.content.encode(encoder, offset);
    }

    pub(crate) fn decode<'a, D: Decoder<'a>>(decoder: &mut D, id: ID, info: u8) -> Result<Item> {
        let content_ref = info & CONTENT_REF_MASK;
        if content_ref == BLOCK_SKIP_REF || content_ref == 0 {
            return Err(Error::UnknownContentRef(content_ref));
        }
        let origin = if info & HAS_ORIGIN != 0 { Some(decoder.read_left_id()?) } else { None };
        let right_origin =
            if info & HAS_RIGHT_ORIGIN != 0 { Some(decoder.read_right_id()?) } else { None };
        let has_parent_info = info & (HAS_ORIGIN | HAS_RIGHT_ORIGIN) == 0;
        let parent = if has_parent_info {
            if decoder.read_parent_info()? {
                TypePtr::Branch(BranchPtr::Root(Arc::from(decoder.read_string()?)))
            } else {
                TypePtr::Id(decoder.read_left_id()?)
            }
        } else {
            TypePtr::Unknown
        };
        let parent_sub = if has_parent_info && info & HAS_PARENT_SUB != 0 {
            Some(Arc::from(decoder.read_string()?))
        } else {
            None
        };
        let content = ItemContent::decode(decoder, content_ref)?;
        if content.is_empty() {
            return Err(Error::InvalidRange { clock: id.clock as u64, len: 0 });
        }
        Ok(Item::new(id, None, origin, None, right_origin, parent, parent_sub, content))
    }
}
