//! Per-client struct sequences.
//!
//! Each client's history is kept as a contiguous, clock-ordered `Vec` of
//! blocks: for consecutive blocks `a`, `b` of one client,
//! `a.id.clock + a.len == b.id.clock`, and the first block starts at 0.

use std::collections::HashMap;
use std::ops::Range;

use crate::block::{Block, BlockRange, Item};
use crate::delete_set::DeleteSet;
use crate::error::{Error, Result};
use crate::id::{ClientID, StateVector, ID};

/// Update whose causal dependencies have not arrived yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    /// Lowest clock per client that is still missing.
    pub missing: StateVector,
    /// The unapplied structs, V2 encoded.
    pub update: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct StructStore {
    clients: HashMap<ClientID, Vec<Block>>,
    pub(crate) pending: Option<PendingUpdate>,
    pub(crate) pending_ds: Option<DeleteSet>,
}

/// Binary search for the block covering `clock`.
///
/// The first probe is pivoted by the clock's relative position in the
/// client's range, then the search falls back to plain bisection.
pub(crate) fn find_pivot(blocks: &[Block], clock: u32) -> Option<usize> {
    let last = blocks.last()?;
    let mut right = blocks.len() - 1;
    if last.id().clock == clock {
        return Some(right);
    }
    let end = last.id().clock as u64 + last.len() as u64 - 1;
    if clock as u64 > end {
        return None;
    }
    let mut left = 0usize;
    let mut mid = ((clock as u64 * right as u64) / end.max(1)) as usize;
    mid = mid.min(right);
    while left <= right {
        let block = &blocks[mid];
        let start = block.id().clock;
        if start <= clock {
            if clock < start + block.len() {
                return Some(mid);
            }
            left = mid + 1;
        } else {
            if mid == 0 {
                return None;
            }
            right = mid - 1;
        }
        mid = (left + right) / 2;
    }
    None
}

impl StructStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next expected clock of `client` (0 when unknown).
    pub fn get_state(&self, client: &ClientID) -> u32 {
        self.clients
            .get(client)
            .and_then(|blocks| blocks.last())
            .map(|last| last.id().clock + last.len())
            .unwrap_or(0)
    }

    pub fn get_state_vector(&self) -> StateVector {
        self.clients
            .iter()
            .map(|(client, blocks)| {
                let clock = blocks.last().map(|b| b.id().clock + b.len()).unwrap_or(0);
                (*client, clock)
            })
            .collect()
    }

    pub fn clients(&self) -> impl Iterator<Item = (&ClientID, &Vec<Block>)> {
        self.clients.iter()
    }

    pub fn blocks(&self, client: &ClientID) -> Option<&[Block]> {
        self.clients.get(client).map(Vec::as_slice)
    }

    pub fn pending_update(&self) -> Option<&PendingUpdate> {
        self.pending.as_ref()
    }

    pub fn pending_delete_set(&self) -> Option<&DeleteSet> {
        self.pending_ds.as_ref()
    }

    /// Appends `block` to its client's sequence.
    pub fn add_block(&mut self, block: Block) -> Result<()> {
        let id = *block.id();
        let expected = self.get_state(&id.client);
        if id.clock != expected {
            return Err(Error::NonContiguous { id, client: id.client, expected });
        }
        self.clients.entry(id.client).or_default().push(block);
        Ok(())
    }

    pub fn find_index(&self, id: &ID) -> Result<usize> {
        self.clients
            .get(&id.client)
            .and_then(|blocks| find_pivot(blocks, id.clock))
            .ok_or(Error::NotFound(*id))
    }

    /// Block covering `id`.
    pub fn find(&self, id: &ID) -> Result<&Block> {
        let index = self.find_index(id)?;
        Ok(&self.clients[&id.client][index])
    }

    pub(crate) fn find_mut(&mut self, id: &ID) -> Result<&mut Block> {
        let index = self.find_index(id)?;
        self.clients
            .get_mut(&id.client)
            .and_then(|blocks| blocks.get_mut(index))
            .ok_or(Error::NotFound(*id))
    }

    /// Item covering `id`, if the covering block is an item.
    pub fn get_item(&self, id: &ID) -> Option<&Item> {
        self.find(id).ok().and_then(Block::as_item)
    }

    pub(crate) fn get_item_mut(&mut self, id: &ID) -> Option<&mut Item> {
        self.find_mut(id).ok().and_then(Block::as_item_mut)
    }

    /// Splits the block at `index` after `diff` elements. The right part is
    /// inserted at `index + 1` and recorded in `merge_blocks`.
    fn split_at(&mut self, client: &ClientID, index: usize, diff: u32, merge_blocks: &mut Vec<ID>) -> Result<()> {
        let blocks = self.clients.get_mut(client).ok_or(Error::NotFound(ID::new(*client, 0)))?;
        let block = &mut blocks[index];
        let id = *block.id();
        let item = block
            .as_item_mut()
            .ok_or_else(|| Error::IntegrityViolation(format!("cannot split non-item block {id}")))?;
        let right = item
            .split(diff)
            .ok_or_else(|| Error::IntegrityViolation(format!("cannot split item {id} at {diff}")))?;
        merge_blocks.push(right.id);
        blocks.insert(index + 1, Block::from(right));
        Ok(())
    }

    /// Makes sure a block starts exactly at `id` and returns its index.
    /// GC blocks are never split.
    pub(crate) fn get_item_clean_start(&mut self, id: &ID, merge_blocks: &mut Vec<ID>) -> Result<usize> {
        let index = self.find_index(id)?;
        let block = &self.clients[&id.client][index];
        let start = block.id().clock;
        if start < id.clock && matches!(block, Block::Item(_)) {
            self.split_at(&id.client, index, id.clock - start, merge_blocks)?;
            return Ok(index + 1);
        }
        Ok(index)
    }

    /// Makes sure a block ends exactly at `id` and returns its index.
    pub(crate) fn get_item_clean_end(&mut self, id: &ID, merge_blocks: &mut Vec<ID>) -> Result<usize> {
        let index = self.find_index(id)?;
        let block = &self.clients[&id.client][index];
        let start = block.id().clock;
        if id.clock != start + block.len() - 1 && matches!(block, Block::Item(_)) {
            self.split_at(&id.client, index, id.clock - start + 1, merge_blocks)?;
        }
        Ok(index)
    }

    /// Splits blocks so that `[clock, clock + len)` of `client` is covered
    /// exactly by whole blocks and returns their index range.
    pub(crate) fn clean_range(
        &mut self,
        client: &ClientID,
        clock: u32,
        len: u32,
        merge_blocks: &mut Vec<ID>,
    ) -> Result<Range<usize>> {
        if len == 0 {
            return Ok(0..0);
        }
        let end = clock + len;
        let start = self.get_item_clean_start(&ID::new(*client, clock), merge_blocks)?;
        if end < self.get_state(client) {
            self.get_item_clean_start(&ID::new(*client, end), merge_blocks)?;
        }
        let blocks = &self.clients[client];
        let mut stop = start;
        while stop < blocks.len() && blocks[stop].id().clock < end {
            stop += 1;
        }
        Ok(start..stop)
    }

    /// Visits every block covering `[clock, clock + len)` of `client`,
    /// clean-splitting at both ends first.
    pub fn iterate_structs<F>(
        &mut self,
        client: &ClientID,
        clock: u32,
        len: u32,
        merge_blocks: &mut Vec<ID>,
        mut f: F,
    ) -> Result<()>
    where
        F: FnMut(&mut Block),
    {
        let range = self.clean_range(client, clock, len, merge_blocks)?;
        if let Some(blocks) = self.clients.get_mut(client) {
            for block in &mut blocks[range] {
                f(block);
            }
        }
        Ok(())
    }

    /// Replaces the block starting at `id` with a GC range of equal length.
    pub(crate) fn replace_with_gc(&mut self, id: &ID) -> Result<()> {
        let block = self.find_mut(id)?;
        let range = BlockRange::new(*block.id(), block.len());
        *block = Block::GC(range);
        Ok(())
    }

    /// Merges the block at `pos` into its left neighbours as far as
    /// possible. Returns the number of blocks removed.
    pub(crate) fn try_merge_with_lefts(&mut self, client: &ClientID, pos: usize) -> usize {
        let Some(blocks) = self.clients.get_mut(client) else {
            return 0;
        };
        if pos >= blocks.len() {
            return 0;
        }
        let mut i = pos;
        while i > 0 {
            let (head, tail) = blocks.split_at_mut(i);
            let left = &mut head[i - 1];
            let right = &tail[0];
            if left.is_deleted() == right.is_deleted() && left.try_merge(right) {
                i -= 1;
                continue;
            }
            break;
        }
        let merged = pos - i;
        if merged > 0 {
            blocks.drain(i + 1..=pos);
        }
        merged
    }

    /// Validates per-client contiguity.
    pub fn integrity_check(&self) -> Result<()> {
        for (client, blocks) in &self.clients {
            let mut expected = 0;
            for block in blocks {
                let id = block.id();
                if id.client != *client || id.clock != expected || block.is_empty() {
                    return Err(Error::IntegrityViolation(format!(
                        "client {client}: block {id} does not start at clock {expected}"
                    )));
                }
                if block.is_skip() {
                    return Err(Error::IntegrityViolation(format!("skip block {id} in store")));
                }
                expected += block.len();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{ItemContent, TypePtr};
    use crate::types::BranchPtr;

    fn text(client: ClientID, clock: u32, s: &str) -> Block {
        let origin = clock.checked_sub(1).map(|c| ID::new(client, c));
        Block::from(Item::new(
            ID::new(client, clock),
            origin,
            origin,
            None,
            None,
            TypePtr::Branch(BranchPtr::Root("t".into())),
            None,
            ItemContent::String(s.into()),
        ))
    }

    fn store_with(blocks: Vec<Block>) -> StructStore {
        let mut store = StructStore::new();
        for block in blocks {
            store.add_block(block).unwrap();
        }
        store
    }

    #[test]
    fn state_vector_tracks_next_clock() {
        let store = store_with(vec![text(1, 0, "ab"), text(1, 2, "c"), text(2, 0, "x")]);
        assert_eq!(store.get_state(&1), 3);
        assert_eq!(store.get_state(&9), 0);
        let sv = store.get_state_vector();
        assert_eq!(sv.get(&2), 1);
        assert_eq!(sv.len(), 2);
    }

    #[test]
    fn add_block_rejects_gaps() {
        let mut store = store_with(vec![text(1, 0, "ab")]);
        let err = store.add_block(text(1, 3, "z")).unwrap_err();
        assert!(matches!(err, Error::NonContiguous { expected: 2, .. }));
    }

    #[test]
    fn pivot_search_finds_every_clock() {
        let blocks: Vec<Block> = (0..50u32).map(|i| text(1, i * 3, "abc")).collect();
        for clock in 0..150 {
            let index = find_pivot(&blocks, clock).unwrap();
            assert_eq!(index as u32, clock / 3);
        }
        assert_eq!(find_pivot(&blocks, 150), None);
        assert_eq!(find_pivot(&[], 0), None);
    }

    #[test]
    fn clean_start_and_end_split_items() {
        let mut store = store_with(vec![text(1, 0, "abcdef")]);
        let mut merge = Vec::new();
        let index = store.get_item_clean_start(&ID::new(1, 2), &mut merge).unwrap();
        assert_eq!(index, 1);
        let index = store.get_item_clean_end(&ID::new(1, 3), &mut merge).unwrap();
        assert_eq!(index, 1);
        let lens: Vec<u32> = store.blocks(&1).unwrap().iter().map(Block::len).collect();
        assert_eq!(lens, [2, 2, 2]);
        assert_eq!(merge, [ID::new(1, 2), ID::new(1, 4)]);
        store.integrity_check().unwrap();
        assert_eq!(store.try_merge_with_lefts(&1, 2), 2);
        assert_eq!(store.blocks(&1).unwrap().len(), 1);
    }

    #[test]
    fn iterate_visits_exact_range() {
        let mut store = store_with(vec![text(1, 0, "abcdef")]);
        let mut seen = Vec::new();
        store
            .iterate_structs(&1, 1, 3, &mut Vec::new(), |block| seen.push((block.id().clock, block.len())))
            .unwrap();
        assert_eq!(seen, [(1, 3)]);
    }

    #[test]
    fn gc_blocks_are_never_split() {
        let mut store = store_with(vec![Block::GC(BlockRange::new(ID::new(1, 0), 4))]);
        let index = store.get_item_clean_start(&ID::new(1, 2), &mut Vec::new()).unwrap();
        assert_eq!(index, 0);
        assert_eq!(store.blocks(&1).unwrap().len(), 1);
    }
}
