//! Tombstone ranges.
//!
//! A [`DeleteSet`] maps each client to the clock ranges of its structs that
//! have been deleted. Ranges are appended unsorted while a transaction runs;
//! [`DeleteSet::sort_and_merge`] restores the sorted, non-adjacent form that
//! lookups and encoding rely on.

use std::collections::HashMap;

use crate::block::{Block, Item, ItemContent};
use crate::codec::{Decoder, DecoderV1, DecoderV2, Encoder, EncoderV1, EncoderV2};
use crate::error::{Error, Result};
use crate::id::{ClientID, ID};
use crate::store::{find_pivot, StructStore};
use crate::types::{Branch, BranchPtr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteItem {
    pub clock: u32,
    pub len: u32,
}

impl DeleteItem {
    pub fn new(clock: u32, len: u32) -> Self {
        Self { clock, len }
    }

    pub fn end(&self) -> u32 {
        self.clock + self.len
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSet {
    clients: HashMap<ClientID, Vec<DeleteItem>>,
}

impl DeleteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.values().all(Vec::is_empty)
    }

    /// Appends a range without sorting.
    pub fn add(&mut self, client: ClientID, clock: u32, len: u32) {
        if len > 0 {
            self.clients.entry(client).or_default().push(DeleteItem::new(clock, len));
        }
    }

    pub fn insert(&mut self, id: ID, len: u32) {
        self.add(id.client, id.clock, len);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientID, &Vec<DeleteItem>)> {
        self.clients.iter()
    }

    pub fn ranges(&self, client: &ClientID) -> Option<&[DeleteItem]> {
        self.clients.get(client).map(Vec::as_slice)
    }

    /// Sorts every client's ranges and coalesces overlapping or adjacent
    /// ones.
    pub fn sort_and_merge(&mut self) {
        for dels in self.clients.values_mut() {
            dels.sort_by_key(|d| d.clock);
            let mut j = 1;
            for i in 1..dels.len() {
                let right = dels[i];
                let left = &mut dels[j - 1];
                if left.end() >= right.clock {
                    left.len = left.len.max(right.end() - left.clock);
                } else {
                    dels[j] = right;
                    j += 1;
                }
            }
            dels.truncate(j.min(dels.len()));
        }
        self.clients.retain(|_, dels| !dels.is_empty());
    }

    /// Whether `id` lies inside a range. Requires the sorted form.
    pub fn is_deleted(&self, id: &ID) -> bool {
        let Some(dels) = self.clients.get(&id.client) else {
            return false;
        };
        let idx = dels.partition_point(|d| d.end() <= id.clock);
        dels.get(idx).is_some_and(|d| d.clock <= id.clock)
    }

    /// Union of several delete sets.
    pub fn merge_all<'a, I>(sets: I) -> DeleteSet
    where
        I: IntoIterator<Item = &'a DeleteSet>,
    {
        let mut merged = DeleteSet::new();
        for set in sets {
            for (client, dels) in &set.clients {
                merged.clients.entry(*client).or_default().extend_from_slice(dels);
            }
        }
        merged.sort_and_merge();
        merged
    }

    pub fn merge(&mut self, other: &DeleteSet) {
        for (client, dels) in &other.clients {
            self.clients.entry(*client).or_default().extend_from_slice(dels);
        }
        self.sort_and_merge();
    }

    /// Delete set describing every deleted struct of `store`.
    pub fn from_store(store: &StructStore) -> DeleteSet {
        let mut ds = DeleteSet::new();
        for (client, blocks) in store.clients() {
            let mut dels: Vec<DeleteItem> = Vec::new();
            for block in blocks.iter().filter(|b| b.is_deleted()) {
                let clock = block.id().clock;
                match dels.last_mut() {
                    Some(last) if last.end() == clock => last.len += block.len(),
                    _ => dels.push(DeleteItem::new(clock, block.len())),
                }
            }
            if !dels.is_empty() {
                ds.clients.insert(*client, dels);
            }
        }
        ds
    }

    /// Visits every block covered by the delete set, clean-splitting the
    /// range ends.
    pub fn iterate<F>(&self, store: &mut StructStore, merge_blocks: &mut Vec<ID>, mut f: F) -> Result<()>
    where
        F: FnMut(&mut Block),
    {
        for (client, dels) in &self.clients {
            let state = store.get_state(client);
            for del in dels {
                if del.clock >= state {
                    continue;
                }
                let len = del.end().min(state) - del.clock;
                store.iterate_structs(client, del.clock, len, merge_blocks, &mut f)?;
            }
        }
        Ok(())
    }

    // ── Garbage collection ─────────────────────────────────────────────────

    /// Replaces the content of deleted, unpinned items that pass `filter`
    /// with a tombstone. Children of collected containers become GC ranges.
    pub(crate) fn try_gc(
        &self,
        store: &mut StructStore,
        types: &mut HashMap<BranchPtr, Branch>,
        filter: &dyn Fn(&Item) -> bool,
    ) -> Result<()> {
        for (client, dels) in &self.clients {
            let mut candidates = Vec::new();
            let Some(blocks) = store.blocks(client) else {
                continue;
            };
            for del in dels.iter().rev() {
                let Some(mut i) = find_pivot(blocks, del.clock) else {
                    continue;
                };
                while i < blocks.len() && blocks[i].id().clock < del.end() {
                    if let Block::Item(item) = &blocks[i] {
                        if item.deleted && !item.keep && filter(item) {
                            candidates.push(item.id);
                        }
                    }
                    i += 1;
                }
            }
            for id in candidates {
                gc_item(store, types, id, false)?;
            }
        }
        Ok(())
    }

    /// Merges deleted structs with their left neighbours, right to left.
    pub(crate) fn try_merge(&self, store: &mut StructStore) {
        for (client, dels) in &self.clients {
            for del in dels.iter().rev() {
                let Some(blocks) = store.blocks(client) else {
                    break;
                };
                let Some(last) = find_pivot(blocks, del.end() - 1) else {
                    continue;
                };
                let mut si = (last + 1).min(blocks.len() - 1);
                loop {
                    let Some(blocks) = store.blocks(client) else {
                        break;
                    };
                    if si == 0 || si >= blocks.len() || blocks[si].id().clock < del.clock {
                        break;
                    }
                    let merged = store.try_merge_with_lefts(client, si);
                    match si.checked_sub(1 + merged) {
                        Some(next) => si = next,
                        None => break,
                    }
                }
            }
        }
    }

    // ── Encoding ───────────────────────────────────────────────────────────

    /// Writes clients in descending id order, each with its ranges sorted
    /// and coalesced. Unsorted or overlapping sets are normalized first.
    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        let mut normalized = self.clone();
        normalized.sort_and_merge();
        let mut clients: Vec<_> = normalized.clients.iter().collect();
        clients.sort_by(|a, b| b.0.cmp(a.0));
        encoder.rest().var_uint(clients.len() as u64);
        for (client, dels) in clients {
            encoder.reset_ds_cur_val();
            encoder.rest().var_uint(*client);
            encoder.rest().var_uint(dels.len() as u64);
            for del in dels {
                encoder.write_ds_clock(del.clock);
                encoder.write_ds_len(del.len);
            }
        }
    }

    pub fn decode<'a, D: Decoder<'a>>(decoder: &mut D) -> Result<DeleteSet> {
        let mut ds = DeleteSet::new();
        let num_clients = decoder.rest().var_uint()?;
        for _ in 0..num_clients {
            decoder.reset_ds_cur_val();
            let client = decoder.rest().var_uint()?;
            let num_deletes = decoder.rest().var_uint()?;
            for _ in 0..num_deletes {
                let clock = decoder.read_ds_clock()?;
                let len = decoder.read_ds_len()?;
                if len == 0 || clock.checked_add(len).is_none() {
                    return Err(Error::InvalidRange { clock: clock as u64, len: len as u64 });
                }
                ds.add(client, clock, len);
            }
        }
        Ok(ds)
    }

    pub fn encode_v1(&self) -> Vec<u8> {
        let mut encoder = EncoderV1::new();
        self.encode(&mut encoder);
        encoder.to_vec()
    }

    pub fn encode_v2(&self) -> Vec<u8> {
        let mut encoder = EncoderV2::new();
        self.encode(&mut encoder);
        encoder.to_vec()
    }

    pub fn decode_v1(data: &[u8]) -> Result<DeleteSet> {
        DeleteSet::decode(&mut DecoderV1::new(data)?)
    }

    pub fn decode_v2(data: &[u8]) -> Result<DeleteSet> {
        DeleteSet::decode(&mut DecoderV2::new(data)?)
    }
}

impl FromIterator<(ID, u32)> for DeleteSet {
    fn from_iter<T: IntoIterator<Item = (ID, u32)>>(iter: T) -> Self {
        let mut ds = DeleteSet::new();
        for (id, len) in iter {
            ds.insert(id, len);
        }
        ds.sort_and_merge();
        ds
    }
}

/// Discards the payload of a deleted item. Nested containers take their
/// children down with them as GC ranges.
pub(crate) fn gc_item(
    store: &mut StructStore,
    types: &mut HashMap<BranchPtr, Branch>,
    id: ID,
    parent_gcd: bool,
) -> Result<()> {
    let Some(item) = store.get_item(&id) else {
        return Ok(());
    };
    let start = item.id;
    let len = item.len;
    if matches!(item.content, ItemContent::Type(_)) {
        if let Some(branch) = types.remove(&BranchPtr::Nested(start)) {
            let mut next = branch.start;
            while let Some(child) = next {
                next = store.get_item(&child).and_then(|i| i.right);
                gc_item(store, types, child, true)?;
            }
            for last in branch.map.into_values() {
                let mut next = Some(last);
                while let Some(child) = next {
                    next = store.get_item(&child).and_then(|i| i.left);
                    gc_item(store, types, child, true)?;
                }
            }
        }
    }
    if parent_gcd {
        store.replace_with_gc(&start)
    } else {
        if let Some(item) = store.get_item_mut(&start) {
            item.content = ItemContent::Deleted(len);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_and_merge_coalesces_adjacent_ranges() {
        let mut ds = DeleteSet::new();
        ds.add(1, 5, 2);
        ds.add(1, 0, 2);
        ds.add(1, 2, 1);
        ds.add(1, 6, 4);
        ds.sort_and_merge();
        assert_eq!(ds.ranges(&1).unwrap(), [DeleteItem::new(0, 3), DeleteItem::new(5, 5)]);
        assert!(ds.is_deleted(&ID::new(1, 2)));
        assert!(!ds.is_deleted(&ID::new(1, 3)));
        assert!(ds.is_deleted(&ID::new(1, 9)));
        assert!(!ds.is_deleted(&ID::new(1, 10)));
        assert!(!ds.is_deleted(&ID::new(2, 0)));
    }

    #[test]
    fn merge_all_unions_clients() {
        let a: DeleteSet = [(ID::new(1, 0), 2), (ID::new(2, 4), 1)].into_iter().collect();
        let b: DeleteSet = [(ID::new(1, 2), 3)].into_iter().collect();
        let merged = DeleteSet::merge_all([&a, &b]);
        assert_eq!(merged.ranges(&1).unwrap(), [DeleteItem::new(0, 5)]);
        assert_eq!(merged.ranges(&2).unwrap(), [DeleteItem::new(4, 1)]);
    }

    #[test]
    fn v1_layout_is_descending_by_client() {
        let ds: DeleteSet = [(ID::new(1, 3), 2), (ID::new(9, 0), 1)].into_iter().collect();
        assert_eq!(ds.encode_v1(), [2, 9, 1, 0, 1, 1, 1, 3, 2]);
        assert_eq!(DeleteSet::decode_v1(&ds.encode_v1()).unwrap(), ds);
        assert_eq!(DeleteSet::decode_v2(&ds.encode_v2()).unwrap(), ds);
    }

    #[test]
    fn truncated_input_is_an_error() {
        assert!(matches!(DeleteSet::decode_v1(&[1, 5]), Err(Error::Buffer(_))));
    }

    #[test]
    fn from_store_joins_adjacent_deleted_blocks() {
        use crate::block::BlockRange;
        let mut store = StructStore::new();
        store.add_block(Block::GC(BlockRange::new(ID::new(1, 0), 2))).unwrap();
        store.add_block(Block::GC(BlockRange::new(ID::new(1, 2), 1))).unwrap();
        let ds = DeleteSet::from_store(&store);
        assert_eq!(ds.ranges(&1).unwrap(), [DeleteItem::new(0, 3)]);
    }

    #[test]
    fn unsorted_overlapping_ranges_encode_normalized() {
        let mut ds = DeleteSet::new();
        ds.add(1, 6, 2);
        ds.add(1, 0, 4);
        ds.add(1, 2, 3);
        let mut merged = ds.clone();
        merged.sort_and_merge();
        assert_eq!(merged.ranges(&1).unwrap(), [DeleteItem::new(0, 5), DeleteItem::new(6, 2)]);

        assert_eq!(ds.encode_v1(), merged.encode_v1());
        assert_eq!(ds.encode_v2(), merged.encode_v2());
        assert_eq!(DeleteSet::decode_v2(&ds.encode_v2()).unwrap(), merged);
    }
}
