//! Operations on encoded updates that need no document: merging, diffing
//! against a state vector, format conversion and metadata.
//!
//! Each operation has a V1 and a V2 entry point working on bytes, built on
//! the corresponding [`Update`] method.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

use crate::block::{Block, BlockRange};
use crate::delete_set::DeleteSet;
use crate::error::Result;
use crate::id::{StateVector, ID};
use crate::update::Update;

/// Clock ranges covered by an update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateMeta {
    /// First clock per client.
    pub from: StateVector,
    /// Clock after the last struct per client.
    pub to: StateVector,
}

fn push(out: &mut Update, block: Block) {
    if block.is_empty() {
        return;
    }
    out.blocks.entry(block.id().client).or_default().push_back(block);
}

/// Cursor order: descending client, ascending clock.
fn cursor_order(a: &Block, b: &Block) -> Ordering {
    let (a, b) = (a.id(), b.id());
    b.client.cmp(&a.client).then(a.clock.cmp(&b.clock))
}

impl Update {
    /// Combines several updates into one. Overlapping struct ranges are
    /// deduplicated and gaps between runs of a client become skips.
    pub fn merge(updates: Vec<Update>) -> Update {
        let mut delete_sets = Vec::with_capacity(updates.len());
        let mut cursors: Vec<VecDeque<Block>> = Vec::with_capacity(updates.len());
        for update in updates {
            let clients = update.clients_desc();
            let Update { mut blocks, delete_set } = update;
            let mut cursor = VecDeque::new();
            for client in clients {
                if let Some(run) = blocks.remove(&client) {
                    cursor.extend(run.into_iter().filter(|b| !b.is_skip()));
                }
            }
            cursors.push(cursor);
            delete_sets.push(delete_set);
        }

        let mut out = Update::new();
        let mut current: Option<Block> = None;
        loop {
            cursors.retain(|c| !c.is_empty());
            cursors.sort_by(|a, b| cursor_order(&a[0], &b[0]));
            let Some(cursor) = cursors.first_mut() else {
                break;
            };
            let first_client = cursor[0].id().client;

            match current.as_mut() {
                None => current = cursor.pop_front(),
                Some(write) => {
                    let write_client = write.id().client;
                    let write_end = write.id().clock + write.len();
                    let mut iterated = false;
                    while cursor
                        .front()
                        .is_some_and(|c| c.id().clock + c.len() <= write_end && c.id().client >= write_client)
                    {
                        cursor.pop_front();
                        iterated = true;
                    }
                    let Some(curr) = cursor.front() else {
                        continue;
                    };
                    let curr_clock = curr.id().clock;
                    if curr.id().client != first_client || (iterated && curr_clock > write_end) {
                        continue;
                    }
                    if first_client != write_client {
                        if let Some(next) = cursor.pop_front() {
                            push(&mut out, std::mem::replace(write, next));
                        }
                    } else if write_end < curr_clock {
                        let gap = curr_clock - write_end;
                        if let Block::Skip(range) = write {
                            range.len += gap;
                        } else {
                            let skip = Block::Skip(BlockRange::new(ID::new(first_client, write_end), gap));
                            push(&mut out, std::mem::replace(write, skip));
                        }
                    } else {
                        let overlap = write_end - curr_clock;
                        if overlap > 0 {
                            if let Block::Skip(range) = write {
                                range.len = range.len.saturating_sub(overlap);
                            } else {
                                cursor[0] = cursor[0].slice(overlap);
                            }
                        }
                        if let Some(curr) = cursor.pop_front() {
                            if !write.try_merge_detached(&curr) {
                                push(&mut out, std::mem::replace(write, curr));
                            }
                        }
                    }
                }
            }

            // structs that directly continue the current one
            if let Some(write) = current.as_mut() {
                while let Some(next) = cursor.front() {
                    let continues = next.id().client == first_client
                        && next.id().clock == write.id().clock + write.len()
                        && !next.is_skip();
                    if !continues {
                        break;
                    }
                    if let Some(next) = cursor.pop_front() {
                        push(&mut out, std::mem::replace(write, next));
                    }
                }
            }
        }
        if let Some(write) = current {
            push(&mut out, write);
        }
        out.delete_set = DeleteSet::merge_all(&delete_sets);
        out
    }

    /// The part of this update that `sv` does not cover. The delete set is
    /// kept whole.
    pub fn diff(&self, sv: &StateVector) -> Update {
        let mut blocks = HashMap::new();
        for (client, run) in &self.blocks {
            let known = sv.get(client);
            let mut rest = run.iter();
            let mut out = VecDeque::new();
            for block in rest.by_ref() {
                if block.is_skip() {
                    continue;
                }
                if block.id().clock + block.len() > known {
                    out.push_back(block.slice(known.saturating_sub(block.id().clock)));
                    break;
                }
            }
            if !out.is_empty() {
                out.extend(rest.cloned());
                blocks.insert(*client, out);
            }
        }
        Update {
            blocks,
            delete_set: self.delete_set.clone(),
        }
    }

    /// State a document would reach by applying only this update: per
    /// client, the end of the gap-free prefix starting at clock 0.
    pub fn state_vector(&self) -> StateVector {
        let mut sv = StateVector::new();
        for (client, run) in &self.blocks {
            let mut clock = 0;
            for block in run {
                if block.is_skip() || block.id().clock != clock {
                    break;
                }
                clock += block.len();
            }
            if clock > 0 {
                sv.set(*client, clock);
            }
        }
        sv
    }

    pub fn meta(&self) -> UpdateMeta {
        let mut meta = UpdateMeta::default();
        for (client, run) in &self.blocks {
            if let (Some(first), Some(last)) = (run.front(), run.back()) {
                meta.from.set(*client, first.id().clock);
                meta.to.set(*client, last.id().clock + last.len());
            }
        }
        meta
    }
}

// ── Byte-level entry points ────────────────────────────────────────────────

fn decode_all<T: AsRef<[u8]>>(updates: &[T], decode: fn(&[u8]) -> Result<Update>) -> Result<Vec<Update>> {
    updates.iter().map(|u| decode(u.as_ref())).collect()
}

pub fn merge_updates<T: AsRef<[u8]>>(updates: &[T]) -> Result<Vec<u8>> {
    if let [single] = updates {
        return Ok(single.as_ref().to_vec());
    }
    Ok(Update::merge(decode_all(updates, Update::decode_v1)?).encode_v1())
}

pub fn merge_updates_v2<T: AsRef<[u8]>>(updates: &[T]) -> Result<Vec<u8>> {
    if let [single] = updates {
        return Ok(single.as_ref().to_vec());
    }
    Ok(Update::merge(decode_all(updates, Update::decode_v2)?).encode_v2())
}

/// Part of `update` not covered by the encoded state vector `sv`.
pub fn diff_update(update: &[u8], sv: &[u8]) -> Result<Vec<u8>> {
    let sv = StateVector::decode(sv)?;
    Ok(Update::decode_v1(update)?.diff(&sv).encode_v1())
}

pub fn diff_update_v2(update: &[u8], sv: &[u8]) -> Result<Vec<u8>> {
    let sv = StateVector::decode(sv)?;
    Ok(Update::decode_v2(update)?.diff(&sv).encode_v2())
}

pub fn convert_update_format_v1_to_v2(update: &[u8]) -> Result<Vec<u8>> {
    Ok(Update::decode_v1(update)?.encode_v2())
}

pub fn convert_update_format_v2_to_v1(update: &[u8]) -> Result<Vec<u8>> {
    Ok(Update::decode_v2(update)?.encode_v1())
}

pub fn encode_state_vector_from_update(update: &[u8]) -> Result<Vec<u8>> {
    Ok(Update::decode_v1(update)?.state_vector().encode())
}

pub fn encode_state_vector_from_update_v2(update: &[u8]) -> Result<Vec<u8>> {
    Ok(Update::decode_v2(update)?.state_vector().encode())
}

pub fn parse_update_meta(update: &[u8]) -> Result<UpdateMeta> {
    Ok(Update::decode_v1(update)?.meta())
}

pub fn parse_update_meta_v2(update: &[u8]) -> Result<UpdateMeta> {
    Ok(Update::decode_v2(update)?.meta())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::any::Any;
    use crate::doc::Doc;
    use crate::types::{BranchPtr, ReadTxn};

    /// Three successive edits of one document, captured as separate updates.
    fn edits() -> (Doc, Vec<Vec<u8>>) {
        let mut doc = Doc::with_client_id(1);
        let list = doc.get_or_insert_array("list").unwrap();
        let mut updates = Vec::new();
        for value in ["a", "b", "c"] {
            let sv = doc.state_vector();
            doc.transact(|txn| txn.push(&list, vec![Any::from(value)])).unwrap();
            updates.push(doc.encode_state_as_update_v1(&sv).unwrap());
        }
        doc.transact(|txn| txn.remove_range(&list, 1, 1)).unwrap();
        updates.push(doc.encode_state_as_update_v1(&doc.state_vector()).unwrap());
        (doc, updates)
    }

    fn load(updates: &[Vec<u8>]) -> Doc {
        let mut doc = Doc::with_client_id(99);
        for update in updates {
            doc.apply_update_v1(update).unwrap();
        }
        doc
    }

    #[test]
    fn merged_update_reproduces_document() {
        let (source, updates) = edits();
        let merged = merge_updates(&updates).unwrap();
        let mut doc = load(&[merged]);
        let list = doc.get_or_insert_array("list").unwrap();
        let expected = source.to_json(&list);
        assert_eq!(doc.to_json(&list), expected);
        assert_eq!(doc.state_vector(), source.state_vector());
    }

    #[test]
    fn merging_disjoint_ranges_inserts_a_skip() {
        let (_, updates) = edits();
        let merged = Update::decode_v1(&merge_updates(&[&updates[0], &updates[2]]).unwrap()).unwrap();
        let run: Vec<bool> = merged.blocks[&1].iter().map(Block::is_skip).collect();
        assert_eq!(run, vec![false, true, false]);
        assert_eq!(merged.state_vector().get(&1), 1);
        assert_eq!(merged.meta().to.get(&1), 3);
    }

    #[test]
    fn merge_order_does_not_matter() {
        let (source, updates) = edits();
        let reversed: Vec<Vec<u8>> = updates.iter().rev().cloned().collect();
        let forward = merge_updates(&updates).unwrap();
        let backward = merge_updates(&reversed).unwrap();
        let nested = merge_updates(&[merge_updates(&updates[..2]).unwrap(), merge_updates(&updates[2..]).unwrap()]).unwrap();
        for merged in [forward, backward, nested] {
            let mut doc = load(&[merged]);
            let list = doc.get_or_insert_array("list").unwrap();
            assert_eq!(doc.to_json(&list), source.to_json(&BranchPtr::Root("list".into())));
        }
    }

    #[test]
    fn diff_drops_known_prefix() {
        let (source, updates) = edits();
        let full = source.encode_state_as_update_v1(&StateVector::new()).unwrap();
        let partial = load(&updates[..1]);
        let diff = diff_update(&full, &partial.state_vector().encode()).unwrap();
        assert!(diff.len() < full.len());
        let meta = parse_update_meta(&diff).unwrap();
        assert_eq!(meta.from.get(&1), 1);

        let mut doc = partial;
        doc.apply_update_v1(&diff).unwrap();
        let list = doc.get_or_insert_array("list").unwrap();
        assert_eq!(doc.to_json(&list).to_json_string(), r#"["a","c"]"#);
    }

    #[test]
    fn format_conversion_round_trips() {
        let (source, _) = edits();
        let v1 = source.encode_state_as_update_v1(&StateVector::new()).unwrap();
        let v2 = convert_update_format_v1_to_v2(&v1).unwrap();
        assert_eq!(convert_update_format_v2_to_v1(&v2).unwrap(), v1);
        assert_eq!(encode_state_vector_from_update_v2(&v2).unwrap(), source.state_vector().encode());
        assert_eq!(parse_update_meta_v2(&v2).unwrap(), parse_update_meta(&v1).unwrap());
    }

    #[test]
    fn single_update_passes_through() {
        let bytes = vec![0u8, 0];
        assert_eq!(merge_updates(&[&bytes]).unwrap(), bytes);
    }
}
