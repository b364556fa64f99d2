//! Causal integration of structs.
//!
//! [`integrate_structs`] applies as many received structs as their causal
//! dependencies allow and hands the rest back as a pending update.
//! [`integrate_item`] places one item into its parent's list using the
//! YATA ordering rule, which makes the final position independent of the
//! order in which concurrent inserts arrive.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::any::Any;
use crate::block::{Block, BlockRange, Item, ItemContent, TypePtr, TypeRef};
use crate::error::{Error, Result};
use crate::id::{ClientID, StateVector, ID};
use crate::store::PendingUpdate;
use crate::transaction::TransactionMut;
use crate::types::{Branch, BranchPtr};
use crate::update::Update;

// ── Dependency resolution ──────────────────────────────────────────────────

/// Returns the client of the first dependency of `item` that is not known
/// locally. When every dependency is known, resolves the item's neighbours
/// and parent against the store.
fn get_missing(item: &mut Item, txn: &mut TransactionMut<'_>) -> Result<Option<ClientID>> {
    let store = &txn.doc.blocks;
    let unknown = |id: &ID| id.client != item.id.client && id.clock >= store.get_state(&id.client);
    if let Some(origin) = item.origin.as_ref().filter(|id| unknown(id)) {
        return Ok(Some(origin.client));
    }
    if let Some(right_origin) = item.right_origin.as_ref().filter(|id| unknown(id)) {
        return Ok(Some(right_origin.client));
    }
    if let TypePtr::Id(parent) = &item.parent {
        if unknown(parent) {
            return Ok(Some(parent.client));
        }
    }

    let mut gc_neighbour = false;
    let mut neighbour_parent = None;
    if let Some(origin) = item.origin {
        let index = txn.doc.blocks.get_item_clean_end(&origin, &mut txn.merge_blocks)?;
        let block = &txn.doc.blocks.blocks(&origin.client).unwrap_or_default()[index];
        let last = block.last_id();
        item.left = Some(last);
        item.origin = Some(last);
        match block {
            Block::Item(left) => neighbour_parent = Some((left.parent.clone(), left.parent_sub.clone())),
            _ => gc_neighbour = true,
        }
    }
    if let Some(right_origin) = item.right_origin {
        let index = txn.doc.blocks.get_item_clean_start(&right_origin, &mut txn.merge_blocks)?;
        let block = &txn.doc.blocks.blocks(&right_origin.client).unwrap_or_default()[index];
        let first = *block.id();
        item.right = Some(first);
        item.right_origin = Some(first);
        match block {
            Block::Item(right) => {
                if neighbour_parent.is_none() {
                    neighbour_parent = Some((right.parent.clone(), right.parent_sub.clone()));
                }
            }
            _ => gc_neighbour = true,
        }
    }

    if gc_neighbour {
        item.parent = TypePtr::Unknown;
    } else if item.parent == TypePtr::Unknown {
        if let Some((parent, parent_sub)) = neighbour_parent {
            item.parent = parent;
            item.parent_sub = parent_sub;
        }
    } else if let TypePtr::Id(parent) = item.parent {
        item.parent = match txn.doc.blocks.find(&parent)? {
            Block::Item(holder) if matches!(holder.content, ItemContent::Type(_)) => {
                TypePtr::Branch(BranchPtr::Nested(holder.id))
            }
            _ => TypePtr::Unknown,
        };
    }
    Ok(None)
}

// ── Item integration ───────────────────────────────────────────────────────

/// First id of the item covering `id`.
fn start_of(txn: &TransactionMut<'_>, id: &ID) -> Option<ID> {
    txn.doc.blocks.get_item(id).map(|item| item.id)
}

/// Start of the map-key chain that `last` ends.
fn map_chain_start(txn: &TransactionMut<'_>, last: ID) -> Option<ID> {
    let mut current = txn.doc.blocks.get_item(&last)?;
    while let Some(left) = current.left {
        match txn.doc.blocks.get_item(&left) {
            Some(item) => current = item,
            None => break,
        }
    }
    Some(current.id)
}

/// Resolves the parent container, creating root containers on first use.
fn resolve_parent(txn: &mut TransactionMut<'_>, parent: &TypePtr) -> Option<BranchPtr> {
    let TypePtr::Branch(ptr) = parent else {
        return None;
    };
    match ptr {
        BranchPtr::Root(_) => {
            txn.doc
                .types
                .entry(ptr.clone())
                .or_insert_with(|| Branch::new(TypeRef::Undefined, None));
            Some(ptr.clone())
        }
        BranchPtr::Nested(_) => txn.doc.types.contains_key(ptr).then(|| ptr.clone()),
    }
}

/// Integrates `item` skipping its first `offset` elements, which are
/// already known locally.
pub(crate) fn integrate_item(txn: &mut TransactionMut<'_>, mut item: Item, offset: u32) -> Result<()> {
    if offset > 0 {
        item.id.clock += offset;
        let left = ID::new(item.id.client, item.id.clock - 1);
        let index = txn.doc.blocks.get_item_clean_end(&left, &mut txn.merge_blocks)?;
        let last = txn.doc.blocks.blocks(&left.client).unwrap_or_default()[index].last_id();
        item.left = Some(last);
        item.origin = Some(last);
        item.content = item
            .content
            .splice(offset)
            .ok_or(Error::InvalidRange { clock: item.id.clock as u64, len: offset as u64 })?;
        item.len -= offset;
    }

    let Some(parent) = resolve_parent(txn, &item.parent) else {
        return txn.doc.blocks.add_block(Block::GC(BlockRange::new(item.id, item.len)));
    };
    item.parent = TypePtr::Branch(parent.clone());

    let left_right = item.left.and_then(|l| txn.doc.blocks.get_item(&l)).map(|l| l.right);
    let right_has_left = item
        .right
        .and_then(|r| txn.doc.blocks.get_item(&r))
        .map(|r| r.left.is_some());
    let needs_scan = match left_right {
        None => right_has_left.unwrap_or(true),
        Some(right_of_left) => right_of_left != item.right,
    };
    if needs_scan {
        resolve_conflicts(txn, &mut item, &parent);
    }

    // reconnect neighbours
    let parent_sub = item.parent_sub.clone();
    if let Some(left) = item.left {
        if let Some(left_item) = txn.doc.blocks.get_item_mut(&left) {
            item.right = left_item.right;
            left_item.right = Some(item.id);
        }
    } else {
        let right = match &parent_sub {
            Some(key) => {
                let last = txn.doc.types.get(&parent).and_then(|b| b.map.get(key).copied());
                last.and_then(|last| map_chain_start(txn, last))
            }
            None => {
                let branch = txn.doc.types.get_mut(&parent).ok_or(Error::NotFound(item.id))?;
                branch.start.replace(item.id)
            }
        };
        item.right = right;
    }
    if let Some(right) = item.right {
        if let Some(right_item) = txn.doc.blocks.get_item_mut(&right) {
            right_item.left = Some(item.last_id());
        }
    } else if let Some(key) = &parent_sub {
        if let Some(branch) = txn.doc.types.get_mut(&parent) {
            branch.map.insert(key.clone(), item.last_id());
        }
        if let Some(left) = item.left {
            txn.delete_item(&left)?;
        }
    }

    // content side effects that must precede the store insert
    let id = item.id;
    let len = item.len;
    match &item.content {
        ItemContent::Deleted(_) => {
            txn.delete_set.insert(id, len);
            item.deleted = true;
        }
        ItemContent::Type(type_ref) => {
            txn.doc
                .types
                .insert(BranchPtr::Nested(id), Branch::new(type_ref.clone(), Some(id)));
        }
        ItemContent::Doc { guid, opts } => {
            txn.subdocs_added.insert(guid.clone());
            if should_load(opts) {
                txn.subdocs_loaded.insert(guid.clone());
            }
        }
        _ => {}
    }
    if parent_sub.is_none() && item.is_visible() {
        if let Some(branch) = txn.doc.types.get_mut(&parent) {
            branch.len += len;
        }
    }
    let has_right = item.right.is_some();
    txn.doc.blocks.add_block(Block::from(item))?;
    txn.add_changed_type(&parent, parent_sub.clone());

    let parent_deleted = txn
        .doc
        .types
        .get(&parent)
        .and_then(|b| b.item)
        .and_then(|holder| txn.doc.blocks.get_item(&holder))
        .map(|holder| holder.deleted)
        .unwrap_or(false);
    if parent_deleted || (parent_sub.is_some() && has_right) {
        txn.delete_item(&id)?;
    }
    Ok(())
}

fn should_load(opts: &Any) -> bool {
    let Any::Map(map) = opts else {
        return false;
    };
    ["shouldLoad", "autoLoad"]
        .iter()
        .any(|key| matches!(map.get(*key), Some(Any::Bool(true))))
}

/// YATA: moves `item.left` past every concurrently inserted item that
/// must precede it.
fn resolve_conflicts(txn: &TransactionMut<'_>, item: &mut Item, parent: &BranchPtr) {
    let mut left = item.left;
    let mut next = match (left, &item.parent_sub) {
        (Some(l), _) => txn.doc.blocks.get_item(&l).and_then(|l| l.right),
        (None, Some(key)) => txn
            .doc
            .types
            .get(parent)
            .and_then(|b| b.map.get(key).copied())
            .and_then(|last| map_chain_start(txn, last)),
        (None, None) => txn.doc.types.get(parent).and_then(|b| b.start),
    };
    let mut conflicting: HashSet<ID> = HashSet::new();
    let mut before_origin: HashSet<ID> = HashSet::new();
    while let Some(o_id) = next {
        if Some(o_id) == item.right {
            break;
        }
        let Some(o) = txn.doc.blocks.get_item(&o_id) else {
            break;
        };
        before_origin.insert(o.id);
        conflicting.insert(o.id);
        if o.origin == item.origin {
            if o.id.client < item.id.client {
                left = Some(o.last_id());
                conflicting.clear();
            } else if o.right_origin == item.right_origin {
                break;
            }
        } else if let Some(o_origin) = o.origin.and_then(|id| start_of(txn, &id)) {
            if !before_origin.contains(&o_origin) {
                break;
            }
            if !conflicting.contains(&o_origin) {
                left = Some(o.last_id());
                conflicting.clear();
            }
        } else {
            break;
        }
        next = o.right;
    }
    item.left = left;
}

// ── Struct batches ─────────────────────────────────────────────────────────

/// Integrates received structs in causal order. Structs whose dependencies
/// are missing are returned as a V2-encoded pending update.
pub(crate) fn integrate_structs(
    txn: &mut TransactionMut<'_>,
    mut refs: HashMap<ClientID, VecDeque<Block>>,
) -> Result<Option<PendingUpdate>> {
    let mut clients: Vec<ClientID> = refs.keys().copied().collect();
    clients.sort_unstable();

    let mut stack: Vec<Block> = Vec::new();
    let mut rest: HashMap<ClientID, VecDeque<Block>> = HashMap::new();
    let mut missing = StateVector::new();
    let mut local_state: HashMap<ClientID, u32> = HashMap::new();

    let next_target = |clients: &mut Vec<ClientID>, refs: &HashMap<ClientID, VecDeque<Block>>| {
        while let Some(&client) = clients.last() {
            if refs.get(&client).is_some_and(|q| !q.is_empty()) {
                return Some(client);
            }
            clients.pop();
        }
        None
    };

    let mut current = next_target(&mut clients, &refs);
    let mut head = current.and_then(|c| refs.get_mut(&c)).and_then(VecDeque::pop_front);

    while let Some(mut block) = head.take() {
        if !block.is_skip() {
            let client = block.id().client;
            let local = *local_state
                .entry(client)
                .or_insert_with(|| txn.doc.blocks.get_state(&client));
            let clock = block.id().clock;
            if local < clock {
                missing.set_min(client, clock - 1);
                stack.push(block);
                flush_stack(&mut stack, &mut refs, &mut rest, &mut clients);
            } else {
                let dependency = match &mut block {
                    Block::Item(item) => get_missing(item, txn)?,
                    _ => None,
                };
                if let Some(dep) = dependency {
                    stack.push(block);
                    match refs.get_mut(&dep).and_then(VecDeque::pop_front) {
                        Some(next) => {
                            head = Some(next);
                            continue;
                        }
                        None => {
                            missing.set_min(dep, txn.doc.blocks.get_state(&dep));
                            flush_stack(&mut stack, &mut refs, &mut rest, &mut clients);
                        }
                    }
                } else {
                    let offset = local - clock;
                    if offset < block.len() {
                        let end = clock + block.len();
                        match block {
                            Block::Item(item) => integrate_item(txn, *item, offset)?,
                            Block::GC(range) => {
                                let id = ID::new(client, clock + offset);
                                txn.doc.blocks.add_block(Block::GC(BlockRange::new(id, range.len - offset)))?;
                            }
                            Block::Skip(_) => {}
                        }
                        local_state.insert(client, end);
                    }
                }
            }
        }

        head = stack.pop();
        if head.is_none() {
            head = current.and_then(|c| refs.get_mut(&c)).and_then(VecDeque::pop_front);
        }
        if head.is_none() {
            current = next_target(&mut clients, &refs);
            head = current.and_then(|c| refs.get_mut(&c)).and_then(VecDeque::pop_front);
        }
    }

    if rest.is_empty() {
        return Ok(None);
    }
    for blocks in rest.values_mut() {
        blocks.make_contiguous().sort_by_key(|b| b.id().clock);
    }
    debug!(clients = rest.len(), "buffering structs with missing dependencies");
    let update = Update {
        blocks: rest,
        ..Update::default()
    };
    Ok(Some(PendingUpdate {
        missing,
        update: update.encode_v2(),
    }))
}

/// Moves the stack, and every remaining struct of the clients on it, to
/// `rest`.
fn flush_stack(
    stack: &mut Vec<Block>,
    refs: &mut HashMap<ClientID, VecDeque<Block>>,
    rest: &mut HashMap<ClientID, VecDeque<Block>>,
    clients: &mut Vec<ClientID>,
) {
    for block in stack.drain(..) {
        let client = block.id().client;
        let target = rest.entry(client).or_default();
        target.push_back(block);
        if let Some(remaining) = refs.remove(&client) {
            target.extend(remaining);
        }
        clients.retain(|c| *c != client);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::doc::Doc;
    use crate::types::ReadTxn;

    fn text_item(id: ID, origin: Option<ID>, right_origin: Option<ID>, s: &str) -> Block {
        let parent = if origin.is_none() && right_origin.is_none() {
            TypePtr::Branch(BranchPtr::Root(Arc::from("text")))
        } else {
            TypePtr::Unknown
        };
        Block::from(Item::new(id, None, origin, None, right_origin, parent, None, ItemContent::String(s.into())))
    }

    fn apply(doc: &mut Doc, blocks: Vec<Block>) -> Option<PendingUpdate> {
        let mut refs: HashMap<ClientID, VecDeque<Block>> = HashMap::new();
        for block in blocks {
            refs.entry(block.id().client).or_default().push_back(block);
        }
        doc.transact(|txn| integrate_structs(txn, refs)).unwrap()
    }

    #[test]
    fn concurrent_inserts_order_by_client() {
        let mut a = Doc::with_client_id(10);
        let text = a.get_or_insert_text("text").unwrap();
        // both insert at the start of an empty text
        let x = text_item(ID::new(1, 0), None, None, "x");
        let y = text_item(ID::new(2, 0), None, None, "y");
        assert!(apply(&mut a, vec![y.clone()]).is_none());
        assert!(apply(&mut a, vec![x.clone()]).is_none());

        let mut b = Doc::with_client_id(11);
        b.get_or_insert_text("text").unwrap();
        assert!(apply(&mut b, vec![x, y]).is_none());

        assert_eq!(a.get_string(&text), "xy");
        assert_eq!(b.get_string(&text), "xy");
    }

    #[test]
    fn missing_origin_is_buffered() {
        let mut doc = Doc::with_client_id(10);
        let text = doc.get_or_insert_text("text").unwrap();
        let second = text_item(ID::new(2, 0), Some(ID::new(1, 0)), None, "b");
        let pending = apply(&mut doc, vec![second]).expect("pending");
        assert_eq!(pending.missing.get(&1), 0);
        assert_eq!(doc.get_string(&text), "");
    }

    #[test]
    fn gap_in_client_history_is_buffered() {
        let mut doc = Doc::with_client_id(10);
        let late = text_item(ID::new(1, 3), None, None, "late");
        let pending = apply(&mut doc, vec![late]).expect("pending");
        assert_eq!(pending.missing.get(&1), 2);
        assert_eq!(doc.state_vector().get(&1), 0);
    }

    #[test]
    fn overlapping_struct_integrates_only_the_suffix() {
        let mut doc = Doc::with_client_id(10);
        let text = doc.get_or_insert_text("text").unwrap();
        apply(&mut doc, vec![text_item(ID::new(1, 0), None, None, "ab")]);
        apply(&mut doc, vec![text_item(ID::new(1, 0), None, None, "abcd")]);
        assert_eq!(doc.get_string(&text), "abcd");
        assert_eq!(doc.state_vector().get(&1), 4);
    }

    #[test]
    fn orphaned_items_become_gc() {
        let mut doc = Doc::with_client_id(10);
        let gc = Block::GC(BlockRange::new(ID::new(1, 0), 2));
        let child = text_item(ID::new(2, 0), Some(ID::new(1, 1)), None, "z");
        assert!(apply(&mut doc, vec![gc, child]).is_none());
        assert!(matches!(doc.state().blocks.find(&ID::new(2, 0)).unwrap(), Block::GC(_)));
    }
}
