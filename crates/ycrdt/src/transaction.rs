//! Mutation scope.
//!
//! A [`TransactionMut`] borrows the document state for the duration of one
//! mutation scope. Nested mutations reuse the same transaction simply by
//! receiving `&mut TransactionMut`; cleanup runs once, when the scope that
//! opened the transaction ends.
//!
//! Cleanup order:
//!
//! 1. sort and merge the transaction's delete set, capture the after state
//! 2. per-container observers, then deep observers (shallow paths first),
//!    then `after_transaction`
//! 3. garbage collection and struct merging
//! 4. client-id regeneration when a remote update reused the local id
//! 5. `after_transaction_cleanup`, `update`, `update_v2`, `subdocs`

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{trace, warn};

use crate::block::{Block, Item, ItemContent, TypePtr};
use crate::codec::{Encoder, EncoderV1, EncoderV2};
use crate::delete_set::DeleteSet;
use crate::doc::{generate_client_id, DocEvents, DocState, GcFilter};
use crate::error::{Error, Result};
use crate::event::{path_to, Event, ObserverResult, SubdocsEvent};
use crate::id::{ClientID, StateVector, ID};
use crate::store::find_pivot;
use crate::types::BranchPtr;
use crate::update::write_clients_blocks;

/// Tag identifying who started a transaction, passed through to events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(Arc<[u8]>);

impl Origin {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl From<&str> for Origin {
    fn from(s: &str) -> Self {
        Origin(Arc::from(s.as_bytes()))
    }
}

impl From<String> for Origin {
    fn from(s: String) -> Self {
        Origin::from(s.as_str())
    }
}

impl From<u64> for Origin {
    fn from(n: u64) -> Self {
        Origin(Arc::from(n.to_be_bytes().as_slice()))
    }
}

/// Mutation deferred by an observer; runs in its own transaction after
/// the current cleanup finished.
pub type Job = Box<dyn FnOnce(&mut TransactionMut<'_>) -> Result<()>>;

pub struct TransactionMut<'doc> {
    pub(crate) doc: &'doc mut DocState,
    pub before_state: StateVector,
    pub after_state: StateVector,
    pub delete_set: DeleteSet,
    pub origin: Option<Origin>,
    /// False for transactions that apply remote updates.
    pub local: bool,
    /// Changed containers with the changed map keys (`None` for list
    /// changes), in order of first change.
    pub(crate) changed: IndexMap<BranchPtr, HashSet<Option<Arc<str>>>>,
    /// Structs whose neighbourhood changed and may now merge.
    pub(crate) merge_blocks: Vec<ID>,
    pub(crate) subdocs_added: HashSet<Arc<str>>,
    pub(crate) subdocs_removed: HashSet<Arc<str>>,
    pub(crate) subdocs_loaded: HashSet<Arc<str>>,
    jobs: RefCell<Vec<Job>>,
}

impl fmt::Debug for TransactionMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionMut")
            .field("before_state", &self.before_state)
            .field("delete_set", &self.delete_set)
            .field("origin", &self.origin)
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

impl<'doc> TransactionMut<'doc> {
    pub(crate) fn new(doc: &'doc mut DocState, origin: Option<Origin>, local: bool) -> Self {
        let before_state = doc.blocks.get_state_vector();
        Self {
            doc,
            before_state,
            after_state: StateVector::new(),
            delete_set: DeleteSet::new(),
            origin,
            local,
            changed: IndexMap::new(),
            merge_blocks: Vec::new(),
            subdocs_added: HashSet::new(),
            subdocs_removed: HashSet::new(),
            subdocs_loaded: HashSet::new(),
            jobs: RefCell::new(Vec::new()),
        }
    }

    pub fn client_id(&self) -> ClientID {
        self.doc.client_id
    }

    /// Queues a mutation to run in a new transaction once this one has been
    /// cleaned up. Observers use this to react to changes with changes.
    pub fn enqueue<F>(&self, job: F)
    where
        F: FnOnce(&mut TransactionMut<'_>) -> Result<()> + 'static,
    {
        self.jobs.borrow_mut().push(Box::new(job));
    }

    /// Id for the next struct created by the local client.
    pub(crate) fn next_id(&self) -> ID {
        let client = self.doc.client_id;
        ID::new(client, self.doc.blocks.get_state(&client))
    }

    /// Whether `id` was created by this transaction.
    pub fn adds(&self, id: &ID) -> bool {
        id.clock >= self.before_state.get(&id.client)
    }

    /// Whether `id` was deleted by this transaction.
    pub fn deletes(&self, id: &ID) -> bool {
        self.delete_set.is_deleted(id)
    }

    // ── Change tracking ────────────────────────────────────────────────────

    /// Records a change of `parent`, unless the container itself was created
    /// or deleted by this transaction.
    pub(crate) fn add_changed_type(&mut self, parent: &BranchPtr, parent_sub: Option<Arc<str>>) {
        let record = match self.doc.types.get(parent).and_then(|b| b.item) {
            None => true,
            Some(item_id) => {
                let deleted = self.doc.blocks.get_item(&item_id).map(|i| i.deleted).unwrap_or(true);
                item_id.clock < self.before_state.get(&item_id.client) && !deleted
            }
        };
        if record {
            self.changed.entry(parent.clone()).or_default().insert(parent_sub);
        }
    }

    // ── Deletion ───────────────────────────────────────────────────────────

    /// Deletes the whole item covering `id`. Returns false if it was already
    /// deleted (or is not an item).
    pub(crate) fn delete_item(&mut self, id: &ID) -> Result<bool> {
        let Some(item) = self.doc.blocks.get_item_mut(id) else {
            return Ok(false);
        };
        if item.deleted {
            return Ok(false);
        }
        item.deleted = true;
        let start = item.id;
        let len = item.len;
        let countable = item.is_countable();
        let parent_sub = item.parent_sub.clone();
        let parent = match &item.parent {
            TypePtr::Branch(ptr) => Some(ptr.clone()),
            _ => None,
        };
        let content = match &item.content {
            ItemContent::Type(_) => Some(None),
            ItemContent::Doc { guid, .. } => Some(Some(guid.clone())),
            _ => None,
        };

        self.delete_set.insert(start, len);
        if let Some(parent) = parent {
            if countable && parent_sub.is_none() {
                if let Some(branch) = self.doc.types.get_mut(&parent) {
                    branch.len -= len;
                }
            }
            self.add_changed_type(&parent, parent_sub);
        }
        match content {
            Some(None) => self.delete_branch_content(start)?,
            Some(Some(guid)) => {
                if !self.subdocs_added.remove(&guid) {
                    self.subdocs_removed.insert(guid);
                }
            }
            None => {}
        }
        Ok(true)
    }

    /// Deletes every child of the container held by the item `start`.
    fn delete_branch_content(&mut self, start: ID) -> Result<()> {
        let ptr = BranchPtr::Nested(start);
        let Some(branch) = self.doc.types.get(&ptr) else {
            return Ok(());
        };
        let mut children = Vec::new();
        let mut next = branch.start;
        while let Some(id) = next {
            let Some(child) = self.doc.blocks.get_item(&id) else {
                break;
            };
            children.push((child.id, child.deleted));
            next = child.right;
        }
        for last in branch.map.values() {
            if let Some(child) = self.doc.blocks.get_item(last) {
                children.push((child.id, child.deleted));
            }
        }
        for (id, deleted) in children {
            if !deleted {
                self.delete_item(&id)?;
            } else if id.clock < self.before_state.get(&id.client) {
                self.merge_blocks.push(id);
            }
        }
        self.changed.shift_remove(&ptr);
        Ok(())
    }

    // ── Update emission ────────────────────────────────────────────────────

    /// Writes every struct and deletion made by this transaction. Returns
    /// false when there is nothing to send.
    pub fn encode_update<E: Encoder>(&self, encoder: &mut E) -> bool {
        let advanced = self
            .after_state
            .iter()
            .any(|(client, clock)| self.before_state.get(client) != *clock);
        if self.delete_set.is_empty() && !advanced {
            return false;
        }
        write_clients_blocks(encoder, &self.doc.blocks, &self.before_state);
        self.delete_set.encode(encoder);
        true
    }

    pub fn encode_update_v1(&self) -> Vec<u8> {
        let mut encoder = EncoderV1::new();
        if !self.encode_update(&mut encoder) {
            return Vec::new();
        }
        encoder.to_vec()
    }

    pub fn encode_update_v2(&self) -> Vec<u8> {
        let mut encoder = EncoderV2::new();
        if !self.encode_update(&mut encoder) {
            return Vec::new();
        }
        encoder.to_vec()
    }

    // ── Cleanup ────────────────────────────────────────────────────────────

    /// Parent container of `ptr`, `None` for roots.
    fn parent_of(&self, ptr: &BranchPtr) -> Option<BranchPtr> {
        let BranchPtr::Nested(id) = ptr else {
            return None;
        };
        match &self.doc.blocks.get_item(id)?.parent {
            TypePtr::Branch(parent) => Some(parent.clone()),
            _ => None,
        }
    }

    fn is_branch_deleted(&self, ptr: &BranchPtr) -> bool {
        match ptr {
            BranchPtr::Root(_) => false,
            BranchPtr::Nested(id) => self.doc.blocks.get_item(id).map(|i| i.deleted).unwrap_or(true),
        }
    }

    /// Runs the cleanup pipeline. Observer failures do not interrupt it;
    /// the first one is returned together with the jobs observers queued.
    pub(crate) fn commit(mut self, events: &mut DocEvents, gc_filter: Option<&GcFilter>) -> (Vec<Job>, Option<Error>) {
        let mut first_error: Option<Error> = None;

        self.delete_set.sort_and_merge();
        self.after_state = self.doc.blocks.get_state_vector();
        trace!(changed = self.changed.len(), local = self.local, "transaction cleanup");
        for handler in events.before_observer_calls.iter_mut() {
            note(&mut first_error, handler(&self));
        }

        // per-container observers
        let mut changed_parent_types: IndexMap<BranchPtr, Vec<Event>> = IndexMap::new();
        let changed: Vec<(BranchPtr, HashSet<Option<Arc<str>>>)> =
            self.changed.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (ptr, keys) in changed {
            if self.is_branch_deleted(&ptr) || !self.doc.types.contains_key(&ptr) {
                continue;
            }
            let event = Event::new(ptr.clone(), keys);
            let mut current = Some(ptr.clone());
            while let Some(p) = current {
                current = self.parent_of(&p);
                changed_parent_types.entry(p).or_default().push(event.clone());
            }
            if let Some(observers) = events.observers.get_mut(&ptr) {
                for observer in observers.iter_mut() {
                    note(&mut first_error, observer(&self, &event));
                }
            }
        }

        // deep observers
        for (ptr, mut batch) in changed_parent_types {
            let Some(observers) = events.deep_observers.get_mut(&ptr) else {
                continue;
            };
            if observers.is_empty() || self.is_branch_deleted(&ptr) {
                continue;
            }
            batch.retain(|e| !self.is_branch_deleted(&e.target));
            for event in &mut batch {
                event.current_target = ptr.clone();
                event.path = path_to(self.doc, &ptr, &event.target);
            }
            batch.sort_by_key(|e| e.path.len());
            for observer in observers.iter_mut() {
                note(&mut first_error, observer(&self, batch.as_slice()));
            }
        }

        for handler in events.after_transaction.iter_mut() {
            note(&mut first_error, handler(&self));
        }

        // garbage collection and struct merging
        if self.doc.options.gc {
            let collect_all = |_: &Item| true;
            let filter: &dyn Fn(&Item) -> bool = match gc_filter {
                Some(f) => f.as_ref(),
                None => &collect_all,
            };
            let DocState { blocks, types, .. } = &mut *self.doc;
            if let Err(e) = self.delete_set.try_gc(blocks, types, filter) {
                warn!(error = %e, "garbage collection failed");
                first_error.get_or_insert(e);
            }
        }
        self.delete_set.try_merge(&mut self.doc.blocks);
        self.merge_advanced_clients();
        self.merge_touched_blocks();

        let client = self.doc.client_id;
        if !self.local && self.after_state.get(&client) != self.before_state.get(&client) {
            let regenerated = generate_client_id();
            warn!(old = client, new = regenerated, "client id reused by a remote peer; regenerating");
            self.doc.client_id = regenerated;
        }

        for handler in events.after_transaction_cleanup.iter_mut() {
            note(&mut first_error, handler(&self));
        }
        if !events.update_v1.is_empty() {
            let update = self.encode_update_v1();
            if !update.is_empty() {
                for handler in events.update_v1.iter_mut() {
                    note(&mut first_error, handler(update.as_slice(), &self));
                }
            }
        }
        if !events.update_v2.is_empty() {
            let update = self.encode_update_v2();
            if !update.is_empty() {
                for handler in events.update_v2.iter_mut() {
                    note(&mut first_error, handler(update.as_slice(), &self));
                }
            }
        }

        if !self.subdocs_added.is_empty() || !self.subdocs_removed.is_empty() || !self.subdocs_loaded.is_empty() {
            for guid in &self.subdocs_added {
                self.doc.subdocs.insert(guid.clone());
            }
            for guid in &self.subdocs_removed {
                self.doc.subdocs.remove(guid);
            }
            let event = SubdocsEvent {
                added: self.subdocs_added.iter().cloned().collect(),
                removed: self.subdocs_removed.iter().cloned().collect(),
                loaded: self.subdocs_loaded.iter().cloned().collect(),
            };
            for handler in events.subdocs.iter_mut() {
                note(&mut first_error, handler(&event, &self));
            }
        }

        let jobs = self.jobs.take();
        (jobs, first_error)
    }

    /// Merges the blocks appended by this transaction with their left
    /// neighbours, right to left.
    fn merge_advanced_clients(&mut self) {
        let advanced: Vec<(ClientID, u32)> = self
            .after_state
            .iter()
            .filter(|(client, clock)| self.before_state.get(client) != **clock)
            .map(|(client, _)| (*client, self.before_state.get(client)))
            .collect();
        for (client, before) in advanced {
            let Some(blocks) = self.doc.blocks.blocks(&client) else {
                continue;
            };
            let first = find_pivot(blocks, before).unwrap_or(0).max(1);
            let mut i = blocks.len() - 1;
            while i >= first {
                let merged = self.doc.blocks.try_merge_with_lefts(&client, i);
                match i.checked_sub(1 + merged) {
                    Some(next) => i = next,
                    None => break,
                }
            }
        }
    }

    fn merge_touched_blocks(&mut self) {
        let touched = std::mem::take(&mut self.merge_blocks);
        for id in touched.iter().rev() {
            let Ok(pos) = self.doc.blocks.find_index(id) else {
                continue;
            };
            let len = self.doc.blocks.blocks(&id.client).map(<[Block]>::len).unwrap_or(0);
            if pos + 1 < len && self.doc.blocks.try_merge_with_lefts(&id.client, pos + 1) > 1 {
                continue;
            }
            if pos > 0 {
                self.doc.blocks.try_merge_with_lefts(&id.client, pos);
            }
        }
    }
}

pub(crate) fn note(first_error: &mut Option<Error>, result: ObserverResult) {
    if let Err(e) = result {
        warn!(error = %e, "observer failed");
        first_error.get_or_insert(Error::Observer(e.to_string()));
    }
}
