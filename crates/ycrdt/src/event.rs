//! Change events and subscriptions.
//!
//! Events are computed lazily: an [`Event`] only names the changed
//! container and keys, and [`Event::delta`] / [`Event::keys`] derive the
//! details from the transaction that is being cleaned up.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::any::Any;
use crate::block::{ItemContent, TypePtr, TypeRef};
use crate::doc::DocState;
use crate::transaction::TransactionMut;
use crate::types::{item_values, update_attrs, Attrs, BranchPtr, ReadTxn, Value};

pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;
pub type ObserverResult = std::result::Result<(), ObserverError>;

pub type ObserveFn = dyn FnMut(&TransactionMut<'_>, &Event) -> ObserverResult;
pub type DeepObserveFn = dyn FnMut(&TransactionMut<'_>, &[Event]) -> ObserverResult;
pub type TransactionFn = dyn FnMut(&TransactionMut<'_>) -> ObserverResult;
pub type UpdateFn = dyn FnMut(&[u8], &TransactionMut<'_>) -> ObserverResult;
pub type SubdocsFn = dyn FnMut(&SubdocsEvent, &TransactionMut<'_>) -> ObserverResult;

// ── Subscriptions ──────────────────────────────────────────────────────────

pub type SubscriptionId = u32;

/// Callbacks in subscription order.
pub struct Observers<F: ?Sized> {
    next_id: SubscriptionId,
    entries: Vec<(SubscriptionId, Box<F>)>,
}

impl<F: ?Sized> Default for Observers<F> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }
}

impl<F: ?Sized> Observers<F> {
    pub fn subscribe(&mut self, callback: Box<F>) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, callback));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(sid, _)| *sid != id);
        self.entries.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<F>> {
        self.entries.iter_mut().map(|(_, callback)| callback)
    }
}

// ── Events ─────────────────────────────────────────────────────────────────

/// Step from an observed container down to a changed descendant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(Arc<str>),
    Index(u32),
}

/// One operation of a list or text change, in document order.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Inserted(Vec<Value>, Option<Attrs>),
    Deleted(u32),
    /// Unchanged run; attributes are set when formatting changed.
    Retain(u32, Option<Attrs>),
}

/// Change of a single map key.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryChange {
    Inserted(Value),
    Updated(Value, Value),
    Removed(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Container that changed.
    pub target: BranchPtr,
    /// Container the observer is attached to; equals `target` for shallow
    /// observers.
    pub current_target: BranchPtr,
    /// Path from `current_target` to `target`.
    pub path: Vec<PathSegment>,
    /// Changed map keys; `None` stands for list content.
    pub keys_changed: HashSet<Option<Arc<str>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubdocsEvent {
    pub added: Vec<Arc<str>>,
    pub removed: Vec<Arc<str>>,
    pub loaded: Vec<Arc<str>>,
}

impl Event {
    pub(crate) fn new(target: BranchPtr, keys_changed: HashSet<Option<Arc<str>>>) -> Self {
        Self {
            current_target: target.clone(),
            target,
            path: Vec::new(),
            keys_changed,
        }
    }

    /// Whether the list content of the target changed.
    pub fn list_changed(&self) -> bool {
        self.keys_changed.contains(&None)
    }

    /// List or text change as insert/retain/delete runs.
    pub fn delta(&self, txn: &TransactionMut<'_>) -> Vec<Delta> {
        let Some(branch) = txn.branch(&self.target) else {
            return Vec::new();
        };
        let is_text = matches!(branch.type_ref, TypeRef::Text | TypeRef::XmlText);
        let mut builder = DeltaBuilder::default();
        let mut old_attrs = Attrs::new();
        let mut new_attrs = Attrs::new();
        let mut next = branch.start;
        while let Some(id) = next {
            let Some(item) = txn.item(&id) else {
                break;
            };
            next = item.right;
            let adds = txn.adds(&item.id);
            let deletes = txn.deletes(&item.id);
            if let ItemContent::Format { key, value } = &item.content {
                if !adds && (!item.deleted || deletes) {
                    update_attrs(&mut old_attrs, key, value);
                }
                if !item.deleted {
                    update_attrs(&mut new_attrs, key, value);
                }
                continue;
            }
            if item.deleted {
                if deletes && !adds {
                    builder.delete(item.len);
                }
            } else if !item.is_countable() {
                continue;
            } else if adds {
                let values = match (&item.content, is_text) {
                    (ItemContent::String(s), true) => vec![Value::Any(Any::String(s.clone()))],
                    _ => item_values(item),
                };
                builder.insert(values, non_empty(new_attrs.clone()), is_text);
            } else {
                builder.retain(item.len, attr_diff(&old_attrs, &new_attrs));
            }
        }
        builder.finish()
    }

    /// Per-key changes of a map target.
    pub fn keys(&self, txn: &TransactionMut<'_>) -> HashMap<Arc<str>, EntryChange> {
        let mut changes = HashMap::new();
        let Some(branch) = txn.branch(&self.target) else {
            return changes;
        };
        for key in self.keys_changed.iter().flatten() {
            let Some(item) = branch.map.get(key).and_then(|id| txn.item(id)) else {
                continue;
            };
            let last_value = |item: &crate::block::Item| item_values(item).pop().unwrap_or(Value::Any(Any::Undefined));
            let change = if txn.adds(&item.id) {
                let mut prev = item.left.and_then(|id| txn.item(&id));
                while let Some(p) = prev {
                    if !txn.adds(&p.id) {
                        break;
                    }
                    prev = p.left.and_then(|id| txn.item(&id));
                }
                let prev = prev.filter(|p| txn.deletes(&p.id));
                match (txn.deletes(&item.id), prev) {
                    (true, Some(p)) => EntryChange::Removed(last_value(p)),
                    (true, None) => continue,
                    (false, Some(p)) => EntryChange::Updated(last_value(p), last_value(item)),
                    (false, None) => EntryChange::Inserted(last_value(item)),
                }
            } else if txn.deletes(&item.id) {
                EntryChange::Removed(last_value(item))
            } else {
                continue;
            };
            changes.insert(key.clone(), change);
        }
        changes
    }
}

fn non_empty(attrs: Attrs) -> Option<Attrs> {
    if attrs.is_empty() {
        None
    } else {
        Some(attrs)
    }
}

/// Attributes whose value differs, with `null` for removed ones.
fn attr_diff(old: &Attrs, new: &Attrs) -> Option<Attrs> {
    let mut diff = Attrs::new();
    for (key, value) in new {
        if old.get(key) != Some(value) {
            diff.insert(key.clone(), value.clone());
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            diff.insert(key.clone(), Any::Null);
        }
    }
    non_empty(diff)
}

#[derive(Default)]
struct DeltaBuilder {
    ops: Vec<Delta>,
}

impl DeltaBuilder {
    fn delete(&mut self, len: u32) {
        if let Some(Delta::Deleted(n)) = self.ops.last_mut() {
            *n += len;
        } else {
            self.ops.push(Delta::Deleted(len));
        }
    }

    fn insert(&mut self, values: Vec<Value>, attrs: Option<Attrs>, join_strings: bool) {
        if let Some(Delta::Inserted(existing, existing_attrs)) = self.ops.last_mut() {
            if *existing_attrs == attrs {
                for value in values {
                    if join_strings {
                        if let (Some(Value::Any(Any::String(s))), Value::Any(Any::String(more))) =
                            (existing.last_mut(), &value)
                        {
                            s.push_str(more);
                            continue;
                        }
                    }
                    existing.push(value);
                }
                return;
            }
        }
        self.ops.push(Delta::Inserted(values, attrs));
    }

    fn retain(&mut self, len: u32, attrs: Option<Attrs>) {
        if let Some(Delta::Retain(n, existing)) = self.ops.last_mut() {
            if *existing == attrs {
                *n += len;
                return;
            }
        }
        self.ops.push(Delta::Retain(len, attrs));
    }

    fn finish(mut self) -> Vec<Delta> {
        if let Some(Delta::Retain(_, None)) = self.ops.last() {
            self.ops.pop();
        }
        self.ops
    }
}

/// Keys and indices leading from `parent` down to `child`.
pub(crate) fn path_to(state: &DocState, parent: &BranchPtr, child: &BranchPtr) -> Vec<PathSegment> {
    let mut path = VecDeque::new();
    let mut current = child.clone();
    while &current != parent {
        let BranchPtr::Nested(id) = &current else {
            break;
        };
        let Some(item) = state.blocks.get_item(id) else {
            break;
        };
        let TypePtr::Branch(owner) = &item.parent else {
            break;
        };
        match &item.parent_sub {
            Some(key) => path.push_front(PathSegment::Key(key.clone())),
            None => {
                let mut index = 0;
                let mut next = state.types.get(owner).and_then(|b| b.start);
                while let Some(sibling) = next.and_then(|id| state.blocks.get_item(&id)) {
                    if sibling.id == item.id {
                        break;
                    }
                    if sibling.is_visible() {
                        index += sibling.len;
                    }
                    next = sibling.right;
                }
                path.push_front(PathSegment::Index(index));
            }
        }
        current = owner.clone();
    }
    path.into()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::doc::Doc;

    #[test]
    fn observers_unsubscribe_by_id() {
        let mut observers: Observers<dyn FnMut(u32) -> u32> = Observers::default();
        let a = observers.subscribe(Box::new(|x: u32| x + 1));
        let b = observers.subscribe(Box::new(|x: u32| x * 2));
        assert!(observers.unsubscribe(a));
        assert!(!observers.unsubscribe(a));
        let results: Vec<u32> = observers.iter_mut().map(|f| f(5)).collect();
        assert_eq!(results, vec![10]);
        assert!(observers.unsubscribe(b));
        assert!(observers.is_empty());
    }

    #[test]
    fn list_delta_reports_insert_retain_delete() {
        let mut doc = Doc::with_client_id(1);
        let list = doc.get_or_insert_array("list").unwrap();
        doc.transact(|txn| txn.insert(&list, 0, vec![Any::from(1), Any::from(2), Any::from(3)]))
            .unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        doc.observe(
            &list,
            move |txn, event| {
                sink.borrow_mut().extend(event.delta(txn));
                Ok(())
            },
        );
        doc.transact(|txn| {
            txn.remove_range(&list, 0, 1)?;
            txn.insert(&list, 2, vec![Any::from("x")])
        })
        .unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![
                Delta::Deleted(1),
                Delta::Retain(2, None),
                Delta::Inserted(vec![Value::Any(Any::from("x"))], None),
            ]
        );
    }

    #[test]
    fn map_keys_report_add_update_delete() {
        let mut doc = Doc::with_client_id(1);
        let map = doc.get_or_insert_map("map").unwrap();
        doc.transact(|txn| {
            txn.map_insert(&map, "kept", Any::from(1))?;
            txn.map_insert(&map, "gone", Any::from(2))
        })
        .unwrap();
        let seen = Rc::new(RefCell::new(HashMap::new()));
        let sink = seen.clone();
        doc.observe(
            &map,
            move |txn, event| {
                sink.borrow_mut().extend(event.keys(txn));
                Ok(())
            },
        );
        doc.transact(|txn| {
            txn.map_insert(&map, "kept", Any::from(10))?;
            txn.map_remove(&map, "gone")?;
            txn.map_insert(&map, "new", Any::from(3))
        })
        .unwrap();
        let seen = seen.borrow();
        assert_eq!(
            seen.get("kept"),
            Some(&EntryChange::Updated(Value::Any(Any::from(1)), Value::Any(Any::from(10))))
        );
        assert_eq!(seen.get("gone"), Some(&EntryChange::Removed(Value::Any(Any::from(2)))));
        assert_eq!(seen.get("new"), Some(&EntryChange::Inserted(Value::Any(Any::from(3)))));
    }

    #[test]
    fn deep_events_carry_paths() {
        let mut doc = Doc::with_client_id(1);
        let root = doc.get_or_insert_map("root").unwrap();
        let list = doc
            .transact(|txn| {
                let list = txn.map_insert_type(&root, "list", TypeRef::Array)?;
                txn.push(&list, vec![Any::from(0)])?;
                Ok(list)
            })
            .unwrap();
        let inner = doc.transact(|txn| txn.insert_type(&list, 1, TypeRef::Map)).unwrap();
        let paths = Rc::new(RefCell::new(Vec::new()));
        let sink = paths.clone();
        doc.observe_deep(
            &root,
            move |_, events| {
                sink.borrow_mut().extend(events.iter().map(|e| e.path.clone()));
                Ok(())
            },
        );
        doc.transact(|txn| {
            txn.map_insert(&inner, "k", Any::from(true))?;
            txn.push(&list, vec![Any::from(2)])
        })
        .unwrap();
        assert_eq!(
            *paths.borrow(),
            vec![
                vec![PathSegment::Key(Arc::from("list"))],
                vec![PathSegment::Key(Arc::from("list")), PathSegment::Index(1)],
            ]
        );
    }

    #[test]
    fn text_delta_reports_formatting() {
        let mut doc = Doc::with_client_id(1);
        let text = doc.get_or_insert_text("text").unwrap();
        doc.transact(|txn| txn.insert_text(&text, 0, "abc", None)).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        doc.observe(
            &text,
            move |txn, event| {
                sink.borrow_mut().extend(event.delta(txn));
                Ok(())
            },
        );
        let bold: Attrs = [(Arc::from("bold"), Any::Bool(true))].into_iter().collect();
        doc.transact(|txn| txn.format(&text, 1, 1, bold.clone())).unwrap();
        assert_eq!(*seen.borrow(), vec![Delta::Retain(1, None), Delta::Retain(1, Some(bold))]);
    }
}
