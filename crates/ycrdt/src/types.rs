//! Shared containers.
//!
//! # Overview
//!
//! Every container (root or nested) is a [`Branch`] registered in the
//! document under a [`BranchPtr`]. A branch does not own its children: it
//! holds the first id of its list and the last id of the newest item per map
//! key, and the items themselves live in the struct store.
//!
//! Reads go through [`ReadTxn`], implemented by both the document and an
//! open transaction. Mutations are methods of
//! [`TransactionMut`](crate::TransactionMut) defined here, building on
//! [`integrate_item`](crate::integrate::integrate_item).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::any::Any;
use crate::block::{Item, ItemContent, TypePtr, TypeRef};
use crate::doc::DocState;
use crate::error::{Error, Result};
use crate::event::Delta;
use crate::id::ID;
use crate::integrate::integrate_item;
use crate::transaction::TransactionMut;

/// Address of a shared container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BranchPtr {
    /// Top-level container, addressed by name.
    Root(Arc<str>),
    /// Container held by the `ContentType` item with this id.
    Nested(ID),
}

impl fmt::Display for BranchPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchPtr::Root(name) => write!(f, "{name}"),
            BranchPtr::Nested(id) => write!(f, "{id}"),
        }
    }
}

/// Formatting attributes of a text run.
pub type Attrs = HashMap<Arc<str>, Any>;

#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub type_ref: TypeRef,
    /// First id of the first item of the list.
    pub start: Option<ID>,
    /// Last id of the newest item per map key.
    pub map: HashMap<Arc<str>, ID>,
    /// Visible list length.
    pub len: u32,
    /// Item holding this container; `None` for roots.
    pub item: Option<ID>,
}

impl Branch {
    pub fn new(type_ref: TypeRef, item: Option<ID>) -> Self {
        Self {
            type_ref,
            start: None,
            map: HashMap::new(),
            len: 0,
            item,
        }
    }
}

/// Element read from a container.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Any(Any),
    Type(BranchPtr),
    /// Subdocument, by guid.
    Doc(Arc<str>),
}

impl From<Any> for Value {
    fn from(value: Any) -> Self {
        Value::Any(value)
    }
}

/// Elements carried by a single item, one per clock.
pub(crate) fn item_values(item: &Item) -> Vec<Value> {
    match &item.content {
        ItemContent::Json(values) | ItemContent::Any(values) => values.iter().cloned().map(Value::Any).collect(),
        ItemContent::Binary(bytes) => vec![Value::Any(Any::Buffer(bytes.clone()))],
        ItemContent::String(s) => {
            let mut out = Vec::with_capacity(s.len());
            for c in s.chars() {
                out.push(Value::Any(Any::String(c.to_string())));
                if c.len_utf16() == 2 {
                    out.push(Value::Any(Any::Undefined));
                }
            }
            out
        }
        ItemContent::Embed(value) => vec![Value::Any(value.clone())],
        ItemContent::Type(_) => vec![Value::Type(BranchPtr::Nested(item.id))],
        ItemContent::Doc { guid, .. } => vec![Value::Doc(guid.clone())],
        ItemContent::Deleted(_) | ItemContent::Format { .. } => Vec::new(),
    }
}

// ── Reads ──────────────────────────────────────────────────────────────────

/// Read access to document state.
pub trait ReadTxn {
    fn state(&self) -> &DocState;

    fn branch(&self, ptr: &BranchPtr) -> Option<&Branch> {
        self.state().types.get(ptr)
    }

    fn item(&self, id: &ID) -> Option<&Item> {
        self.state().blocks.get_item(id)
    }

    /// Visible length of a list container.
    fn len(&self, ptr: &BranchPtr) -> u32 {
        self.branch(ptr).map(|b| b.len).unwrap_or(0)
    }

    /// Visible items of a list container, in order.
    fn list_items(&self, ptr: &BranchPtr) -> Vec<&Item> {
        let mut items = Vec::new();
        let mut next = self.branch(ptr).and_then(|b| b.start);
        while let Some(id) = next {
            let Some(item) = self.item(&id) else {
                break;
            };
            if item.is_visible() {
                items.push(item);
            }
            next = item.right;
        }
        items
    }

    fn values(&self, ptr: &BranchPtr) -> Vec<Value> {
        self.list_items(ptr).into_iter().flat_map(item_values).collect()
    }

    fn get(&self, ptr: &BranchPtr, index: u32) -> Option<Value> {
        let mut remaining = index;
        for item in self.list_items(ptr) {
            if remaining < item.len {
                return item_values(item).into_iter().nth(remaining as usize);
            }
            remaining -= item.len;
        }
        None
    }

    fn map_get(&self, ptr: &BranchPtr, key: &str) -> Option<Value> {
        let last = self.branch(ptr)?.map.get(key)?;
        let item = self.item(last)?;
        if item.deleted {
            return None;
        }
        item_values(item).pop()
    }

    /// Live map keys, sorted.
    fn map_keys(&self, ptr: &BranchPtr) -> Vec<Arc<str>> {
        let Some(branch) = self.branch(ptr) else {
            return Vec::new();
        };
        let mut keys: Vec<Arc<str>> = branch
            .map
            .iter()
            .filter(|(_, id)| self.item(id).map(|i| !i.deleted).unwrap_or(false))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Concatenated string content of a text container.
    fn get_string(&self, ptr: &BranchPtr) -> String {
        let mut out = String::new();
        for item in self.list_items(ptr) {
            if let ItemContent::String(s) = &item.content {
                out.push_str(s);
            }
        }
        out
    }

    /// Text content as insert runs with their formatting attributes.
    fn text_delta(&self, ptr: &BranchPtr) -> Vec<Delta> {
        let mut deltas = Vec::new();
        let mut attrs = Attrs::new();
        let mut run = String::new();
        let mut next = self.branch(ptr).and_then(|b| b.start);
        let flush = |run: &mut String, attrs: &Attrs, deltas: &mut Vec<Delta>| {
            if !run.is_empty() {
                let value = Value::Any(Any::String(std::mem::take(run)));
                deltas.push(Delta::Inserted(vec![value], non_empty(attrs)));
            }
        };
        while let Some(id) = next {
            let Some(item) = self.item(&id) else {
                break;
            };
            next = item.right;
            if item.deleted {
                continue;
            }
            match &item.content {
                ItemContent::String(s) => run.push_str(s),
                ItemContent::Format { key, value } => {
                    flush(&mut run, &attrs, &mut deltas);
                    update_attrs(&mut attrs, key, value);
                }
                ItemContent::Embed(_) | ItemContent::Type(_) => {
                    flush(&mut run, &attrs, &mut deltas);
                    deltas.push(Delta::Inserted(item_values(item), non_empty(&attrs)));
                }
                _ => {}
            }
        }
        flush(&mut run, &attrs, &mut deltas);
        deltas
    }

    /// JSON-like rendering of a container.
    fn to_json(&self, ptr: &BranchPtr) -> Any {
        let Some(branch) = self.branch(ptr) else {
            return Any::Undefined;
        };
        match &branch.type_ref {
            TypeRef::Array => Any::Array(self.values(ptr).iter().map(|v| self.value_to_json(v)).collect()),
            TypeRef::Map => self.map_to_json(ptr),
            TypeRef::Text | TypeRef::XmlText => Any::String(self.get_string(ptr)),
            TypeRef::XmlElement(_) | TypeRef::XmlFragment | TypeRef::XmlHook(_) => Any::String(self.xml_string(ptr)),
            TypeRef::Undefined => {
                if branch.start.is_some() {
                    Any::Array(self.values(ptr).iter().map(|v| self.value_to_json(v)).collect())
                } else {
                    self.map_to_json(ptr)
                }
            }
        }
    }

    fn map_to_json(&self, ptr: &BranchPtr) -> Any {
        let mut map = IndexMap::new();
        for key in self.map_keys(ptr) {
            if let Some(value) = self.map_get(ptr, &key) {
                map.insert(key.to_string(), self.value_to_json(&value));
            }
        }
        Any::Map(map)
    }

    fn value_to_json(&self, value: &Value) -> Any {
        match value {
            Value::Any(any) => any.clone(),
            Value::Type(ptr) => self.to_json(ptr),
            Value::Doc(guid) => Any::String(guid.to_string()),
        }
    }

    /// Markup rendering of an XML container: `<name k="v">children</name>`.
    fn xml_string(&self, ptr: &BranchPtr) -> String {
        let Some(branch) = self.branch(ptr) else {
            return String::new();
        };
        let mut children = String::new();
        for value in self.values(ptr) {
            match &value {
                Value::Type(child) => match self.branch(child).map(|b| &b.type_ref) {
                    Some(TypeRef::Text | TypeRef::XmlText) => children.push_str(&self.get_string(child)),
                    _ => children.push_str(&self.xml_string(child)),
                },
                other => children.push_str(&any_to_attr(&self.value_to_json(other))),
            }
        }
        let TypeRef::XmlElement(name) = &branch.type_ref else {
            return children;
        };
        let mut out = format!("<{name}");
        for key in self.map_keys(ptr) {
            if let Some(value) = self.map_get(ptr, &key) {
                out.push_str(&format!(" {key}=\"{}\"", any_to_attr(&self.value_to_json(&value))));
            }
        }
        out.push('>');
        out.push_str(&children);
        out.push_str(&format!("</{name}>"));
        out
    }
}

fn any_to_attr(value: &Any) -> String {
    match value {
        Any::String(s) => s.clone(),
        other => other.to_json_string(),
    }
}

fn non_empty(attrs: &Attrs) -> Option<Attrs> {
    if attrs.is_empty() {
        None
    } else {
        Some(attrs.clone())
    }
}

/// Applies a format boundary; `null` ends the attribute.
pub(crate) fn update_attrs(attrs: &mut Attrs, key: &Arc<str>, value: &Any) {
    if matches!(value, Any::Null) {
        attrs.remove(key);
    } else {
        attrs.insert(key.clone(), value.clone());
    }
}

impl ReadTxn for TransactionMut<'_> {
    fn state(&self) -> &DocState {
        self.doc
    }
}

// ── Text position ──────────────────────────────────────────────────────────

/// Cursor between two items of a text container, tracking the formatting
/// attributes in effect at that point.
#[derive(Debug, Clone)]
struct TextPos {
    left: Option<ID>,
    right: Option<ID>,
    index: u32,
    attrs: Attrs,
}

impl TextPos {
    /// Steps over `right`.
    fn forward(&mut self, txn: &TransactionMut<'_>) {
        let Some(item) = self.right.and_then(|id| txn.item(&id)) else {
            return;
        };
        if !item.deleted {
            match &item.content {
                ItemContent::Format { key, value } => update_attrs(&mut self.attrs, key, value),
                _ if item.is_countable() => self.index += item.len,
                _ => {}
            }
        }
        self.left = Some(item.last_id());
        self.right = item.right;
    }
}

/// Attribute value equality, with an absent value equal to `null`.
fn equal_attr(a: Option<&Any>, b: Option<&Any>) -> bool {
    a.unwrap_or(&Any::Null) == b.unwrap_or(&Any::Null)
}

// ── Mutations ──────────────────────────────────────────────────────────────

impl TransactionMut<'_> {
    fn branch_checked(&self, ptr: &BranchPtr) -> Result<&Branch> {
        self.branch(ptr).ok_or_else(|| Error::UnexpectedType(ptr.to_string()))
    }

    fn expect_kind(&self, ptr: &BranchPtr, accepts: impl Fn(&TypeRef) -> bool) -> Result<()> {
        let branch = self.branch_checked(ptr)?;
        if accepts(&branch.type_ref) || branch.type_ref == TypeRef::Undefined {
            Ok(())
        } else {
            Err(Error::UnexpectedType(ptr.to_string()))
        }
    }

    /// Creates and integrates a local item between `left` and `right`.
    fn create_item(
        &mut self,
        parent: &BranchPtr,
        left: Option<ID>,
        right: Option<ID>,
        parent_sub: Option<Arc<str>>,
        content: ItemContent,
    ) -> Result<ID> {
        let id = self.next_id();
        let item = Item::new(id, left, left, right, right, TypePtr::Branch(parent.clone()), parent_sub, content);
        let last = item.last_id();
        integrate_item(self, item, 0)?;
        Ok(last)
    }

    /// Neighbours of list position `index`, splitting the item that
    /// straddles it.
    fn find_list_position(&mut self, ptr: &BranchPtr, index: u32) -> Result<(Option<ID>, Option<ID>)> {
        let branch = self.branch_checked(ptr)?;
        if index > branch.len {
            return Err(Error::IndexOutOfBounds { index, len: branch.len });
        }
        let mut right = branch.start;
        if index == 0 {
            return Ok((None, right));
        }
        let mut remaining = index;
        while let Some(id) = right {
            let item = self.item(&id).ok_or(Error::NotFound(id))?;
            if item.is_visible() {
                if remaining <= item.len {
                    let split_at = ID::new(id.client, id.clock + remaining);
                    if remaining < item.len {
                        self.doc.blocks.get_item_clean_start(&split_at, &mut self.merge_blocks)?;
                    }
                    let left = ID::new(id.client, id.clock + remaining - 1);
                    let next = self.item(&left).and_then(|i| i.right);
                    return Ok((Some(left), next));
                }
                remaining -= item.len;
            }
            right = item.right;
        }
        Err(Error::IndexOutOfBounds { index, len: index - remaining })
    }

    /// Inserts `values` at `index` of a list container. Consecutive plain
    /// values share one item; byte buffers get their own.
    pub fn insert(&mut self, ptr: &BranchPtr, index: u32, values: Vec<Any>) -> Result<()> {
        self.expect_kind(ptr, |t| matches!(t, TypeRef::Array | TypeRef::XmlFragment | TypeRef::XmlElement(_)))?;
        let (mut left, right) = self.find_list_position(ptr, index)?;
        let mut packed = Vec::new();
        for value in values {
            match value {
                Any::Buffer(bytes) => {
                    if !packed.is_empty() {
                        let content = ItemContent::Any(std::mem::take(&mut packed));
                        left = Some(self.create_item(ptr, left, right, None, content)?);
                    }
                    left = Some(self.create_item(ptr, left, right, None, ItemContent::Binary(bytes))?);
                }
                other => packed.push(other),
            }
        }
        if !packed.is_empty() {
            self.create_item(ptr, left, right, None, ItemContent::Any(packed))?;
        }
        Ok(())
    }

    pub fn push(&mut self, ptr: &BranchPtr, values: Vec<Any>) -> Result<()> {
        let len = self.len(ptr);
        self.insert(ptr, len, values)
    }

    /// Inserts a new nested container at `index` of a list container.
    pub fn insert_type(&mut self, ptr: &BranchPtr, index: u32, type_ref: TypeRef) -> Result<BranchPtr> {
        let (left, right) = self.find_list_position(ptr, index)?;
        let id = self.create_item(ptr, left, right, None, ItemContent::Type(type_ref))?;
        Ok(BranchPtr::Nested(id))
    }

    /// Inserts a subdocument reference at `index` of a list container.
    pub fn insert_subdoc(&mut self, ptr: &BranchPtr, index: u32, guid: &str, opts: Any) -> Result<()> {
        let (left, right) = self.find_list_position(ptr, index)?;
        let content = ItemContent::Doc { guid: Arc::from(guid), opts };
        self.create_item(ptr, left, right, None, content)?;
        Ok(())
    }

    /// Deletes `len` visible elements starting at `index`. Formatting marks
    /// inside the range are kept.
    pub fn remove_range(&mut self, ptr: &BranchPtr, index: u32, len: u32) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let branch = self.branch_checked(ptr)?;
        if index.checked_add(len).map_or(true, |end| end > branch.len) {
            return Err(Error::IndexOutOfBounds { index: index.saturating_add(len), len: branch.len });
        }
        let mut next = branch.start;
        let mut index = index;
        while index > 0 {
            let Some(id) = next else {
                break;
            };
            let item = self.item(&id).ok_or(Error::NotFound(id))?;
            next = item.right;
            if item.is_visible() {
                if index < item.len {
                    let split_at = ID::new(id.client, id.clock + index);
                    self.doc.blocks.get_item_clean_start(&split_at, &mut self.merge_blocks)?;
                    next = Some(split_at);
                    index = 0;
                } else {
                    index -= item.len;
                }
            }
        }
        let mut remaining = len;
        while remaining > 0 {
            let Some(id) = next else {
                break;
            };
            let item = self.item(&id).ok_or(Error::NotFound(id))?;
            if item.is_visible() {
                if remaining < item.len {
                    let split_at = ID::new(id.client, id.clock + remaining);
                    self.doc.blocks.get_item_clean_start(&split_at, &mut self.merge_blocks)?;
                }
                let item_len = self.item(&id).map(|i| i.len).unwrap_or(0);
                self.delete_item(&id)?;
                remaining -= item_len;
            }
            next = self.item(&id).and_then(|i| i.right);
        }
        Ok(())
    }

    // ── Text ───────────────────────────────────────────────────────────────

    fn find_text_position(&mut self, ptr: &BranchPtr, index: u32) -> Result<TextPos> {
        let branch = self.branch_checked(ptr)?;
        if index > branch.len {
            return Err(Error::IndexOutOfBounds { index, len: branch.len });
        }
        let mut pos = TextPos {
            left: None,
            right: branch.start,
            index: 0,
            attrs: Attrs::new(),
        };
        let mut count = index;
        while count > 0 {
            let Some(id) = pos.right else {
                break;
            };
            let item = self.item(&id).ok_or(Error::NotFound(id))?;
            if item.is_visible() && count < item.len {
                let split_at = ID::new(id.client, id.clock + count);
                self.doc.blocks.get_item_clean_start(&split_at, &mut self.merge_blocks)?;
            }
            let item = self.item(&id).ok_or(Error::NotFound(id))?;
            if item.is_visible() {
                count -= item.len;
            }
            pos.forward(self);
        }
        Ok(pos)
    }

    /// Skips deleted items and formats that already match `attrs`.
    fn minimize_attr_changes(&self, pos: &mut TextPos, attrs: &Attrs) {
        while let Some(item) = pos.right.and_then(|id| self.item(&id)) {
            let redundant = match &item.content {
                _ if item.deleted => true,
                ItemContent::Format { key, value } => equal_attr(attrs.get(key), Some(value)),
                _ => false,
            };
            if !redundant {
                break;
            }
            pos.forward(self);
        }
    }

    /// Opens the formats in `attrs` that differ from the current ones and
    /// returns the values that restore them.
    fn insert_attrs(&mut self, ptr: &BranchPtr, pos: &mut TextPos, attrs: &Attrs) -> Result<Attrs> {
        let mut negated = Attrs::new();
        let mut keys: Vec<&Arc<str>> = attrs.keys().collect();
        keys.sort();
        for key in keys {
            let value = &attrs[key];
            let current = pos.attrs.get(key);
            if !equal_attr(current, Some(value)) {
                negated.insert(key.clone(), current.cloned().unwrap_or(Any::Null));
                let content = ItemContent::Format { key: key.clone(), value: value.clone() };
                let id = self.next_id();
                self.create_item(ptr, pos.left, pos.right, None, content)?;
                pos.right = Some(id);
                pos.forward(self);
            }
        }
        Ok(negated)
    }

    /// Closes formats opened by [`insert_attrs`](Self::insert_attrs) unless
    /// an equal boundary already follows.
    fn insert_negated_attrs(&mut self, ptr: &BranchPtr, pos: &mut TextPos, mut negated: Attrs) -> Result<()> {
        while let Some(item) = pos.right.and_then(|id| self.item(&id)) {
            let skip = match &item.content {
                _ if item.deleted => true,
                ItemContent::Format { key, value } => {
                    let matches = equal_attr(negated.get(key), Some(value));
                    if matches {
                        negated.remove(key);
                    }
                    matches
                }
                _ => false,
            };
            if !skip {
                break;
            }
            pos.forward(self);
        }
        let mut entries: Vec<(Arc<str>, Any)> = negated.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value) in entries {
            let id = self.next_id();
            self.create_item(ptr, pos.left, pos.right, None, ItemContent::Format { key, value })?;
            pos.right = Some(id);
            pos.forward(self);
        }
        Ok(())
    }

    fn insert_at_pos(&mut self, ptr: &BranchPtr, pos: &mut TextPos, content: ItemContent, attrs: Option<Attrs>) -> Result<()> {
        let mut attrs = attrs.unwrap_or_default();
        for key in pos.attrs.keys() {
            attrs.entry(key.clone()).or_insert(Any::Null);
        }
        self.minimize_attr_changes(pos, &attrs);
        let negated = self.insert_attrs(ptr, pos, &attrs)?;
        let id = self.next_id();
        self.create_item(ptr, pos.left, pos.right, None, content)?;
        pos.right = Some(id);
        pos.forward(self);
        self.insert_negated_attrs(ptr, pos, negated)
    }

    /// Inserts a string at `index` of a text container. Without `attrs` the
    /// text continues the formatting in effect at that point.
    pub fn insert_text(&mut self, ptr: &BranchPtr, index: u32, text: &str, attrs: Option<Attrs>) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.expect_kind(ptr, |t| matches!(t, TypeRef::Text | TypeRef::XmlText))?;
        let mut pos = self.find_text_position(ptr, index)?;
        let attrs = attrs.or_else(|| Some(pos.attrs.clone()));
        self.insert_at_pos(ptr, &mut pos, ItemContent::String(text.to_owned()), attrs)
    }

    /// Inserts an embedded value at `index` of a text container.
    pub fn insert_embed(&mut self, ptr: &BranchPtr, index: u32, value: Any, attrs: Option<Attrs>) -> Result<()> {
        self.expect_kind(ptr, |t| matches!(t, TypeRef::Text | TypeRef::XmlText))?;
        let mut pos = self.find_text_position(ptr, index)?;
        let attrs = attrs.or_else(|| Some(pos.attrs.clone()));
        self.insert_at_pos(ptr, &mut pos, ItemContent::Embed(value), attrs)
    }

    /// Applies `attrs` to `len` elements starting at `index`. A `null`
    /// value removes the attribute.
    pub fn format(&mut self, ptr: &BranchPtr, index: u32, len: u32, attrs: Attrs) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        self.expect_kind(ptr, |t| matches!(t, TypeRef::Text | TypeRef::XmlText))?;
        let mut pos = self.find_text_position(ptr, index)?;
        self.minimize_attr_changes(&mut pos, &attrs);
        let mut negated = self.insert_attrs(ptr, &mut pos, &attrs)?;
        let mut remaining = len;
        while let Some(id) = pos.right {
            let item = self.item(&id).ok_or(Error::NotFound(id))?;
            let (deleted, countable, item_len) = (item.deleted, item.is_countable(), item.len);
            let format = match &item.content {
                ItemContent::Format { key, value } => Some((key.clone(), value.clone())),
                _ => None,
            };
            if remaining == 0 && (negated.is_empty() || !(deleted || format.is_some())) {
                break;
            }
            if !deleted {
                if let Some((key, value)) = format {
                    match attrs.get(&key) {
                        Some(attr) => {
                            if *attr == value {
                                negated.remove(&key);
                            } else {
                                if remaining == 0 {
                                    break;
                                }
                                negated.insert(key, value);
                            }
                            self.delete_item(&id)?;
                        }
                        None => update_attrs(&mut pos.attrs, &key, &value),
                    }
                } else if countable {
                    if remaining < item_len {
                        let split_at = ID::new(id.client, id.clock + remaining);
                        self.doc.blocks.get_item_clean_start(&split_at, &mut self.merge_blocks)?;
                    }
                    remaining = remaining.saturating_sub(item_len);
                }
            }
            pos.forward(self);
        }
        self.insert_negated_attrs(ptr, &mut pos, negated)
    }

    // ── Maps ───────────────────────────────────────────────────────────────

    fn map_set(&mut self, ptr: &BranchPtr, key: &str, content: ItemContent) -> Result<ID> {
        let left = self.branch_checked(ptr)?.map.get(key).copied();
        self.create_item(ptr, left, None, Some(Arc::from(key)), content)
    }

    /// Sets `key` of a map container. Any previous value is deleted.
    pub fn map_insert(&mut self, ptr: &BranchPtr, key: &str, value: Any) -> Result<()> {
        let content = match value {
            Any::Buffer(bytes) => ItemContent::Binary(bytes),
            other => ItemContent::Any(vec![other]),
        };
        self.map_set(ptr, key, content)?;
        Ok(())
    }

    /// Sets `key` of a map container to a new nested container.
    pub fn map_insert_type(&mut self, ptr: &BranchPtr, key: &str, type_ref: TypeRef) -> Result<BranchPtr> {
        let id = self.map_set(ptr, key, ItemContent::Type(type_ref))?;
        Ok(BranchPtr::Nested(id))
    }

    /// Removes `key` from a map container and returns its previous value.
    pub fn map_remove(&mut self, ptr: &BranchPtr, key: &str) -> Result<Option<Value>> {
        let previous = self.map_get(ptr, key);
        if let Some(last) = self.branch_checked(ptr)?.map.get(key).copied() {
            self.delete_item(&last)?;
        }
        Ok(previous)
    }
}
