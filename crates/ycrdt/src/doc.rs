//! Replicated document: owner of the struct store, the type registry and
//! the subscriber lists.
//!
//! # Overview
//!
//! A [`Doc`] never hands out a long-lived mutable view of its state. Every
//! mutation runs inside [`Doc::transact`], which opens a
//! [`TransactionMut`], runs the caller's body, and commits: observers fire,
//! deleted content is garbage collected, adjacent structs are merged and
//! update listeners receive the encoded changes. Jobs that observers
//! enqueue run afterwards, each inside its own transaction.
//!
//! Reads go through the [`ReadTxn`] trait, implemented for both `Doc` and
//! `TransactionMut`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::any::Any;
use crate::block::{Item, TypeRef};
use crate::codec::{EncoderV1, EncoderV2};
use crate::error::{Error, Result};
use crate::event::{
    DeepObserveFn, Event, ObserveFn, Observers, ObserverResult, SubdocsEvent, SubdocsFn, SubscriptionId,
    TransactionFn, UpdateFn,
};
use crate::id::{ClientID, StateVector};
use crate::store::StructStore;
use crate::transaction::{note, Origin, TransactionMut};
use crate::types::{Branch, BranchPtr, ReadTxn};
use crate::update::{encode_state_as_update, Update};

/// Predicate deciding whether a deleted item may be garbage collected.
pub type GcFilter = Box<dyn Fn(&Item) -> bool>;

/// Random 32-bit replica id.
pub(crate) fn generate_client_id() -> ClientID {
    rand::thread_rng().gen::<u32>() as ClientID
}

/// Random version-4 UUID in its canonical textual form.
pub(crate) fn generate_guid() -> String {
    let mut bytes: [u8; 16] = rand::thread_rng().gen();
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{}-{}-{}-{}-{}", &hex[0..8], &hex[8..12], &hex[12..16], &hex[16..20], &hex[20..32])
}

// ── Options ────────────────────────────────────────────────────────────────

/// Document configuration.
///
/// Deserializes from the same camelCase shape that subdocument content
/// carries on the wire, so `{"gc": false, "autoLoad": true}` is a valid
/// options object. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    /// Fixed replica id. A random one is generated when absent.
    pub client_id: Option<ClientID>,
    /// Globally unique document id. A random UUID is generated when absent.
    pub guid: Option<String>,
    pub collection_id: Option<String>,
    /// Replace deleted content with tombstones on commit.
    pub gc: bool,
    pub auto_load: bool,
    pub should_load: bool,
    pub meta: Option<serde_json::Value>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            client_id: None,
            guid: None,
            collection_id: None,
            gc: true,
            auto_load: false,
            should_load: true,
            meta: None,
        }
    }
}

impl Options {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Options object embedded into subdocument content on the wire.
    /// Replica id, guid and `should_load` are not part of it.
    pub fn to_any(&self) -> Any {
        let mut map = IndexMap::new();
        if !self.gc {
            map.insert("gc".to_owned(), Any::Bool(false));
        }
        if self.auto_load {
            map.insert("autoLoad".to_owned(), Any::Bool(true));
        }
        if let Some(collection) = &self.collection_id {
            map.insert("collectionId".to_owned(), Any::from(collection.as_str()));
        }
        if let Some(meta) = &self.meta {
            map.insert("meta".to_owned(), Any::from(meta.clone()));
        }
        Any::Map(map)
    }
}

// ── State ──────────────────────────────────────────────────────────────────

/// Everything a transaction mutates.
pub struct DocState {
    pub(crate) client_id: ClientID,
    pub(crate) guid: Arc<str>,
    pub(crate) options: Options,
    pub(crate) blocks: StructStore,
    pub(crate) types: HashMap<BranchPtr, Branch>,
    pub(crate) subdocs: HashSet<Arc<str>>,
}

impl DocState {
    fn new(options: Options) -> Self {
        let client_id = options.client_id.unwrap_or_else(generate_client_id);
        let guid: Arc<str> = match &options.guid {
            Some(guid) => Arc::from(guid.as_str()),
            None => Arc::from(generate_guid()),
        };
        Self {
            client_id,
            guid,
            options,
            blocks: StructStore::default(),
            types: HashMap::new(),
            subdocs: HashSet::new(),
        }
    }

    pub fn client_id(&self) -> ClientID {
        self.client_id
    }

    pub fn store(&self) -> &StructStore {
        &self.blocks
    }

    /// Guids of the subdocuments currently embedded in this document.
    pub fn subdocs(&self) -> impl Iterator<Item = &Arc<str>> {
        self.subdocs.iter()
    }

    /// Names of all root containers, sorted.
    pub fn root_names(&self) -> Vec<Arc<str>> {
        let mut names: Vec<Arc<str>> = self
            .types
            .keys()
            .filter_map(|ptr| match ptr {
                BranchPtr::Root(name) => Some(name.clone()),
                BranchPtr::Nested(_) => None,
            })
            .collect();
        names.sort();
        names
    }
}

impl fmt::Debug for DocState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocState")
            .field("client_id", &self.client_id)
            .field("guid", &self.guid)
            .field("types", &self.types.len())
            .finish()
    }
}

/// Subscriber lists, one per event kind.
#[derive(Default)]
pub struct DocEvents {
    pub(crate) observers: HashMap<BranchPtr, Observers<ObserveFn>>,
    pub(crate) deep_observers: HashMap<BranchPtr, Observers<DeepObserveFn>>,
    pub update_v1: Observers<UpdateFn>,
    pub update_v2: Observers<UpdateFn>,
    pub before_transaction: Observers<TransactionFn>,
    pub before_observer_calls: Observers<TransactionFn>,
    pub after_transaction: Observers<TransactionFn>,
    pub after_transaction_cleanup: Observers<TransactionFn>,
    pub subdocs: Observers<SubdocsFn>,
}

// ── Doc ────────────────────────────────────────────────────────────────────

pub struct Doc {
    state: DocState,
    events: DocEvents,
    gc_filter: Option<GcFilter>,
}

impl Default for Doc {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Doc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Doc").field("state", &self.state).finish()
    }
}

impl Doc {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_client_id(client_id: ClientID) -> Self {
        Self::with_options(Options { client_id: Some(client_id), ..Options::default() })
    }

    pub fn with_options(options: Options) -> Self {
        let state = DocState::new(options);
        debug!(client = state.client_id, guid = %state.guid, "document created");
        Self { state, events: DocEvents::default(), gc_filter: None }
    }

    pub fn client_id(&self) -> ClientID {
        self.state.client_id
    }

    pub fn guid(&self) -> &str {
        &self.state.guid
    }

    pub fn options(&self) -> &Options {
        &self.state.options
    }

    /// Restricts garbage collection to deleted items the filter accepts.
    pub fn set_gc_filter<F>(&mut self, filter: F)
    where
        F: Fn(&Item) -> bool + 'static,
    {
        self.gc_filter = Some(Box::new(filter));
    }

    /// Subscriber lists for document-wide events.
    pub fn events(&mut self) -> &mut DocEvents {
        &mut self.events
    }

    // ── Root containers ──

    pub fn get_or_insert_array(&mut self, name: &str) -> Result<BranchPtr> {
        self.get_or_insert(name, TypeRef::Array)
    }

    pub fn get_or_insert_map(&mut self, name: &str) -> Result<BranchPtr> {
        self.get_or_insert(name, TypeRef::Map)
    }

    pub fn get_or_insert_text(&mut self, name: &str) -> Result<BranchPtr> {
        self.get_or_insert(name, TypeRef::Text)
    }

    pub fn get_or_insert_xml_fragment(&mut self, name: &str) -> Result<BranchPtr> {
        self.get_or_insert(name, TypeRef::XmlFragment)
    }

    /// Returns the root container `name`, creating it with `type_ref` if it
    /// does not exist. A root that so far was only referenced by remote
    /// updates adopts the requested type.
    pub fn get_or_insert(&mut self, name: &str, type_ref: TypeRef) -> Result<BranchPtr> {
        let ptr = BranchPtr::Root(Arc::from(name));
        match self.state.types.get_mut(&ptr) {
            Some(branch) if branch.type_ref == type_ref => {}
            Some(branch) if branch.type_ref == TypeRef::Undefined => branch.type_ref = type_ref,
            Some(_) => return Err(Error::UnexpectedType(name.to_owned())),
            None => {
                self.state.types.insert(ptr.clone(), Branch::new(type_ref, None));
            }
        }
        Ok(ptr)
    }

    // ── Transactions ──

    /// Runs `f` inside a local transaction and commits it.
    ///
    /// The body's error wins over observer errors. Either way the
    /// transaction is committed, since the body may have integrated
    /// changes before failing.
    pub fn transact<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TransactionMut<'_>) -> Result<T>,
    {
        self.transact_inner(None, true, f)
    }

    pub fn transact_with<F, T>(&mut self, origin: impl Into<Origin>, f: F) -> Result<T>
    where
        F: FnOnce(&mut TransactionMut<'_>) -> Result<T>,
    {
        self.transact_inner(Some(origin.into()), true, f)
    }

    fn transact_inner<F, T>(&mut self, origin: Option<Origin>, local: bool, f: F) -> Result<T>
    where
        F: FnOnce(&mut TransactionMut<'_>) -> Result<T>,
    {
        let mut first_error = None;
        let mut txn = TransactionMut::new(&mut self.state, origin, local);
        for handler in self.events.before_transaction.iter_mut() {
            note(&mut first_error, handler(&txn));
        }
        let result = f(&mut txn);
        let (jobs, commit_error) = txn.commit(&mut self.events, self.gc_filter.as_ref());
        if first_error.is_none() {
            first_error = commit_error;
        }
        for job in jobs {
            if let Err(e) = self.transact_inner(None, true, job) {
                warn!(error = %e, "queued job failed");
                first_error.get_or_insert(e);
            }
        }
        match (result, first_error) {
            (Err(e), _) => Err(e),
            (Ok(_), Some(e)) => Err(e),
            (Ok(value), None) => Ok(value),
        }
    }

    // ── Updates ──

    /// Applies a decoded update as a remote transaction.
    pub fn apply_update(&mut self, update: Update) -> Result<()> {
        self.transact_inner(None, false, |txn| txn.apply_update(update))
    }

    pub fn apply_update_with(&mut self, origin: impl Into<Origin>, update: Update) -> Result<()> {
        self.transact_inner(Some(origin.into()), false, |txn| txn.apply_update(update))
    }

    /// Decodes the whole payload before touching the document, so a
    /// malformed update leaves the state unchanged.
    pub fn apply_update_v1(&mut self, data: &[u8]) -> Result<()> {
        let update = Update::decode_v1(data)?;
        self.apply_update(update)
    }

    pub fn apply_update_v2(&mut self, data: &[u8]) -> Result<()> {
        let update = Update::decode_v2(data)?;
        self.apply_update(update)
    }

    pub fn state_vector(&self) -> StateVector {
        self.state.blocks.get_state_vector()
    }

    pub fn encode_state_vector(&self) -> Vec<u8> {
        self.state_vector().encode()
    }

    /// Everything this document knows that `sv` does not, pending updates
    /// included.
    pub fn encode_state_as_update_v1(&self, sv: &StateVector) -> Result<Vec<u8>> {
        encode_state_as_update::<EncoderV1>(&self.state.blocks, sv)
    }

    pub fn encode_state_as_update_v2(&self, sv: &StateVector) -> Result<Vec<u8>> {
        encode_state_as_update::<EncoderV2>(&self.state.blocks, sv)
    }

    /// Every root container rendered as JSON, keyed by name.
    pub fn root_json(&self) -> Any {
        let map = self
            .state
            .root_names()
            .into_iter()
            .map(|name| {
                let json = self.to_json(&BranchPtr::Root(name.clone()));
                (name.to_string(), json)
            })
            .collect();
        Any::Map(map)
    }

    // ── Observers ──

    pub fn observe<F>(&mut self, ptr: &BranchPtr, f: F) -> SubscriptionId
    where
        F: FnMut(&TransactionMut<'_>, &Event) -> ObserverResult + 'static,
    {
        self.events.observers.entry(ptr.clone()).or_default().subscribe(Box::new(f))
    }

    pub fn unobserve(&mut self, ptr: &BranchPtr, id: SubscriptionId) -> bool {
        self.events.observers.get_mut(ptr).is_some_and(|o| o.unsubscribe(id))
    }

    /// Subscribes to changes of `ptr` and of every container nested in it.
    pub fn observe_deep<F>(&mut self, ptr: &BranchPtr, f: F) -> SubscriptionId
    where
        F: FnMut(&TransactionMut<'_>, &[Event]) -> ObserverResult + 'static,
    {
        self.events.deep_observers.entry(ptr.clone()).or_default().subscribe(Box::new(f))
    }

    pub fn unobserve_deep(&mut self, ptr: &BranchPtr, id: SubscriptionId) -> bool {
        self.events.deep_observers.get_mut(ptr).is_some_and(|o| o.unsubscribe(id))
    }

    pub fn on_update_v1<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&[u8], &TransactionMut<'_>) -> ObserverResult + 'static,
    {
        self.events.update_v1.subscribe(Box::new(f))
    }

    pub fn on_update_v2<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&[u8], &TransactionMut<'_>) -> ObserverResult + 'static,
    {
        self.events.update_v2.subscribe(Box::new(f))
    }

    pub fn on_before_transaction<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&TransactionMut<'_>) -> ObserverResult + 'static,
    {
        self.events.before_transaction.subscribe(Box::new(f))
    }

    /// Called once the transaction's final state is known, before any
    /// container observer runs.
    pub fn on_before_observer_calls<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&TransactionMut<'_>) -> ObserverResult + 'static,
    {
        self.events.before_observer_calls.subscribe(Box::new(f))
    }

    pub fn on_after_transaction<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&TransactionMut<'_>) -> ObserverResult + 'static,
    {
        self.events.after_transaction.subscribe(Box::new(f))
    }

    pub fn on_after_transaction_cleanup<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&TransactionMut<'_>) -> ObserverResult + 'static,
    {
        self.events.after_transaction_cleanup.subscribe(Box::new(f))
    }

    pub fn on_subdocs<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&SubdocsEvent, &TransactionMut<'_>) -> ObserverResult + 'static,
    {
        self.events.subdocs.subscribe(Box::new(f))
    }
}

impl ReadTxn for Doc {
    fn state(&self) -> &DocState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn options_deserialize_with_defaults() {
        let options = Options::from_json(r#"{"gc": false, "autoLoad": true}"#).unwrap();
        assert!(!options.gc);
        assert!(options.auto_load);
        assert!(options.should_load);
        assert_eq!(options.client_id, None);
    }

    #[test]
    fn generated_guid_is_uuid_shaped() {
        let guid = generate_guid();
        assert_eq!(guid.len(), 36);
        assert_eq!(guid.as_bytes()[14], b'4');
        assert_eq!(guid.matches('-').count(), 4);
        assert_ne!(guid, generate_guid());
    }

    #[test]
    fn root_type_mismatch_is_rejected() {
        let mut doc = Doc::with_client_id(1);
        doc.get_or_insert_text("t").unwrap();
        assert!(doc.get_or_insert_text("t").is_ok());
        assert!(matches!(doc.get_or_insert_map("t"), Err(Error::UnexpectedType(_))));
    }

    #[test]
    fn remote_root_adopts_local_type() {
        let mut a = Doc::with_client_id(1);
        let text = a.get_or_insert_text("t").unwrap();
        a.transact(|txn| txn.insert_text(&text, 0, "abc", None)).unwrap();
        let update = a.encode_state_as_update_v1(&StateVector::new()).unwrap();

        let mut b = Doc::with_client_id(2);
        b.apply_update_v1(&update).unwrap();
        let text = b.get_or_insert_text("t").unwrap();
        assert_eq!(b.get_string(&text), "abc");
    }

    #[test]
    fn update_listeners_receive_local_changes() {
        let mut a = Doc::with_client_id(1);
        let mut b = Doc::with_client_id(2);
        let list = a.get_or_insert_array("list").unwrap();
        let updates = Rc::new(RefCell::new(Vec::new()));
        let sink = updates.clone();
        a.on_update_v1(move |update, _| {
            sink.borrow_mut().push(update.to_vec());
            Ok(())
        });
        a.transact(|txn| txn.push(&list, vec![Any::from(1)])).unwrap();
        a.transact(|txn| txn.push(&list, vec![Any::from(2)])).unwrap();
        // Read-only transactions produce no update.
        a.transact(|_| Ok(())).unwrap();
        assert_eq!(updates.borrow().len(), 2);

        for update in updates.borrow().iter() {
            b.apply_update_v1(update).unwrap();
        }
        let list = b.get_or_insert_array("list").unwrap();
        assert_eq!(b.to_json(&list).to_json_string(), "[1,2]");
    }

    #[test]
    fn origin_reaches_listeners() {
        let mut doc = Doc::with_client_id(1);
        let map = doc.get_or_insert_map("m").unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        doc.on_after_transaction(move |txn| {
            sink.borrow_mut().push((txn.origin.clone(), txn.local));
            Ok(())
        });
        doc.transact_with("editor", |txn| txn.map_insert(&map, "k", Any::from(1))).unwrap();
        assert_eq!(*seen.borrow(), vec![(Some(Origin::from("editor")), true)]);
    }

    #[test]
    fn hooks_fire_in_cleanup_order() {
        let mut doc = Doc::with_client_id(1);
        let list = doc.get_or_insert_array("list").unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));

        let sink = log.clone();
        doc.on_before_transaction(move |_| {
            sink.borrow_mut().push("before-transaction".to_owned());
            Ok(())
        });
        let sink = log.clone();
        doc.on_before_observer_calls(move |txn| {
            sink.borrow_mut().push(format!("before-observer {}", txn.after_state.get(&1)));
            Ok(())
        });
        let sink = log.clone();
        doc.observe(&list, move |_, _| {
            sink.borrow_mut().push("observer".to_owned());
            Ok(())
        });
        let sink = log.clone();
        doc.on_after_transaction(move |_| {
            sink.borrow_mut().push("after-transaction".to_owned());
            Ok(())
        });

        doc.transact(|txn| txn.push(&list, vec![Any::from(1), Any::from(2)])).unwrap();
        assert_eq!(
            *log.borrow(),
            ["before-transaction", "before-observer 2", "observer", "after-transaction"]
        );
    }

    #[test]
    fn before_observer_error_is_reported() {
        let mut doc = Doc::with_client_id(1);
        let list = doc.get_or_insert_array("list").unwrap();
        doc.on_before_observer_calls(|_| Err("hook".into()));
        let err = doc.transact(|txn| txn.push(&list, vec![Any::from(1)])).unwrap_err();
        assert!(matches!(err, Error::Observer(_)));
        assert_eq!(doc.len(&list), 1);
    }

    #[test]
    fn observer_jobs_run_in_follow_up_transaction() {
        let mut doc = Doc::with_client_id(1);
        let map = doc.get_or_insert_map("m").unwrap();
        let target = map.clone();
        doc.observe(&map, move |txn, event| {
            if event.keys(txn).contains_key("trigger") {
                let target = target.clone();
                txn.enqueue(move |txn| txn.map_insert(&target, "echo", Any::from(true)));
            }
            Ok(())
        });
        doc.transact(|txn| txn.map_insert(&map, "trigger", Any::from(1))).unwrap();
        assert_eq!(doc.map_get(&map, "echo"), Some(crate::types::Value::Any(Any::Bool(true))));
    }

    #[test]
    fn body_error_wins_over_observer_error() {
        let mut doc = Doc::with_client_id(1);
        let list = doc.get_or_insert_array("list").unwrap();
        doc.observe(&list, |_, _| Err("observer".into()));

        let err = doc.transact(|txn| txn.push(&list, vec![Any::from(1)])).unwrap_err();
        assert!(matches!(err, Error::Observer(_)));

        let err = doc
            .transact(|txn| {
                txn.push(&list, vec![Any::from(2)])?;
                txn.remove_range(&list, 10, 1)
            })
            .unwrap_err();
        assert!(matches!(err, Error::IndexOutOfBounds { .. }));
        // The body's first edit was still committed.
        assert_eq!(doc.len(&list), 2);
    }

    #[test]
    fn unobserve_stops_delivery() {
        let mut doc = Doc::with_client_id(1);
        let list = doc.get_or_insert_array("list").unwrap();
        let count = Rc::new(RefCell::new(0));
        let sink = count.clone();
        let id = doc.observe(&list, move |_, _| {
            *sink.borrow_mut() += 1;
            Ok(())
        });
        doc.transact(|txn| txn.push(&list, vec![Any::from(1)])).unwrap();
        assert!(doc.unobserve(&list, id));
        doc.transact(|txn| txn.push(&list, vec![Any::from(2)])).unwrap();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn subdocs_are_tracked_and_reported() {
        let mut doc = Doc::with_client_id(1);
        let list = doc.get_or_insert_array("docs").unwrap();
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        doc.on_subdocs(move |event, _| {
            sink.borrow_mut().push(event.clone());
            Ok(())
        });
        let opts = Options { auto_load: true, ..Options::default() }.to_any();
        doc.transact(|txn| txn.insert_subdoc(&list, 0, "child-guid", opts)).unwrap();
        assert_eq!(doc.state().subdocs().count(), 1);
        doc.transact(|txn| txn.remove_range(&list, 0, 1)).unwrap();
        assert_eq!(doc.state().subdocs().count(), 0);

        let events = events.borrow();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].added, vec![Arc::from("child-guid")]);
        assert_eq!(events[0].loaded, vec![Arc::from("child-guid")]);
        assert_eq!(events[1].removed, vec![Arc::from("child-guid")]);
    }

    #[test]
    fn gc_filter_keeps_rejected_content() {
        let mut doc = Doc::with_client_id(1);
        doc.set_gc_filter(|item| !matches!(item.content, crate::block::ItemContent::String(_)));
        let text = doc.get_or_insert_text("t").unwrap();
        let list = doc.get_or_insert_array("l").unwrap();
        doc.transact(|txn| {
            txn.insert_text(&text, 0, "abc", None)?;
            txn.push(&list, vec![Any::from(1)])
        })
        .unwrap();
        doc.transact(|txn| {
            txn.remove_range(&text, 0, 3)?;
            txn.remove_range(&list, 0, 1)
        })
        .unwrap();
        let text_item = doc.item(&crate::id::ID::new(1, 0)).unwrap();
        assert!(text_item.deleted);
        assert!(matches!(text_item.content, crate::block::ItemContent::String(_)));
        let list_item = doc.item(&crate::id::ID::new(1, 3)).unwrap();
        assert!(matches!(list_item.content, crate::block::ItemContent::Deleted(1)));
    }

    #[test]
    fn root_json_lists_every_root() {
        let mut doc = Doc::with_client_id(1);
        let text = doc.get_or_insert_text("b").unwrap();
        let list = doc.get_or_insert_array("a").unwrap();
        doc.transact(|txn| {
            txn.insert_text(&text, 0, "hi", None)?;
            txn.push(&list, vec![Any::Null])
        })
        .unwrap();
        assert_eq!(doc.root_json().to_json_string(), r#"{"a":[null],"b":"hi"}"#);
    }
}
