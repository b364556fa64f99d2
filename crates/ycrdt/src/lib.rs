//! ycrdt — replicated shared documents built on the YATA list CRDT.
//!
//! Replicas edit their own [`Doc`] and exchange binary updates. Applying
//! the same set of updates in any order, any number of times, converges to
//! identical content.
//!
//! - [`id`]: replica ids, logical clocks, state vectors.
//! - [`block`]: structs (items, tombstones, skips) and their content.
//! - [`store`]: per-client struct lists and pending-update bookkeeping.
//! - [`delete_set`]: compact per-client deletion ranges.
//! - [`transaction`]: mutation scope and commit pipeline.
//! - [`update`] and [`merge`]: V1/V2 update codecs and byte-level update
//!   utilities (merge, diff, format conversion).
//! - [`doc`]: the document, its options and events.
//!
//! ```
//! use ycrdt::{Any, Doc, ReadTxn, StateVector};
//!
//! let mut a = Doc::with_client_id(1);
//! let list = a.get_or_insert_array("list").unwrap();
//! a.transact(|txn| txn.push(&list, vec![Any::from("hello")])).unwrap();
//!
//! let mut b = Doc::with_client_id(2);
//! let update = a.encode_state_as_update_v1(&StateVector::new()).unwrap();
//! b.apply_update_v1(&update).unwrap();
//! let list = b.get_or_insert_array("list").unwrap();
//! assert_eq!(b.to_json(&list).to_json_string(), r#"["hello"]"#);
//! ```

pub mod any;
pub mod block;
pub mod codec;
pub mod delete_set;
pub mod doc;
pub mod error;
pub mod event;
pub mod id;
mod integrate;
pub mod merge;
pub mod snapshot;
pub mod store;
pub mod transaction;
pub mod types;
pub mod update;

pub use any::Any;
pub use block::{Block, Item, ItemContent, TypeRef};
pub use delete_set::DeleteSet;
pub use doc::{Doc, DocState, Options};
pub use error::{Error, Result};
pub use event::{Delta, EntryChange, Event, PathSegment, SubdocsEvent, SubscriptionId};
pub use id::{ClientID, StateVector, ID};
pub use merge::{
    convert_update_format_v1_to_v2, convert_update_format_v2_to_v1, diff_update, diff_update_v2,
    encode_state_vector_from_update, encode_state_vector_from_update_v2, merge_updates, merge_updates_v2,
    parse_update_meta, parse_update_meta_v2, UpdateMeta,
};
pub use snapshot::Snapshot;
pub use transaction::{Origin, TransactionMut};
pub use types::{Attrs, BranchPtr, ReadTxn, Value};
pub use update::Update;
