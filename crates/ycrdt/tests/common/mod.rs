#![allow(dead_code)]

use ycrdt::{Any, BranchPtr, Doc, ReadTxn, StateVector};

/// Fresh replica with a fixed client id.
pub fn replica(client_id: u64) -> Doc {
    Doc::with_client_id(client_id)
}

/// Full V1 state of `doc`.
pub fn full_update(doc: &Doc) -> Vec<u8> {
    doc.encode_state_as_update_v1(&StateVector::new())
        .expect("encode full state")
}

/// Sends `from` everything `to` is missing, as a V1 diff.
pub fn send(from: &Doc, to: &mut Doc) {
    let update = from
        .encode_state_as_update_v1(&to.state_vector())
        .expect("encode diff");
    to.apply_update_v1(&update).expect("apply diff");
}

/// Exchanges state between every pair of replicas.
pub fn sync_all(docs: &mut [Doc]) {
    for i in 0..docs.len() {
        for j in 0..docs.len() {
            if i == j {
                continue;
            }
            let update = docs[i]
                .encode_state_as_update_v1(&docs[j].state_vector())
                .expect("encode diff");
            docs[j].apply_update_v1(&update).expect("apply diff");
        }
    }
}

/// JSON rendering of the named roots, used to compare replicas.
pub fn snapshot_json(doc: &mut Doc, text: &str, list: &str, map: &str) -> String {
    let text = doc.get_or_insert_text(text).expect("text root");
    let list = doc.get_or_insert_array(list).expect("list root");
    let map = doc.get_or_insert_map(map).expect("map root");
    format!(
        "{}|{}|{}",
        doc.get_string(&text),
        doc.to_json(&list).to_json_string(),
        doc.to_json(&map).to_json_string()
    )
}

/// One random local edit against the `text`, `list` and `map` roots.
#[derive(Debug, Clone)]
pub enum Op {
    InsertText { index: u32, text: String },
    DeleteText { index: u32, len: u32 },
    PushList(i64),
    InsertList { index: u32, value: i64 },
    DeleteList { index: u32 },
    SetKey { key: u8, value: i64 },
    RemoveKey { key: u8 },
}

/// Applies `op`, clamping indices to the current container sizes so that
/// every generated edit is valid.
pub fn apply_op(doc: &mut Doc, op: &Op) {
    let text = doc.get_or_insert_text("text").expect("text root");
    let list = doc.get_or_insert_array("list").expect("list root");
    let map = doc.get_or_insert_map("map").expect("map root");
    let text_len = doc.len(&text);
    let list_len = doc.len(&list);
    doc.transact(|txn| match op {
        Op::InsertText { index, text: s } => txn.insert_text(&text, (*index).min(text_len), s, None),
        Op::DeleteText { index, len } => {
            if text_len == 0 {
                return Ok(());
            }
            let index = (*index).min(text_len - 1);
            let len = (*len).min(text_len - index);
            txn.remove_range(&text, index, len)
        }
        Op::PushList(value) => txn.push(&list, vec![Any::from(*value)]),
        Op::InsertList { index, value } => txn.insert(&list, (*index).min(list_len), vec![Any::from(*value)]),
        Op::DeleteList { index } => {
            if list_len == 0 {
                return Ok(());
            }
            txn.remove_range(&list, (*index).min(list_len - 1), 1)
        }
        Op::SetKey { key, value } => txn.map_insert(&map, &format!("k{key}"), Any::from(*value)),
        Op::RemoveKey { key } => txn.map_remove(&map, &format!("k{key}")).map(|_| ()),
    })
    .expect("valid edit");
}

pub fn root(name: &str) -> BranchPtr {
    BranchPtr::Root(name.into())
}
