mod common;

use common::{full_update, replica, send};
use ycrdt::{
    convert_update_format_v1_to_v2, convert_update_format_v2_to_v1, diff_update, encode_state_vector_from_update,
    merge_updates, parse_update_meta, Any, Doc, Options, ReadTxn, StateVector, Update,
};

#[test]
fn inserted_string_reaches_other_replica() {
    let mut a = replica(1);
    let list = a.get_or_insert_array("array").unwrap();
    a.transact(|txn| txn.insert(&list, 0, vec![Any::from("hi")])).unwrap();

    let mut b = replica(2);
    b.apply_update_v1(&full_update(&a)).unwrap();
    let list = b.get_or_insert_array("array").unwrap();
    assert_eq!(b.to_json(&list), Any::Array(vec![Any::from("hi")]));
}

#[test]
fn concurrent_inserts_at_same_position_converge() {
    let mut a = replica(1);
    let mut b = replica(2);
    let text = a.get_or_insert_text("text").unwrap();
    a.transact(|txn| txn.insert_text(&text, 0, "ab", None)).unwrap();
    send(&a, &mut b);
    let text_b = b.get_or_insert_text("text").unwrap();

    a.transact(|txn| txn.insert_text(&text, 1, "x", None)).unwrap();
    b.transact(|txn| txn.insert_text(&text_b, 1, "y", None)).unwrap();
    send(&a, &mut b);
    send(&b, &mut a);

    let left = a.get_string(&text);
    assert_eq!(left, b.get_string(&text_b));
    // Equal origins: the lower client id goes first.
    assert_eq!(left, "axyb");
}

#[test]
fn snapshot_restores_content_deleted_later() {
    let mut doc = Doc::with_options(Options {
        client_id: Some(1),
        gc: false,
        ..Options::default()
    });
    let list = doc.get_or_insert_array("list").unwrap();
    doc.transact(|txn| txn.push(&list, vec![Any::from("keep"), Any::from("drop")])).unwrap();
    let snapshot = doc.snapshot();
    doc.transact(|txn| txn.remove_range(&list, 1, 1)).unwrap();
    assert_eq!(doc.to_json(&list).to_json_string(), r#"["keep"]"#);

    let mut restored = doc.restore_snapshot(&snapshot).unwrap();
    let list = restored.get_or_insert_array("list").unwrap();
    assert_eq!(restored.to_json(&list).to_json_string(), r#"["keep","drop"]"#);
}

#[test]
fn withheld_update_is_buffered_until_it_arrives() {
    let mut source = replica(1);
    let list = source.get_or_insert_array("list").unwrap();
    let mut updates = Vec::new();
    for i in 0..3 {
        let before = source.state_vector();
        source.transact(|txn| txn.push(&list, vec![Any::from(i)])).unwrap();
        updates.push(source.encode_state_as_update_v1(&before).unwrap());
    }

    let mut target = replica(2);
    target.apply_update_v1(&updates[0]).unwrap();
    target.apply_update_v1(&updates[2]).unwrap();
    let pending = target.state().store().pending_update().expect("buffered update");
    assert_eq!(pending.missing.get(&1), 1);
    assert_eq!(target.state_vector().get(&1), 1);

    target.apply_update_v1(&updates[1]).unwrap();
    assert!(target.state().store().pending_update().is_none());
    let list = target.get_or_insert_array("list").unwrap();
    assert_eq!(target.to_json(&list).to_json_string(), "[0,1,2]");
    assert_eq!(target.state_vector(), source.state_vector());
}

#[test]
fn v1_and_v2_encodings_carry_the_same_state() {
    let mut doc = replica(5);
    let text = doc.get_or_insert_text("text").unwrap();
    let map = doc.get_or_insert_map("map").unwrap();
    doc.transact(|txn| {
        txn.insert_text(&text, 0, "héllo 🌍", None)?;
        txn.map_insert(&map, "n", Any::from(1.5))?;
        txn.map_insert(&map, "bytes", Any::Buffer(vec![1, 2, 3]))
    })
    .unwrap();
    doc.transact(|txn| txn.remove_range(&text, 1, 2)).unwrap();

    let v1 = full_update(&doc);
    let v2 = doc.encode_state_as_update_v2(&StateVector::new()).unwrap();
    assert_eq!(Update::decode_v1(&v1).unwrap(), Update::decode_v2(&v2).unwrap());
    assert_eq!(convert_update_format_v1_to_v2(&v1).unwrap(), v2);
    assert_eq!(convert_update_format_v2_to_v1(&v2).unwrap(), v1);

    let mut from_v2 = replica(6);
    from_v2.apply_update_v2(&v2).unwrap();
    let text2 = from_v2.get_or_insert_text("text").unwrap();
    let map2 = from_v2.get_or_insert_map("map").unwrap();
    assert_eq!(from_v2.get_string(&text2), doc.get_string(&text));
    assert_eq!(from_v2.to_json(&map2), doc.to_json(&map));
}

#[test]
fn diff_brings_stale_replica_up_to_date() {
    let mut a = replica(1);
    let text = a.get_or_insert_text("text").unwrap();
    a.transact(|txn| txn.insert_text(&text, 0, "base", None)).unwrap();
    let mut stale = replica(2);
    send(&a, &mut stale);
    let stale_sv = stale.encode_state_vector();

    a.transact(|txn| {
        txn.insert_text(&text, 4, " line", None)?;
        txn.remove_range(&text, 0, 1)
    })
    .unwrap();
    let diff = diff_update(&full_update(&a), &stale_sv).unwrap();
    stale.apply_update_v1(&diff).unwrap();
    let stale_text = stale.get_or_insert_text("text").unwrap();
    assert_eq!(stale.get_string(&stale_text), "ase line");
    assert_eq!(stale.state_vector(), a.state_vector());
}

#[test]
fn update_metadata_and_state_vector_from_update() {
    let mut a = replica(3);
    let list = a.get_or_insert_array("list").unwrap();
    a.transact(|txn| txn.push(&list, vec![Any::from(1), Any::from(2)])).unwrap();
    let first = a.state_vector();
    a.transact(|txn| txn.push(&list, vec![Any::from(3)])).unwrap();
    let tail = a.encode_state_as_update_v1(&first).unwrap();

    let meta = parse_update_meta(&tail).unwrap();
    assert_eq!(meta.from.get(&3), 2);
    assert_eq!(meta.to.get(&3), 3);

    let sv = StateVector::decode(&encode_state_vector_from_update(&full_update(&a)).unwrap()).unwrap();
    assert_eq!(sv, a.state_vector());
}

#[test]
fn merged_concurrent_updates_apply_as_one() {
    let mut a = replica(1);
    let mut b = replica(2);
    let map_a = a.get_or_insert_map("map").unwrap();
    let map_b = b.get_or_insert_map("map").unwrap();
    a.transact(|txn| txn.map_insert(&map_a, "a", Any::from("from a"))).unwrap();
    b.transact(|txn| txn.map_insert(&map_b, "b", Any::from("from b"))).unwrap();

    let merged = merge_updates(&[full_update(&a), full_update(&b)]).unwrap();
    let mut c = replica(3);
    c.apply_update_v1(&merged).unwrap();
    let map_c = c.get_or_insert_map("map").unwrap();
    assert_eq!(c.to_json(&map_c).to_json_string(), r#"{"a":"from a","b":"from b"}"#);
}

#[test]
fn truncated_update_leaves_document_untouched() {
    let mut a = replica(1);
    let list = a.get_or_insert_array("list").unwrap();
    a.transact(|txn| txn.push(&list, vec![Any::from("x"), Any::from("y")])).unwrap();
    let update = full_update(&a);

    let mut b = replica(2);
    assert!(b.apply_update_v1(&update[..update.len() - 3]).is_err());
    assert!(b.state_vector().is_empty());
}
