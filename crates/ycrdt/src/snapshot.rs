//! Point-in-time views of a document.
//!
//! A snapshot is a state vector plus the delete set at the moment it was
//! taken. Together they decide which items were visible then, and, when
//! the document keeps deleted content around (`gc = false`), they are
//! enough to rebuild the document as it was.

use ycrdt_buffers::{Reader, Writer};

use crate::block::Item;
use crate::codec::{Decoder, DecoderV1, Encoder, EncoderV1};
use crate::delete_set::DeleteSet;
use crate::doc::{Doc, Options};
use crate::error::{Error, Result};
use crate::id::{StateVector, ID};
use crate::store::find_pivot;
use crate::types::ReadTxn;
use crate::update::Update;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub state_vector: StateVector,
    pub delete_set: DeleteSet,
}

impl Snapshot {
    pub fn new(state_vector: StateVector, mut delete_set: DeleteSet) -> Self {
        delete_set.sort_and_merge();
        Self { state_vector, delete_set }
    }

    /// Whether `item` existed and was not deleted when the snapshot was
    /// taken.
    pub fn is_visible(&self, item: &Item) -> bool {
        self.state_vector.get(&item.id.client) > item.id.clock && !self.delete_set.is_deleted(&item.id)
    }

    pub fn encode_v1(&self) -> Vec<u8> {
        let mut encoder = EncoderV1::new();
        self.delete_set.encode(&mut encoder);
        self.state_vector.write(encoder.rest());
        encoder.to_vec()
    }

    pub fn decode_v1(data: &[u8]) -> Result<Self> {
        let mut decoder = DecoderV1::new(data)?;
        let delete_set = DeleteSet::decode(&mut decoder)?;
        let state_vector = StateVector::read(decoder.rest())?;
        Ok(Self { state_vector, delete_set })
    }

    /// The V2 form carries no column header: delete ranges are written as
    /// clock deltas and `len - 1` straight into the byte stream.
    pub fn encode_v2(&self) -> Vec<u8> {
        let mut w = Writer::new();
        let mut delete_set = self.delete_set.clone();
        delete_set.sort_and_merge();
        let mut clients: Vec<_> = delete_set.iter().collect();
        clients.sort_by(|a, b| b.0.cmp(a.0));
        w.var_uint(clients.len() as u64);
        for (client, ranges) in clients {
            w.var_uint(*client);
            w.var_uint(ranges.len() as u64);
            let mut current = 0u32;
            for range in ranges {
                w.var_uint((range.clock - current) as u64);
                w.var_uint((range.len - 1) as u64);
                current = range.end();
            }
        }
        self.state_vector.write(&mut w);
        w.into_inner()
    }

    pub fn decode_v2(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let mut delete_set = DeleteSet::new();
        for _ in 0..r.var_uint()? {
            let client = r.var_uint()?;
            let mut current = 0u32;
            for _ in 0..r.var_uint()? {
                let diff = r.var_uint()?;
                let clock = (current as u64)
                    .checked_add(diff)
                    .ok_or(Error::InvalidRange { clock: current as u64, len: diff })?;
                let raw = r.var_uint()?;
                let len = raw.checked_add(1).ok_or(Error::InvalidRange { clock, len: raw })?;
                if clock.checked_add(len).map_or(true, |end| end > u32::MAX as u64) {
                    return Err(Error::InvalidRange { clock, len });
                }
                let (clock, len) = (clock as u32, len as u32);
                delete_set.add(client, clock, len);
                current = clock + len;
            }
        }
        let state_vector = StateVector::read(&mut r)?;
        Ok(Self { state_vector, delete_set })
    }
}

impl Doc {
    pub fn snapshot(&self) -> Snapshot {
        let store = &self.state().blocks;
        Snapshot::new(store.get_state_vector(), DeleteSet::from_store(store))
    }

    /// Builds a new document holding this document's content as it was when
    /// `snapshot` was taken.
    ///
    /// Fails with [`Error::GcEnabled`] when this document garbage collects,
    /// since the deleted content the snapshot still sees may be gone.
    pub fn restore_snapshot(&mut self, snapshot: &Snapshot) -> Result<Doc> {
        if self.options().gc {
            return Err(Error::GcEnabled);
        }
        let mut update = Update::new();
        self.transact(|txn| {
            for (&client, &clock) in snapshot.state_vector.iter() {
                if clock == 0 {
                    continue;
                }
                if clock < txn.doc.blocks.get_state(&client) {
                    txn.doc.blocks.get_item_clean_start(&ID::new(client, clock), &mut txn.merge_blocks)?;
                }
                let Some(blocks) = txn.doc.blocks.blocks(&client) else {
                    continue;
                };
                if let Some(last) = find_pivot(blocks, clock - 1) {
                    update.blocks.insert(client, blocks[..=last].iter().cloned().collect());
                }
            }
            Ok(())
        })?;
        update.delete_set = snapshot.delete_set.clone();
        // The cloned structs still carry this document's links; a codec
        // round trip leaves only what travels on the wire.
        let update = Update::decode_v2(&update.encode_v2())?;
        let options = Options { client_id: None, guid: None, ..self.options().clone() };
        let mut restored = Doc::with_options(options);
        restored.apply_update_with("snapshot", update)?;
        Ok(restored)
    }
}
