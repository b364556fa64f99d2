//! Updates: the unit of replication.
//!
//! An update carries, per client, a contiguous run of structs (possibly
//! interrupted by [`Block::Skip`] ranges) followed by a delete set. Both
//! wire formats share this layout:
//!
//! ```text
//! var_uint  number of clients
//! per client, descending id:
//!   var_uint  number of structs
//!   client    (encoder-specific)
//!   var_uint  clock of the first struct
//!   struct*
//! delete set
//! ```
//!
//! Updates are always decoded completely before anything is applied, so a
//! malformed update never leaves a partially applied document behind.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::block::Block;
use crate::codec::{Decoder, DecoderV1, DecoderV2, Encoder, EncoderV1, EncoderV2};
use crate::delete_set::DeleteSet;
use crate::error::{Error, Result};
use crate::id::{clock_from_u64, ClientID, StateVector, ID};
use crate::integrate::integrate_structs;
use crate::merge::merge_updates_v2;
use crate::store::{find_pivot, StructStore};
use crate::transaction::TransactionMut;

/// Decoded update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    /// Struct runs per client, ascending by clock.
    pub blocks: HashMap<ClientID, VecDeque<Block>>,
    pub delete_set: DeleteSet,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.values().all(VecDeque::is_empty) && self.delete_set.is_empty()
    }

    /// Clients with struct runs, descending.
    pub(crate) fn clients_desc(&self) -> Vec<ClientID> {
        let mut clients: Vec<ClientID> = self
            .blocks
            .iter()
            .filter(|(_, blocks)| !blocks.is_empty())
            .map(|(client, _)| *client)
            .collect();
        clients.sort_unstable_by(|a, b| b.cmp(a));
        clients
    }

    pub fn decode<'a, D: Decoder<'a>>(decoder: &mut D) -> Result<Update> {
        let mut blocks: HashMap<ClientID, VecDeque<Block>> = HashMap::new();
        let num_clients = decoder.rest().var_uint()?;
        for _ in 0..num_clients {
            let num_structs = decoder.rest().var_uint()?;
            let client = decoder.read_client()?;
            let mut clock = clock_from_u64(decoder.rest().var_uint()?)?;
            let run = blocks.entry(client).or_default();
            for _ in 0..num_structs {
                let block = Block::decode(decoder, ID::new(client, clock))?;
                clock = clock.checked_add(block.len()).ok_or(Error::InvalidRange {
                    clock: clock as u64,
                    len: block.len() as u64,
                })?;
                run.push_back(block);
            }
        }
        let delete_set = DeleteSet::decode(decoder)?;
        Ok(Update { blocks, delete_set })
    }

    pub fn decode_v1(data: &[u8]) -> Result<Update> {
        Update::decode(&mut DecoderV1::new(data)?)
    }

    pub fn decode_v2(data: &[u8]) -> Result<Update> {
        Update::decode(&mut DecoderV2::new(data)?)
    }

    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        let clients = self.clients_desc();
        encoder.rest().var_uint(clients.len() as u64);
        for client in clients {
            let run = &self.blocks[&client];
            encoder.rest().var_uint(run.len() as u64);
            encoder.write_client(client);
            encoder.rest().var_uint(run[0].id().clock as u64);
            for block in run {
                block.encode(encoder, 0);
            }
        }
        self.delete_set.encode(encoder);
    }

    pub fn encode_v1(&self) -> Vec<u8> {
        let mut encoder = EncoderV1::new();
        self.encode(&mut encoder);
        encoder.to_vec()
    }

    pub fn encode_v2(&self) -> Vec<u8> {
        let mut encoder = EncoderV2::new();
        self.encode(&mut encoder);
        encoder.to_vec()
    }

    /// Everything in `store` that `sv` does not cover, with the store's
    /// full delete set.
    pub(crate) fn from_store(store: &StructStore, sv: &StateVector) -> Update {
        let mut blocks = HashMap::new();
        for (client, list) in store.clients() {
            let from = sv.get(client);
            if store.get_state(client) <= from {
                continue;
            }
            let Some(start) = find_pivot(list, from) else {
                continue;
            };
            let first = &list[start];
            let mut run = VecDeque::with_capacity(list.len() - start);
            run.push_back(first.slice(from - first.id().clock));
            run.extend(list[start + 1..].iter().cloned());
            blocks.insert(*client, run);
        }
        Update {
            blocks,
            delete_set: DeleteSet::from_store(store),
        }
    }
}

/// Writes the struct section for everything in `store` that `sv` does not
/// cover. The first struct of each client is written from the `sv` clock
/// on.
pub(crate) fn write_clients_blocks<E: Encoder>(encoder: &mut E, store: &StructStore, sv: &StateVector) {
    let mut clients: Vec<(ClientID, u32)> = store
        .clients()
        .map(|(client, _)| (*client, sv.get(client)))
        .filter(|(client, from)| store.get_state(client) > *from)
        .collect();
    clients.sort_unstable_by(|a, b| b.0.cmp(&a.0));
    encoder.rest().var_uint(clients.len() as u64);
    for (client, from) in clients {
        let list = store.blocks(&client).unwrap_or_default();
        let start = find_pivot(list, from).unwrap_or(0);
        encoder.rest().var_uint((list.len() - start) as u64);
        encoder.write_client(client);
        encoder.rest().var_uint(from as u64);
        let first = &list[start];
        first.encode(encoder, from.saturating_sub(first.id().clock));
        for block in &list[start + 1..] {
            block.encode(encoder, 0);
        }
    }
}

/// Full state of `store` beyond `sv`, including buffered structs and
/// deletions that could not be applied yet.
pub(crate) fn encode_state_as_update<E: Encoder>(store: &StructStore, sv: &StateVector) -> Result<Vec<u8>> {
    let mut encoder = E::default();
    if store.pending.is_none() && store.pending_ds.is_none() {
        write_clients_blocks(&mut encoder, store, sv);
        DeleteSet::from_store(store).encode(&mut encoder);
        return Ok(encoder.to_vec());
    }
    let mut updates = vec![Update::from_store(store, sv)];
    if let Some(ds) = &store.pending_ds {
        updates.push(Update {
            blocks: HashMap::new(),
            delete_set: ds.clone(),
        });
    }
    if let Some(pending) = &store.pending {
        updates.push(Update::decode_v2(&pending.update)?.diff(sv));
    }
    Update::merge(updates).encode(&mut encoder);
    Ok(encoder.to_vec())
}

// ── Application ────────────────────────────────────────────────────────────

impl TransactionMut<'_> {
    /// Integrates a decoded update. Structs and deletions with missing
    /// dependencies are buffered in the store and retried automatically by
    /// later updates.
    pub fn apply_update(&mut self, update: Update) -> Result<()> {
        let Update { blocks, delete_set } = update;
        let rest = integrate_structs(self, blocks)?;

        let store = &self.doc.blocks;
        let retry = store
            .pending
            .as_ref()
            .is_some_and(|p| p.missing.iter().any(|(client, clock)| *clock < store.get_state(client)));
        match (self.doc.blocks.pending.as_mut(), rest) {
            (Some(pending), Some(rest)) => {
                for (client, clock) in rest.missing.iter() {
                    pending.missing.set_min(*client, *clock);
                }
                pending.update = merge_updates_v2(&[&pending.update, &rest.update])?;
            }
            (None, rest) => self.doc.blocks.pending = rest,
            (Some(_), None) => {}
        }

        let unapplied = self.apply_delete_set(&delete_set)?;
        let unapplied_pending = match self.doc.blocks.pending_ds.take() {
            Some(pending_ds) => self.apply_delete_set(&pending_ds)?,
            None => None,
        };
        self.doc.blocks.pending_ds = match (unapplied, unapplied_pending) {
            (Some(a), Some(b)) => Some(DeleteSet::merge_all([&a, &b])),
            (a, b) => a.or(b),
        };

        if retry {
            if let Some(pending) = self.doc.blocks.pending.take() {
                debug!(missing = pending.missing.len(), "retrying pending update");
                self.apply_update(Update::decode_v2(&pending.update)?)?;
            }
        }
        Ok(())
    }

    /// Deletes every known struct covered by `ds` and returns the ranges
    /// beyond local knowledge.
    pub(crate) fn apply_delete_set(&mut self, ds: &DeleteSet) -> Result<Option<DeleteSet>> {
        let mut unapplied = DeleteSet::new();
        for (client, ranges) in ds.iter() {
            let state = self.doc.blocks.get_state(client);
            for range in ranges {
                let end = range.end();
                if range.clock >= state {
                    unapplied.add(*client, range.clock, range.len);
                    continue;
                }
                if state < end {
                    unapplied.add(*client, state, end - state);
                }
                let span = self
                    .doc
                    .blocks
                    .clean_range(client, range.clock, end.min(state) - range.clock, &mut self.merge_blocks)?;
                let targets: Vec<ID> = self.doc.blocks.blocks(client).unwrap_or_default()[span]
                    .iter()
                    .filter_map(|block| match block {
                        Block::Item(item) if !item.deleted => Some(item.id),
                        _ => None,
                    })
                    .collect();
                for id in targets {
                    self.delete_item(&id)?;
                }
            }
        }
        if unapplied.is_empty() {
            return Ok(None);
        }
        unapplied.sort_and_merge();
        debug!(clients = unapplied.iter().count(), "buffering deletions of unknown structs");
        Ok(Some(unapplied))
    }
}
