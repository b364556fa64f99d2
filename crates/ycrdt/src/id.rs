//! Struct identifiers and state vectors.

use std::collections::HashMap;
use std::fmt;

use ycrdt_buffers::{Reader, Writer};

use crate::error::{Error, Result};

/// Identity of a replica; stamps every struct it creates.
pub type ClientID = u64;

/// Unique identifier of a single element of a client's history.
///
/// Ordered lexicographically by `(client, clock)`; causal order is only
/// meaningful between ids of the same client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ID {
    pub client: ClientID,
    pub clock: u32,
}

impl ID {
    pub const fn new(client: ClientID, clock: u32) -> Self {
        Self { client, clock }
    }
}

impl fmt::Display for ID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}#{}>", self.client, self.clock)
    }
}

/// Narrows a decoded clock or length to the 32-bit clock domain.
pub(crate) fn clock_from_u64(clock: u64) -> Result<u32> {
    u32::try_from(clock).map_err(|_| Error::InvalidRange { clock, len: 0 })
}

// ── StateVector ────────────────────────────────────────────────────────────

/// Map from client id to the next clock expected from that client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateVector(HashMap<ClientID, u32>);

impl StateVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next expected clock for `client` (0 when unknown).
    pub fn get(&self, client: &ClientID) -> u32 {
        self.0.get(client).copied().unwrap_or(0)
    }

    pub fn set(&mut self, client: ClientID, clock: u32) {
        self.0.insert(client, clock);
    }

    /// Lowers the entry for `client` to `clock` (inserting it when absent).
    pub fn set_min(&mut self, client: ClientID, clock: u32) {
        self.0
            .entry(client)
            .and_modify(|c| *c = (*c).min(clock))
            .or_insert(clock);
    }

    /// Raises the entry for `client` to `clock` (inserting it when absent).
    pub fn set_max(&mut self, client: ClientID, clock: u32) {
        self.0
            .entry(client)
            .and_modify(|c| *c = (*c).max(clock))
            .or_insert(clock);
    }

    pub fn contains(&self, id: &ID) -> bool {
        id.clock < self.get(&id.client)
    }

    pub fn contains_client(&self, client: &ClientID) -> bool {
        self.0.contains_key(client)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientID, &u32)> {
        self.0.iter()
    }

    /// Entries sorted by descending client id, the order used on the wire.
    pub fn sorted_desc(&self) -> Vec<(ClientID, u32)> {
        let mut entries: Vec<_> = self.0.iter().map(|(c, k)| (*c, *k)).collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        entries
    }

    pub(crate) fn write(&self, w: &mut Writer) {
        w.var_uint(self.0.len() as u64);
        for (client, clock) in self.sorted_desc() {
            w.var_uint(client);
            w.var_uint(clock as u64);
        }
    }

    pub(crate) fn read(r: &mut Reader<'_>) -> Result<Self> {
        let len = r.var_uint()?;
        let mut sv = StateVector::new();
        for _ in 0..len {
            let client = r.var_uint()?;
            let clock = clock_from_u64(r.var_uint()?)?;
            sv.set(client, clock);
        }
        Ok(sv)
    }

    /// Serializes as a count-prefixed list of `(client, clock)` pairs,
    /// sorted by descending client id.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.write(&mut w);
        w.into_inner()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::read(&mut Reader::new(data))
    }
}

impl FromIterator<(ClientID, u32)> for StateVector {
    fn from_iter<T: IntoIterator<Item = (ClientID, u32)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_sorted_by_client_desc() {
        let sv: StateVector = [(1, 5), (300, 2), (7, 0)].into_iter().collect();
        assert_eq!(sv.encode(), [3, 0xac, 0x02, 2, 7, 0, 1, 5]);
        assert_eq!(StateVector::decode(&sv.encode()).unwrap(), sv);
    }

    #[test]
    fn set_min_and_max() {
        let mut sv = StateVector::new();
        sv.set_min(1, 4);
        sv.set_min(1, 6);
        assert_eq!(sv.get(&1), 4);
        sv.set_max(1, 9);
        assert_eq!(sv.get(&1), 9);
        assert_eq!(sv.get(&2), 0);
        assert!(sv.contains(&ID::new(1, 8)));
        assert!(!sv.contains(&ID::new(1, 9)));
    }

    #[test]
    fn truncated_state_vector() {
        assert!(StateVector::decode(&[2, 1, 1]).is_err());
    }
}
