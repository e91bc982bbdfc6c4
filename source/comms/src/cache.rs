//! Identifier Cache
//!
//! Holds the most recent payload for every LIN identifier. There is one
//! fixed slot per identifier, so the cache never allocates and never fills up.

use crate::{LinId, Payload, MAX_IDS, PAYLOAD_LEN};

/// The latest payload for each of the 64 LIN identifiers
pub struct IdCache {
    data: [Payload; MAX_IDS],
    seen: u64,
}

impl IdCache {
    /// Create an empty cache. Every slot reads as all zeros.
    pub const fn new() -> Self {
        Self {
            data: [[0u8; PAYLOAD_LEN]; MAX_IDS],
            seen: 0,
        }
    }

    /// Overwrite the slot for `id`
    pub fn set(&mut self, id: LinId, payload: &Payload) {
        self.data[id.index()] = *payload;
        self.seen |= 1 << id.index();
    }

    /// The current contents of the slot for `id`.
    ///
    /// Identifiers that were never set read as all zeros.
    #[inline]
    pub fn get(&self, id: LinId) -> &Payload {
        &self.data[id.index()]
    }

    /// Has `id` ever been set?
    #[inline]
    pub fn contains(&self, id: LinId) -> bool {
        self.seen & (1 << id.index()) != 0
    }

    /// Number of identifiers that have been set at least once
    #[inline]
    pub fn len(&self) -> usize {
        self.seen.count_ones() as usize
    }

    /// Has no identifier been set yet?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.seen == 0
    }

    /// Iterate over the identifiers that have been set, with their payloads
    pub fn iter(&self) -> impl Iterator<Item = (LinId, &Payload)> + '_ {
        LinId::all()
            .filter(|id| self.contains(*id))
            .map(|id| (id, self.get(id)))
    }
}

impl Default for IdCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u8) -> LinId {
        LinId::new(raw).unwrap()
    }

    #[test]
    fn unseen_reads_zero() {
        let cache = IdCache::new();
        assert!(cache.is_empty());
        assert!(LinId::all().all(|i| cache.get(i) == &[0u8; 8] && !cache.contains(i)));
    }

    #[test]
    fn set_overwrites_without_history() {
        let mut cache = IdCache::new();
        cache.set(id(0x34), &[1; 8]);
        cache.set(id(0x34), &[2; 8]);
        assert_eq!(cache.get(id(0x34)), &[2; 8]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(id(0x35)), &[0; 8]);
    }

    #[test]
    fn zero_payload_still_counts_as_seen() {
        let mut cache = IdCache::new();
        cache.set(LinId::MAX, &[0; 8]);
        assert!(cache.contains(LinId::MAX));
        assert_eq!(cache.iter().count(), 1);
    }

    #[test]
    fn iter_is_ordered_by_id() {
        let mut cache = IdCache::new();
        cache.set(id(0x36), &[3; 8]);
        cache.set(id(0x32), &[1; 8]);
        let ids: Vec<u8> = cache.iter().map(|(i, _)| i.get()).collect();
        assert_eq!(ids, [0x32, 0x36]);
    }
}
