use std::collections::{BTreeMap, BTreeSet};
use crate::core::types::{EntryId, IndexKey, IndexRecord};

/// A sorted key -> entry-id mapping with a reverse id -> key map for
/// clean-up on delete/modify. Counts are scan-count estimates for the
/// optimizer; here they happen to be exact.
///
/// Record scans materialize a snapshot at call time, so cursors built over
/// them are unaffected by later writes (snapshot-per-cursor policy).
pub struct BTreeIndex<K: Ord + Clone> {
    name: String,
    forward: BTreeMap<K, BTreeSet<EntryId>>,
    reverse: BTreeMap<EntryId, BTreeSet<K>>,
    pairs: usize,
}

impl<K: Ord + Clone> BTreeIndex<K> {
    pub fn new(name: &str) -> Self {
        BTreeIndex {
            name: name.to_string(),
            forward: BTreeMap::new(),
            reverse: BTreeMap::new(),
            pairs: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert one (key, id) pair. Returns false if it was already present.
    pub fn insert(&mut self, key: K, id: EntryId) -> bool {
        let added = self.forward.entry(key.clone()).or_default().insert(id);
        if added {
            self.reverse.entry(id).or_default().insert(key);
            self.pairs += 1;
        }
        added
    }

    /// Remove one (key, id) pair. Returns false if it was not present.
    pub fn remove(&mut self, key: &K, id: EntryId) -> bool {
        let removed = match self.forward.get_mut(key) {
            Some(ids) => {
                let removed = ids.remove(&id);
                if ids.is_empty() {
                    self.forward.remove(key);
                }
                removed
            }
            None => false,
        };
        if removed {
            if let Some(keys) = self.reverse.get_mut(&id) {
                keys.remove(key);
                if keys.is_empty() {
                    self.reverse.remove(&id);
                }
            }
            self.pairs -= 1;
        }
        removed
    }

    /// Remove every pair referencing the given id. Returns how many pairs
    /// were dropped.
    pub fn drop_all(&mut self, id: EntryId) -> usize {
        let keys = match self.reverse.remove(&id) {
            Some(keys) => keys,
            None => return 0,
        };
        let mut dropped = 0;
        for key in keys {
            if let Some(ids) = self.forward.get_mut(&key) {
                if ids.remove(&id) {
                    dropped += 1;
                }
                if ids.is_empty() {
                    self.forward.remove(&key);
                }
            }
        }
        self.pairs -= dropped;
        dropped
    }

    /// Ids associated with the key, ascending.
    pub fn forward(&self, key: &K) -> Vec<EntryId> {
        self.forward
            .get(key)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn forward_first(&self, key: &K) -> Option<EntryId> {
        self.forward
            .get(key)
            .and_then(|ids| ids.iter().next().copied())
    }

    pub fn forward_contains(&self, key: &K, id: EntryId) -> bool {
        self.forward.get(key).map_or(false, |ids| ids.contains(&id))
    }

    /// Keys an id is associated with, ascending.
    pub fn reverse(&self, id: EntryId) -> Vec<K> {
        self.reverse
            .get(&id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of (key, id) pairs.
    pub fn count(&self) -> usize {
        self.pairs
    }

    pub fn count_key(&self, key: &K) -> usize {
        self.forward.get(key).map_or(0, BTreeSet::len)
    }

    /// Pairs with key >= the bound.
    pub fn count_from(&self, key: &K) -> usize {
        self.forward.range(key..).map(|(_, ids)| ids.len()).sum()
    }

    /// Pairs with key <= the bound.
    pub fn count_to(&self, key: &K) -> usize {
        self.forward.range(..=key).map(|(_, ids)| ids.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs == 0
    }
}

impl<K: Ord + Clone + Into<IndexKey>> BTreeIndex<K> {
    fn collect<'a>(iter: impl Iterator<Item = (&'a K, &'a BTreeSet<EntryId>)>) -> Vec<IndexRecord>
    where
        K: 'a,
    {
        let mut out = Vec::new();
        for (key, ids) in iter {
            for id in ids {
                out.push(IndexRecord::new(key.clone(), *id));
            }
        }
        out
    }

    /// All records ascending by key then id.
    pub fn records(&self) -> Vec<IndexRecord> {
        Self::collect(self.forward.iter())
    }

    /// All records descending by key (ids stay ascending within a key).
    pub fn records_rev(&self) -> Vec<IndexRecord> {
        Self::collect(self.forward.iter().rev())
    }

    pub fn records_for_key(&self, key: &K) -> Vec<IndexRecord> {
        Self::collect(self.forward.range(key.clone()..=key.clone()))
    }

    /// Records with key >= the bound, ascending.
    pub fn records_from(&self, key: &K) -> Vec<IndexRecord> {
        Self::collect(self.forward.range(key.clone()..))
    }

    /// Records with key <= the bound, ascending.
    pub fn records_to(&self, key: &K) -> Vec<IndexRecord> {
        Self::collect(self.forward.range(..=key.clone()))
    }
}
