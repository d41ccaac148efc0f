//! Local key/value mirror with per-key write epochs
//!
//! Every foreground write or removal bumps the key's epoch under the same
//! lock that guards the entry. Fills coming from a store read (read-through
//! on a miss, the population pass) carry the epoch observed before the read
//! and are dropped if the key was touched in the meantime, so a slow read
//! can never overwrite a newer `set` or resurrect a deleted key.
//!
//! Epochs outlive their entries (a deleted key keeps its epoch as a
//! tombstone) and survive `clear`.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use ahash::RandomState;
use parking_lot::RwLock;

/// Write epoch of a key; `0` for keys never written through the mirror
pub(crate) type Epoch = u64;

/// Result of looking a key up in the mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Lookup {
    /// The key is mirrored
    Hit(String),
    /// The key is not mirrored; fills must present this epoch
    Miss(Epoch),
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, String, RandomState>,
    epochs: HashMap<String, Epoch, RandomState>,
    clock: Epoch,
}

impl Inner {
    fn epoch(&self, key: &str) -> Epoch {
        self.epochs.get(key).copied().unwrap_or(0)
    }

    fn touch(&mut self, key: &str) {
        self.clock += 1;
        let clock = self.clock;
        match self.epochs.get_mut(key) {
            Some(epoch) => *epoch = clock,
            None => {
                self.epochs.insert(key.to_string(), clock);
            }
        }
    }
}

/// Key/value mirror shared between the foreground and the population task
#[derive(Default)]
pub(crate) struct Mirror {
    inner: RwLock<Inner>,
}

impl Mirror {
    pub(crate) fn lookup(&self, key: &str) -> Lookup {
        let inner = self.inner.read();
        match inner.entries.get(key) {
            Some(value) => Lookup::Hit(value.clone()),
            None => Lookup::Miss(inner.epoch(key)),
        }
    }

    pub(crate) fn epoch(&self, key: &str) -> Epoch {
        self.inner.read().epoch(key)
    }

    /// Foreground write
    pub(crate) fn write(&self, key: &str, value: &str) {
        let mut inner = self.inner.write();
        inner.touch(key);
        inner.entries.insert(key.to_string(), value.to_string());
    }

    /// Foreground removal; returns whether an entry was present
    pub(crate) fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.write();
        inner.touch(key);
        inner.entries.remove(key).is_some()
    }

    /// Drop `key` only if it still holds `value`; returns whether it did
    pub(crate) fn invalidate(&self, key: &str, value: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.entries.get(key).map(String::as_str) != Some(value) {
            return false;
        }
        inner.touch(key);
        inner.entries.remove(key);
        true
    }

    /// Insert a value read from the store, unless the key is mirrored or
    /// was written since `seen` was observed
    pub(crate) fn fill(&self, key: String, value: String, seen: Epoch) -> bool {
        let mut inner = self.inner.write();
        if inner.epoch(&key) != seen {
            return false;
        }
        match inner.entries.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.inner.read().entries.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub(crate) fn clear(&self) {
        self.inner.write().entries.clear();
    }
}
