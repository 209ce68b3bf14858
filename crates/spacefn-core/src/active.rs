// spacefn Active Key Set
// Ordered, duplicate-free record of keys reported pressed downstream

use smallvec::SmallVec;

use crate::MappedKey;

/// Maximum number of keys tracked at once
pub const ACTIVE_CAPACITY: usize = 8;

/// Keys this process has reported to the virtual device as pressed and not
/// yet released, in insertion order.
///
/// Capacity is fixed. Appending past capacity is a silent no-op: the caller
/// still forwards the event, it just isn't remembered.
#[derive(Debug, Clone, Default)]
pub struct ActiveKeySet {
    keys: SmallVec<[MappedKey; ACTIVE_CAPACITY]>,
}

impl ActiveKeySet {
    /// Create a new empty set
    pub fn new() -> Self {
        Self {
            keys: SmallVec::new(),
        }
    }

    /// Insert a key if absent and capacity remains.
    ///
    /// Returns whether capacity was available; appending a key that is
    /// already present leaves the set unchanged and returns `true`.
    pub fn append(&mut self, key: impl Into<MappedKey>) -> bool {
        let key = key.into();
        if self.keys.contains(&key) {
            return true;
        }
        if self.keys.len() >= ACTIVE_CAPACITY {
            return false;
        }
        self.keys.push(key);
        true
    }

    /// Remove a key, preserving the order of the rest.
    ///
    /// Returns whether the key was present.
    pub fn remove(&mut self, key: impl Into<MappedKey>) -> bool {
        let key = key.into();
        match self.keys.iter().position(|k| *k == key) {
            Some(index) => {
                self.keys.remove(index);
                true
            }
            None => false,
        }
    }

    /// Check if a key is tracked
    pub fn contains(&self, key: impl Into<MappedKey>) -> bool {
        self.keys.contains(&key.into())
    }

    /// Forget every key
    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Copy of the tracked keys in insertion order
    pub fn to_vec(&self) -> Vec<MappedKey> {
        self.keys.to_vec()
    }
}
