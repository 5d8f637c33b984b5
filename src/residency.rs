//! Global recency order of resident pages.
//!
//! The list spans every address space, so eviction is true LRU over the whole
//! machine. Front = most recently touched, back = next victim.

use hashlink::LinkedHashSet;

use crate::entry::EntryId;

/// Backed by a linked hash set whose insertion end is our front, which gives
/// O(1) push, touch, removal and tail pop.
pub struct ResidencyList {
    set: LinkedHashSet<EntryId>,
}

impl ResidencyList {
    pub fn new() -> Self {
        ResidencyList {
            set: LinkedHashSet::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.set.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    #[inline]
    pub fn contains(&self, id: EntryId) -> bool {
        self.set.contains(&id)
    }

    /// Add a newly resident entry as the most recently touched
    pub fn push_front(&mut self, id: EntryId) {
        let fresh = self.set.insert(id);
        assert!(fresh, "frame accounting violation: {} is already resident", id);
    }

    /// Move `id` to the front. Entries no longer listed (evicted or departing)
    /// are left alone.
    pub fn touch(&mut self, id: EntryId) -> bool {
        if self.set.remove(&id) {
            self.set.insert(id);
            true
        } else {
            false
        }
    }

    /// Eviction candidate, without removing it
    pub fn back(&self) -> Option<EntryId> {
        self.set.front().copied()
    }

    /// Take the eviction candidate out of the list
    pub fn pop_back(&mut self) -> Option<EntryId> {
        self.set.pop_front()
    }

    pub fn remove(&mut self, id: EntryId) -> bool {
        self.set.remove(&id)
    }

    /// Most recently touched first
    pub fn to_vec(&self) -> Vec<EntryId> {
        let mut ids: Vec<EntryId> = self.set.iter().copied().collect();
        ids.reverse();
        ids
    }
}

impl Default for ResidencyList {
    fn default() -> Self {
        Self::new()
    }
}
