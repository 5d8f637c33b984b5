//! Translation entries and the arena that owns them.
//!
//! Every address space's page table is a list of [`EntryId`] handles into one
//! shared [`EntryArena`]. The residency list holds the same handles, so tearing
//! down an address space never leaves it pointing at freed memory.

use bitflags::bitflags;

use crate::memory::FrameId;
use crate::sector::SlotId;

bitflags! {
    /// Access-control and usage bits of a translation entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntryFlags: u8 {
        /// The entry currently occupies its physical frame
        const VALID = 1 << 0;
        /// User writes raise a read-only exception
        const READ_ONLY = 1 << 1;
        /// Set on every reference
        const USE = 1 << 2;
        /// Set on every write
        const DIRTY = 1 << 3;
    }
}

/// Handle into the [`EntryArena`].
///
/// The generation changes every time an arena slot is reused, so a handle to a
/// destroyed entry never resolves to the entry that took its place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId {
    index: u32,
    generation: u32,
}

impl EntryId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        EntryId { index, generation }
    }

    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entry#{}.{}", self.index, self.generation)
    }
}

/// One virtual page of one address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    pub virtual_page: usize,
    /// Meaningful only while `VALID` is set
    pub physical_frame: FrameId,
    pub flags: EntryFlags,
    pub(crate) backing_slot: Option<SlotId>,
    /// A slot is only read back once something was written to it
    pub(crate) ever_swapped_out: bool,
    /// Being evicted or faulted in; the thread doing it owns the frame
    pub(crate) in_transit: bool,
    /// Destroyed while in transit; the transferring thread finishes the job
    pub(crate) doomed: bool,
}

impl TranslationEntry {
    pub fn new(virtual_page: usize) -> Self {
        TranslationEntry {
            virtual_page,
            physical_frame: 0,
            flags: EntryFlags::empty(),
            backing_slot: None,
            ever_swapped_out: false,
            in_transit: false,
            doomed: false,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.flags.contains(EntryFlags::VALID)
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.flags.contains(EntryFlags::READ_ONLY)
    }

    #[inline]
    pub fn is_referenced(&self) -> bool {
        self.flags.contains(EntryFlags::USE)
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(EntryFlags::DIRTY)
    }

    #[inline]
    pub fn backing_slot(&self) -> Option<SlotId> {
        self.backing_slot
    }

    #[inline]
    pub fn ever_swapped_out(&self) -> bool {
        self.ever_swapped_out
    }

    /// Point the entry at `frame` as a freshly resident page
    pub(crate) fn map_to(&mut self, frame: FrameId) {
        self.physical_frame = frame;
        self.flags.insert(EntryFlags::VALID);
        self.flags.remove(EntryFlags::USE | EntryFlags::DIRTY);
    }

    pub(crate) fn unmap(&mut self) {
        self.flags.remove(EntryFlags::VALID);
    }
}

#[derive(Default)]
struct ArenaSlot {
    generation: u32,
    entry: Option<TranslationEntry>,
}

/// Slab of translation entries shared by every address space
#[derive(Default)]
pub struct EntryArena {
    slots: Vec<ArenaSlot>,
    free: Vec<u32>,
    live: usize,
}

impl EntryArena {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn insert(&mut self, entry: TranslationEntry) -> EntryId {
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                EntryId::new(index, slot.generation)
            }
            None => {
                self.slots.push(ArenaSlot {
                    generation: 0,
                    entry: Some(entry),
                });
                EntryId::new((self.slots.len() - 1) as u32, 0)
            }
        }
    }

    pub fn remove(&mut self, id: EntryId) -> Option<TranslationEntry> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(entry)
    }

    #[inline]
    pub fn get(&self, id: EntryId) -> Option<&TranslationEntry> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut TranslationEntry> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Live entries with their handles
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &TranslationEntry)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry
                .as_ref()
                .map(|entry| (EntryId::new(index as u32, slot.generation), entry))
        })
    }
}
