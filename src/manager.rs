//! Shared state of the whole machine's memory: frames, swap slots, the
//! residency list and every translation entry.
//!
//! Each structure sits behind its own lock and every operation holds a lock
//! for one bookkeeping step only. Backing-store I/O always runs with no lock
//! held, so other threads keep faulting and evicting while a transfer is
//! outstanding.
//!
//! Lock order when nesting: entries, then residency, then frames.

use std::sync::Arc;

use log::{debug, info, trace};
use spin::Mutex;

use crate::config::MemoryConfig;
use crate::entry::{EntryArena, EntryId, TranslationEntry};
use crate::error::{Error, Result};
use crate::memory::{BackingStore, Disk, FrameId, FramePool, PhysicalMemory};
use crate::residency::ResidencyList;
use crate::sector::SectorAllocator;
use crate::stats::{Stats, StatsSnapshot};

pub struct MemoryManager {
    config: MemoryConfig,
    memory: Mutex<PhysicalMemory>,
    frames: Mutex<FramePool>,
    residency: Mutex<ResidencyList>,
    sectors: Mutex<SectorAllocator>,
    entries: Mutex<EntryArena>,
    store: Arc<dyn BackingStore>,
    stats: Stats,
}

impl MemoryManager {
    pub fn new(config: MemoryConfig, store: Arc<dyn BackingStore>) -> Result<Self> {
        config.validate()?;
        if store.page_size() != config.page_size {
            return Err(Error::InvalidConfig(format!(
                "disk slots hold {} bytes, pages are {}",
                store.page_size(),
                config.page_size
            )));
        }
        if store.slot_count() < config.num_slots {
            return Err(Error::InvalidConfig(format!(
                "disk has {} slots, {} configured",
                store.slot_count(),
                config.num_slots
            )));
        }

        Ok(MemoryManager {
            config,
            memory: Mutex::new(PhysicalMemory::new(config.num_frames, config.page_size)),
            frames: Mutex::new(FramePool::new(config.num_frames)),
            residency: Mutex::new(ResidencyList::new()),
            sectors: Mutex::new(SectorAllocator::new(config.num_slots)),
            entries: Mutex::new(EntryArena::new()),
            store,
            stats: Stats::default(),
        })
    }

    /// Memory manager swapping to an in-memory disk
    pub fn with_disk(config: MemoryConfig) -> Result<Self> {
        let disk = Arc::new(Disk::new(config.num_slots, config.page_size));
        Self::new(config, disk)
    }

    #[inline]
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn counters(&self) -> &Stats {
        &self.stats
    }

    // ---------------------------------------------------------------------
    // Translation entries
    // ---------------------------------------------------------------------

    pub fn create_entry(&self, virtual_page: usize) -> EntryId {
        self.entries.lock().insert(TranslationEntry::new(virtual_page))
    }

    /// Snapshot of an entry
    pub fn entry(&self, id: EntryId) -> Option<TranslationEntry> {
        self.entries.lock().get(id).copied()
    }

    pub fn update_entry<R>(&self, id: EntryId, f: impl FnOnce(&mut TranslationEntry) -> R) -> Option<R> {
        self.entries.lock().get_mut(id).map(f)
    }

    /// Retire an entry: drop it from the residency list, give back its frame
    /// and its swap slot.
    ///
    /// An entry caught mid-eviction or mid-fault stays in the arena, marked
    /// doomed; the transferring thread frees its frame and slot once the disk
    /// transfer completes.
    pub fn destroy_entry(&self, id: EntryId) {
        let entry = {
            let mut entries = self.entries.lock();
            match entries.get_mut(id) {
                None => return,
                Some(entry) if entry.in_transit => {
                    entry.doomed = true;
                    self.residency.lock().remove(id);
                    trace!("{} destroyed mid-transfer", id);
                    return;
                }
                Some(_) => {}
            }
            self.residency.lock().remove(id);
            match entries.remove(id) {
                Some(entry) => entry,
                None => return,
            }
        };

        if entry.is_valid() {
            self.release_frame(entry.physical_frame);
        }
        if let Some(slot) = entry.backing_slot {
            self.sectors.lock().release(slot);
        }
        trace!("destroyed {} (virtual page {})", id, entry.virtual_page);
    }

    /// Close a transfer on `id` and apply `f` to the entry.
    ///
    /// If the entry was destroyed during the transfer it is removed now and
    /// its slot released; `f` is skipped and None returned. The frame stays
    /// with the caller either way.
    fn end_transit<R>(&self, id: EntryId, f: impl FnOnce(&mut TranslationEntry) -> R) -> Option<R> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(id)?;
        entry.in_transit = false;
        if !entry.doomed {
            return Some(f(entry));
        }

        let slot = entries.remove(id).and_then(|entry| entry.backing_slot);
        drop(entries);
        if let Some(slot) = slot {
            self.sectors.lock().release(slot);
        }
        trace!("finished destroying {}", id);
        None
    }

    // ---------------------------------------------------------------------
    // Frame pool and residency list
    // ---------------------------------------------------------------------

    #[inline]
    pub fn is_frame_used(&self, frame: FrameId) -> bool {
        self.frames.lock().is_used(frame)
    }

    pub fn free_frame_count(&self) -> usize {
        self.frames.lock().free_count()
    }

    /// Find the first unused frame at or after `from` and mark it used in the
    /// same step, so no other thread can take it in between.
    pub fn claim_free_frame(&self, from: FrameId) -> Option<FrameId> {
        let mut frames = self.frames.lock();
        let frame = frames.find_free_from(from)?;
        frames.mark_used(frame);
        Some(frame)
    }

    pub(crate) fn release_frame(&self, frame: FrameId) {
        self.frames.lock().mark_free(frame);
    }

    /// Make `id` resident in the unused `frame`.
    ///
    /// The frame is marked used, the entry is mapped with clear usage bits,
    /// its content is swapped in and it becomes the most recently touched
    /// entry of the residency list.
    pub fn assign_free_frame(&self, frame: FrameId, id: EntryId) -> Result<()> {
        self.frames.lock().mark_used(frame);
        if self.install(frame, id, true)? {
            self.publish(id, frame);
        }
        Ok(())
    }

    /// Map `id` onto a frame already marked used and bring its content in.
    /// The entry is not yet an eviction candidate. Returns false when the
    /// entry no longer exists, in which case the frame has been given back.
    pub(crate) fn install(&self, frame: FrameId, id: EntryId, in_transit: bool) -> Result<bool> {
        let mapped = self.update_entry(id, |entry| {
            assert!(
                !entry.is_valid(),
                "frame accounting violation: {} already resident in frame {}",
                id,
                entry.physical_frame
            );
            entry.map_to(frame);
            entry.in_transit = in_transit;
        });
        if mapped.is_none() {
            self.release_frame(frame);
            return Ok(false);
        }
        trace!("{} -> frame {}", id, frame);

        if let Err(err) = self.swap_in(id) {
            self.end_transit(id, TranslationEntry::unmap);
            self.release_frame(frame);
            return Err(err);
        }
        Ok(true)
    }

    /// Put an installed entry at the front of the residency list
    pub(crate) fn publish(&self, id: EntryId, frame: FrameId) {
        let published = self.end_transit(id, |entry| {
            assert!(
                entry.is_valid() && entry.physical_frame == frame,
                "frame accounting violation: publishing {} which does not own frame {}",
                id,
                frame
            );
            self.residency.lock().push_front(id);
        });
        if published.is_none() {
            self.release_frame(frame);
        }
    }

    /// Evict the least recently touched page and return its frame, now free.
    pub fn evict_tail(&self) -> Result<FrameId> {
        let frame = self.reclaim_frame()?;
        self.release_frame(frame);
        Ok(frame)
    }

    /// Evict the least recently touched page but keep its frame marked used,
    /// handing it straight to the caller.
    ///
    /// The victim leaves the residency list before its write-back starts, so
    /// a second eviction running while this one blocks on the disk picks a
    /// different victim.
    pub(crate) fn reclaim_frame(&self) -> Result<FrameId> {
        let (id, frame) = {
            let mut entries = self.entries.lock();
            let id = self.residency.lock().pop_back().ok_or(Error::NoEvictionCandidate)?;
            let entry = entries
                .get_mut(id)
                .unwrap_or_else(|| panic!("frame accounting violation: listed {} does not exist", id));
            entry.in_transit = true;
            (id, entry.physical_frame)
        };

        if let Err(err) = self.swap_out_inner(id) {
            // back into candidacy; the frame still holds the page
            let requeued = self.end_transit(id, |_| self.residency.lock().push_front(id));
            if requeued.is_none() {
                self.release_frame(frame);
            }
            return Err(err);
        }

        // a doomed victim is gone now; its frame goes to the caller all the same
        self.end_transit(id, TranslationEntry::unmap);
        self.stats.record_eviction();
        info!("evicted {} from frame {}", id, frame);
        Ok(frame)
    }

    /// Move `id` to the front of the residency list
    pub fn touch(&self, id: EntryId) -> bool {
        self.residency.lock().touch(id)
    }

    pub fn resident_count(&self) -> usize {
        self.residency.lock().len()
    }

    /// Resident entries, most recently touched first
    pub fn residency_order(&self) -> Vec<EntryId> {
        self.residency.lock().to_vec()
    }

    pub fn eviction_candidate(&self) -> Option<EntryId> {
        self.residency.lock().back()
    }

    // ---------------------------------------------------------------------
    // Swap protocol
    // ---------------------------------------------------------------------

    /// Write the page of a resident entry to its swap slot, taking a slot on
    /// first use. Residency bookkeeping is left to the caller.
    pub fn swap_out(&self, id: EntryId) -> Result<()> {
        if self.swap_out_inner(id)? {
            Ok(())
        } else {
            Err(Error::FrameAccountingViolation(format!("swap out of unknown {}", id)))
        }
    }

    fn swap_out_inner(&self, id: EntryId) -> Result<bool> {
        let Some(entry) = self.entry(id) else {
            return Ok(false);
        };
        assert!(
            entry.is_valid(),
            "frame accounting violation: swap out of non-resident {}",
            id
        );

        let Some(slot) = self.slot_for(id, entry)? else {
            return Ok(false);
        };
        let page = self.read_frame(entry.physical_frame);
        self.store.write_slot(slot, &page)?;

        self.update_entry(id, |entry| entry.ever_swapped_out = true);
        self.stats.record_swap_out();
        debug!("swap out {} frame {} -> slot {}", id, entry.physical_frame, slot);
        Ok(true)
    }

    /// The entry's slot, acquiring one if it has none yet. None if the entry
    /// disappeared meanwhile.
    fn slot_for(&self, id: EntryId, entry: TranslationEntry) -> Result<Option<usize>> {
        if let Some(slot) = entry.backing_slot {
            return Ok(Some(slot));
        }

        let slot = self.sectors.lock().acquire()?;
        let recorded = self.update_entry(id, |entry| match entry.backing_slot {
            Some(existing) => existing,
            None => {
                entry.backing_slot = Some(slot);
                slot
            }
        });
        match recorded {
            Some(owned) if owned == slot => Ok(Some(slot)),
            other => {
                self.sectors.lock().release(slot);
                Ok(other)
            }
        }
    }

    /// Fill the entry's freshly mapped frame. Pages that were never swapped
    /// out read as zeros.
    pub fn swap_in(&self, id: EntryId) -> Result<()> {
        let entry = self
            .entry(id)
            .ok_or_else(|| Error::FrameAccountingViolation(format!("swap in of unknown {}", id)))?;
        assert!(
            entry.is_valid(),
            "frame accounting violation: swap in of {} without a frame",
            id
        );

        if !entry.ever_swapped_out {
            self.memory.lock().zero_frame(entry.physical_frame);
            return Ok(());
        }

        let slot = entry.backing_slot.ok_or_else(|| {
            Error::FrameAccountingViolation(format!("{} swapped out without a slot", id))
        })?;
        let mut page = vec![0u8; self.config.page_size];
        self.store.read_slot(slot, &mut page)?;
        self.write_frame(entry.physical_frame, &page);
        self.stats.record_swap_in();
        debug!("swap in {} slot {} -> frame {}", id, slot, entry.physical_frame);
        Ok(())
    }

    /// Stage a page that never got a frame straight to its swap slot
    pub fn swap_out_data(&self, id: EntryId, page: &[u8]) -> Result<()> {
        assert_eq!(page.len(), self.config.page_size, "staged page has the wrong size");
        let entry = self
            .entry(id)
            .ok_or_else(|| Error::FrameAccountingViolation(format!("staging unknown {}", id)))?;
        assert!(
            !entry.is_valid(),
            "frame accounting violation: staging resident {}",
            id
        );

        let Some(slot) = self.slot_for(id, entry)? else {
            return Err(Error::FrameAccountingViolation(format!("staging unknown {}", id)));
        };
        self.store.write_slot(slot, page)?;
        self.update_entry(id, |entry| {
            entry.ever_swapped_out = true;
            entry.unmap();
        });
        self.stats.record_swap_out();
        debug!("staged {} -> slot {}", id, slot);
        Ok(())
    }

    pub fn used_slot_count(&self) -> usize {
        self.sectors.lock().used_count()
    }

    // ---------------------------------------------------------------------
    // Main memory
    // ---------------------------------------------------------------------

    pub fn read_frame(&self, frame: FrameId) -> Vec<u8> {
        self.memory.lock().frame(frame).to_vec()
    }

    pub fn write_frame(&self, frame: FrameId, data: &[u8]) {
        self.memory.lock().frame_mut(frame).copy_from_slice(data);
    }

    pub fn with_memory<R>(&self, f: impl FnOnce(&mut PhysicalMemory) -> R) -> R {
        f(&mut self.memory.lock())
    }

    // ---------------------------------------------------------------------
    // Invariants
    // ---------------------------------------------------------------------

    /// Verify that used frames and listed entries agree one to one.
    ///
    /// Only meaningful while no eviction, fault or load is in flight.
    pub fn check_accounting(&self) -> Result<()> {
        let entries = self.entries.lock();
        let residency = self.residency.lock();
        let frames = self.frames.lock();

        if frames.used_count() != residency.len() {
            return Err(Error::FrameAccountingViolation(format!(
                "{} frames used, {} entries resident",
                frames.used_count(),
                residency.len()
            )));
        }

        let mut owner = vec![None; frames.len()];
        for (id, entry) in entries.iter() {
            if !entry.is_valid() {
                if residency.contains(id) {
                    return Err(Error::FrameAccountingViolation(format!(
                        "{} listed but not resident",
                        id
                    )));
                }
                continue;
            }
            if !residency.contains(id) {
                return Err(Error::FrameAccountingViolation(format!(
                    "{} resident but not listed",
                    id
                )));
            }
            let frame = entry.physical_frame;
            if !frames.is_used(frame) {
                return Err(Error::FrameAccountingViolation(format!(
                    "{} maps unused frame {}",
                    id, frame
                )));
            }
            if let Some(other) = owner[frame].replace(id) {
                return Err(Error::FrameAccountingViolation(format!(
                    "frame {} shared by {} and {}",
                    frame, other, id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(frames: usize, slots: usize) -> MemoryManager {
        let config = MemoryConfig::default()
            .with_page_size(16)
            .with_frames(frames)
            .with_slots(slots);
        MemoryManager::with_disk(config).unwrap()
    }

    fn fill(mm: &MemoryManager, id: EntryId, byte: u8) {
        let frame = mm.entry(id).unwrap().physical_frame;
        mm.write_frame(frame, &[byte; 16]);
    }

    #[test]
    fn test_rejects_mismatched_disk() {
        let config = MemoryConfig::default().with_page_size(16);
        let disk = Arc::new(Disk::new(config.num_slots, 32));
        assert!(matches!(MemoryManager::new(config, disk), Err(Error::InvalidConfig(_))));

        let disk = Arc::new(Disk::new(2, 16));
        assert!(matches!(MemoryManager::new(config, disk), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_assign_free_frame() {
        let mm = manager(2, 4);
        let id = mm.create_entry(0);
        mm.update_entry(id, |e| e.flags.insert(crate::entry::EntryFlags::USE));

        mm.assign_free_frame(1, id).unwrap();
        let entry = mm.entry(id).unwrap();
        assert!(entry.is_valid());
        assert_eq!(entry.physical_frame, 1);
        assert!(!entry.is_referenced());
        assert!(!entry.is_dirty());
        assert!(mm.is_frame_used(1));
        assert!(!mm.is_frame_used(0));
        assert_eq!(mm.residency_order(), vec![id]);
        mm.check_accounting().unwrap();
    }

    #[test]
    fn test_fresh_page_reads_as_zeros() {
        let mm = manager(1, 4);
        mm.write_frame(0, &[0xAB; 16]);

        let id = mm.create_entry(0);
        mm.assign_free_frame(0, id).unwrap();
        assert_eq!(mm.read_frame(0), vec![0; 16]);
        assert_eq!(mm.stats().swap_ins, 0);
    }

    #[test]
    #[should_panic(expected = "assigned twice")]
    fn test_assign_used_frame_panics() {
        let mm = manager(2, 4);
        let a = mm.create_entry(0);
        let b = mm.create_entry(1);
        mm.assign_free_frame(0, a).unwrap();
        mm.assign_free_frame(0, b).unwrap();
    }

    #[test]
    #[should_panic(expected = "already resident")]
    fn test_assign_resident_entry_panics() {
        let mm = manager(2, 4);
        let a = mm.create_entry(0);
        mm.assign_free_frame(0, a).unwrap();
        mm.assign_free_frame(1, a).unwrap();
    }

    #[test]
    fn test_swap_round_trip() {
        let mm = manager(1, 4);
        let id = mm.create_entry(0);
        mm.assign_free_frame(0, id).unwrap();
        let page: Vec<u8> = (0..16).collect();
        mm.write_frame(0, &page);

        let frame = mm.evict_tail().unwrap();
        assert_eq!(frame, 0);
        assert!(!mm.entry(id).unwrap().is_valid());
        assert!(mm.entry(id).unwrap().ever_swapped_out());

        // scribble over the frame before bringing the page back
        mm.write_frame(0, &[0xFF; 16]);
        mm.assign_free_frame(0, id).unwrap();
        assert_eq!(mm.read_frame(0), page);
        assert_eq!(mm.stats().swap_ins, 1);
    }

    #[test]
    fn test_evict_picks_tail() {
        let mm = manager(3, 8);
        let ids: Vec<_> = (0..3).map(|vpn| mm.create_entry(vpn)).collect();
        for (frame, &id) in ids.iter().enumerate() {
            mm.assign_free_frame(frame, id).unwrap();
        }
        // ids[0] is the oldest; touching it saves it
        assert!(mm.touch(ids[0]));
        assert_eq!(mm.eviction_candidate(), Some(ids[1]));

        let frame = mm.evict_tail().unwrap();
        assert_eq!(frame, 1);
        assert!(!mm.is_frame_used(1));
        assert!(!mm.residency_order().contains(&ids[1]));
        mm.check_accounting().unwrap();

        // freed frame is immediately assignable
        let fresh = mm.create_entry(3);
        mm.assign_free_frame(frame, fresh).unwrap();
        assert_eq!(mm.residency_order(), vec![fresh, ids[0], ids[2]]);
        mm.check_accounting().unwrap();
    }

    #[test]
    fn test_evict_empty() {
        let mm = manager(1, 1);
        assert!(matches!(mm.evict_tail(), Err(Error::NoEvictionCandidate)));
    }

    #[test]
    fn test_slot_reused_across_evictions() {
        let mm = manager(1, 4);
        let id = mm.create_entry(0);
        mm.assign_free_frame(0, id).unwrap();
        mm.evict_tail().unwrap();
        let slot = mm.entry(id).unwrap().backing_slot();
        assert!(slot.is_some());

        mm.assign_free_frame(0, id).unwrap();
        fill(&mm, id, 3);
        mm.evict_tail().unwrap();
        assert_eq!(mm.entry(id).unwrap().backing_slot(), slot);
        assert_eq!(mm.used_slot_count(), 1);
    }

    #[test]
    fn test_out_of_backing_store_keeps_victim() {
        let mm = manager(2, 1);
        let a = mm.create_entry(0);
        let b = mm.create_entry(1);
        mm.assign_free_frame(0, a).unwrap();
        mm.assign_free_frame(1, b).unwrap();
        mm.evict_tail().unwrap();
        mm.assign_free_frame(0, a).unwrap();

        // b needs a slot and the only one belongs to a
        assert!(matches!(mm.evict_tail(), Err(Error::OutOfBackingStore)));
        assert!(mm.entry(b).unwrap().is_valid());
        assert!(mm.is_frame_used(1));
        mm.check_accounting().unwrap();
    }

    #[test]
    fn test_swap_out_data_stages_page() {
        let mm = manager(1, 4);
        let id = mm.create_entry(0);
        let page = [7u8; 16];
        mm.swap_out_data(id, &page).unwrap();

        let entry = mm.entry(id).unwrap();
        assert!(!entry.is_valid());
        assert!(entry.ever_swapped_out());
        assert!(!mm.is_frame_used(0));

        mm.assign_free_frame(0, id).unwrap();
        assert_eq!(mm.read_frame(0), page.to_vec());
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mm = manager(2, 4);
        let a = mm.create_entry(0);
        let b = mm.create_entry(1);
        mm.assign_free_frame(0, a).unwrap();
        mm.assign_free_frame(1, b).unwrap();
        mm.evict_tail().unwrap();
        assert_eq!(mm.used_slot_count(), 1);

        mm.destroy_entry(a);
        mm.destroy_entry(b);
        assert_eq!(mm.free_frame_count(), 2);
        assert_eq!(mm.resident_count(), 0);
        assert_eq!(mm.used_slot_count(), 0);
        assert!(mm.entry(a).is_none());
        mm.check_accounting().unwrap();

        // destroying twice is harmless
        mm.destroy_entry(a);
    }

    #[test]
    fn test_destroy_mid_transfer_defers_release() {
        let mm = manager(2, 4);
        let a = mm.create_entry(0);
        mm.assign_free_frame(0, a).unwrap();
        mm.evict_tail().unwrap();
        mm.assign_free_frame(0, a).unwrap();
        assert_eq!(mm.used_slot_count(), 1);

        // as if an eviction had popped it and was writing it back
        mm.residency.lock().remove(a);
        mm.update_entry(a, |e| e.in_transit = true);
        mm.destroy_entry(a);
        assert!(mm.entry(a).is_some());
        assert!(mm.is_frame_used(0));
        assert_eq!(mm.used_slot_count(), 1);

        // the slot cannot be handed out while the write is outstanding
        let b = mm.create_entry(1);
        assert_ne!(b.index(), a.index());

        assert!(mm.end_transit(a, TranslationEntry::unmap).is_none());
        assert!(mm.entry(a).is_none());
        assert_eq!(mm.used_slot_count(), 0);
        mm.release_frame(0);

        // the freed arena slot comes back under a new generation
        let c = mm.create_entry(2);
        assert_eq!(c.index(), a.index());
        assert!(mm.update_entry(a, |e| e.unmap()).is_none());
        assert_eq!(mm.entry(c).map(|e| e.virtual_page), Some(2));
        mm.check_accounting().unwrap();
    }

    #[test]
    fn test_claim_free_frame_scans_forward() {
        let mm = manager(3, 4);
        assert_eq!(mm.claim_free_frame(1), Some(1));
        assert_eq!(mm.claim_free_frame(1), Some(2));
        assert_eq!(mm.claim_free_frame(1), None);
        assert_eq!(mm.claim_free_frame(0), Some(0));
        assert_eq!(mm.free_frame_count(), 0);
    }

    #[test]
    fn test_check_accounting_detects_unlisted_resident() {
        let mm = manager(2, 4);
        let id = mm.create_entry(0);
        let frame = mm.claim_free_frame(0).unwrap();
        mm.install(frame, id, false).unwrap();
        assert!(matches!(mm.check_accounting(), Err(Error::FrameAccountingViolation(_))));

        mm.publish(id, frame);
        mm.check_accounting().unwrap();
    }
}
