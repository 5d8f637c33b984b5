//! Slot allocator for the swap disk.
//!
//! One bit per slot. `acquire` scans forward from a cached hint and wraps,
//! which keeps allocation amortized O(1) while the disk fills up in order.

use crate::error::{Error, Result};

pub type SlotId = usize;

const WORD_BITS: usize = u64::BITS as usize;

pub struct SectorAllocator {
    bits: Vec<u64>,
    capacity: usize,
    used: usize,
    /// Where the next scan starts
    hint: usize,
}

impl SectorAllocator {
    pub fn new(capacity: usize) -> Self {
        SectorAllocator {
            bits: vec![0; capacity.div_ceil(WORD_BITS)],
            capacity,
            used: 0,
            hint: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn used_count(&self) -> usize {
        self.used
    }

    #[inline]
    pub fn is_used(&self, slot: SlotId) -> bool {
        assert!(slot < self.capacity, "slot {} out of range", slot);
        self.bits[slot / WORD_BITS] & (1 << (slot % WORD_BITS)) != 0
    }

    /// Take the first free slot at or after the hint, wrapping around once.
    pub fn acquire(&mut self) -> Result<SlotId> {
        if self.used == self.capacity {
            return Err(Error::OutOfBackingStore);
        }

        let start = self.hint;
        let slot = (start..self.capacity)
            .chain(0..start)
            .find(|&slot| !self.is_used(slot))
            .ok_or(Error::OutOfBackingStore)?;

        self.bits[slot / WORD_BITS] |= 1 << (slot % WORD_BITS);
        self.used += 1;
        self.hint = (slot + 1) % self.capacity;
        Ok(slot)
    }

    pub fn release(&mut self, slot: SlotId) {
        assert!(self.is_used(slot), "frame accounting violation: slot {} released twice", slot);

        self.bits[slot / WORD_BITS] &= !(1 << (slot % WORD_BITS));
        self.used -= 1;
        if slot < self.hint {
            self.hint = slot;
        }
    }
}
