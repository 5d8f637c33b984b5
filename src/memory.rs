use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use spin::Mutex;

use crate::error::{Error, Result};
use crate::sector::SlotId;

pub type FrameId = usize;

/// Main memory: `num_frames` page-sized frames laid out back to back.
pub struct PhysicalMemory {
    data: Box<[u8]>,
    page_size: usize,
}

impl PhysicalMemory {
    /// Create a new physical memory initialized to all zeros
    pub fn new(num_frames: usize, page_size: usize) -> Self {
        PhysicalMemory {
            data: vec![0u8; num_frames * page_size].into_boxed_slice(),
            page_size,
        }
    }

    #[inline]
    pub fn num_frames(&self) -> usize {
        self.data.len() / self.page_size
    }

    #[inline]
    pub fn read(&self, address: usize) -> u8 {
        self.data[address]
    }

    #[inline]
    pub fn write(&mut self, address: usize, value: u8) {
        self.data[address] = value;
    }

    /// Calculate the starting address of a frame
    #[inline]
    pub fn frame_to_address(&self, frame: FrameId) -> usize {
        frame * self.page_size
    }

    pub fn frame(&self, frame: FrameId) -> &[u8] {
        let start = self.frame_to_address(frame);
        &self.data[start..start + self.page_size]
    }

    pub fn frame_mut(&mut self, frame: FrameId) -> &mut [u8] {
        let start = self.frame_to_address(frame);
        &mut self.data[start..start + self.page_size]
    }

    pub fn zero_frame(&mut self, frame: FrameId) {
        self.frame_mut(frame).fill(0);
    }

    /// Get direct access to the underlying bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Tracks which frames are assigned to a translation entry
pub struct FramePool {
    used: Vec<bool>,
    used_count: usize,
}

impl FramePool {
    pub fn new(num_frames: usize) -> Self {
        FramePool {
            used: vec![false; num_frames],
            used_count: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.used.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    #[inline]
    pub fn is_used(&self, frame: FrameId) -> bool {
        assert!(frame < self.used.len(), "frame {} out of range", frame);
        self.used[frame]
    }

    #[inline]
    pub fn used_count(&self) -> usize {
        self.used_count
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.used.len() - self.used_count
    }

    /// First unused frame at or after `start`, without wrapping
    pub fn find_free_from(&self, start: FrameId) -> Option<FrameId> {
        (start..self.used.len()).find(|&frame| !self.used[frame])
    }

    pub fn mark_used(&mut self, frame: FrameId) {
        assert!(
            !self.is_used(frame),
            "frame accounting violation: frame {} assigned twice",
            frame
        );
        self.used[frame] = true;
        self.used_count += 1;
    }

    pub fn mark_free(&mut self, frame: FrameId) {
        assert!(
            self.is_used(frame),
            "frame accounting violation: frame {} freed twice",
            frame
        );
        self.used[frame] = false;
        self.used_count -= 1;
    }
}

/// Swap disk: page-sized slots, blocking reads and writes.
///
/// Callers never hold a lock of the memory manager across these calls, so an
/// implementation is free to block for as long as the simulated I/O takes.
pub trait BackingStore: Send + Sync {
    fn slot_count(&self) -> usize;

    fn page_size(&self) -> usize;

    fn write_slot(&self, slot: SlotId, page: &[u8]) -> Result<()>;

    fn read_slot(&self, slot: SlotId, page: &mut [u8]) -> Result<()>;
}

fn check_slot(slot: SlotId, slots: usize, len: usize, page_size: usize) -> Result<()> {
    if slot >= slots {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("slot {} beyond disk of {} slots", slot, slots),
        )));
    }
    if len != page_size {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("transfer of {} bytes, slot holds {}", len, page_size),
        )));
    }
    Ok(())
}

/// Swap disk kept in memory
pub struct Disk {
    data: Mutex<Vec<u8>>,
    slots: usize,
    page_size: usize,
}

impl Disk {
    /// Create a new disk initialized to all zeros
    pub fn new(slots: usize, page_size: usize) -> Self {
        Disk {
            data: Mutex::new(vec![0u8; slots * page_size]),
            slots,
            page_size,
        }
    }

    /// Raw copy of one slot, bypassing the block interface
    pub fn slot(&self, slot: SlotId) -> Vec<u8> {
        let start = slot * self.page_size;
        self.data.lock()[start..start + self.page_size].to_vec()
    }
}

impl BackingStore for Disk {
    fn slot_count(&self) -> usize {
        self.slots
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn write_slot(&self, slot: SlotId, page: &[u8]) -> Result<()> {
        check_slot(slot, self.slots, page.len(), self.page_size)?;
        let start = slot * self.page_size;
        self.data.lock()[start..start + self.page_size].copy_from_slice(page);
        Ok(())
    }

    fn read_slot(&self, slot: SlotId, page: &mut [u8]) -> Result<()> {
        check_slot(slot, self.slots, page.len(), self.page_size)?;
        let start = slot * self.page_size;
        page.copy_from_slice(&self.data.lock()[start..start + self.page_size]);
        Ok(())
    }
}

/// Swap disk backed by a host file, one slot per `page_size` bytes
pub struct FileDisk {
    file: Mutex<File>,
    slots: usize,
    page_size: usize,
}

impl FileDisk {
    /// Open or create `path`, sized to hold every slot
    pub fn open<P: AsRef<Path>>(path: P, slots: usize, page_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        file.set_len((slots * page_size) as u64)?;
        Ok(FileDisk {
            file: Mutex::new(file),
            slots,
            page_size,
        })
    }
}

impl BackingStore for FileDisk {
    fn slot_count(&self) -> usize {
        self.slots
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn write_slot(&self, slot: SlotId, page: &[u8]) -> Result<()> {
        check_slot(slot, self.slots, page.len(), self.page_size)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start((slot * self.page_size) as u64))?;
        file.write_all(page)?;
        Ok(())
    }

    fn read_slot(&self, slot: SlotId, page: &mut [u8]) -> Result<()> {
        check_slot(slot, self.slots, page.len(), self.page_size)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start((slot * self.page_size) as u64))?;
        file.read_exact(page)?;
        Ok(())
    }
}
