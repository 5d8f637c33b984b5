use std::sync::Arc;

use log::trace;

use crate::entry::{EntryFlags, EntryId};
use crate::manager::MemoryManager;

/// Represents the decomposed components of a virtual address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualAddress {
    pub va: u32,
    pub page: usize,
    pub offset: usize,
}

impl VirtualAddress {
    /// Decompose a raw VA into page number and offset within the page
    pub fn from_raw(va: u32, page_size: usize) -> Self {
        VirtualAddress {
            va,
            page: va as usize / page_size,
            offset: va as usize % page_size,
        }
    }
}

impl std::fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VA({}) = (page={}, offset={})", self.va, self.page, self.offset)
    }
}

/// A flat page table: entry handle per virtual page number.
///
/// Cloning shares the same handles, which is how the table is handed to the
/// machine's page-table register on a context switch.
#[derive(Debug, Clone, Default)]
pub struct PageTable {
    entries: Arc<[EntryId]>,
}

impl PageTable {
    pub fn new(entries: Vec<EntryId>) -> Self {
        PageTable {
            entries: entries.into(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn get(&self, virtual_page: usize) -> Option<EntryId> {
        self.entries.get(virtual_page).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.entries.iter().copied()
    }

    /// True when both tables are the very same table
    pub fn same_as(&self, other: &PageTable) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

/// Exceptions raised by address translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionType {
    /// No valid translation: the page is not resident
    PageFault,
    /// Write to a read-only page
    ReadOnly,
    /// Translation produced a frame beyond main memory
    BusError,
    /// Unaligned access or address beyond the address space
    AddressError,
}

/// Result of an address translation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationResult {
    Success(usize),
    Exception(ExceptionType),
}

impl TranslationResult {
    #[inline]
    pub fn physical_address(&self) -> Option<usize> {
        match self {
            TranslationResult::Success(pa) => Some(*pa),
            TranslationResult::Exception(_) => None,
        }
    }
}

/// Translate a virtual address through `table`.
///
/// On success the entry's use bit (and dirty bit when `writing`) is set and
/// the entry becomes the most recently touched resident page.
pub fn translate(
    mm: &MemoryManager,
    table: &PageTable,
    vaddr: u32,
    size: usize,
    writing: bool,
) -> TranslationResult {
    if (size == 4 && vaddr % 4 != 0) || (size == 2 && vaddr % 2 != 0) {
        return TranslationResult::Exception(ExceptionType::AddressError);
    }

    let page_size = mm.page_size();
    let va = VirtualAddress::from_raw(vaddr, page_size);
    let Some(id) = table.get(va.page) else {
        return TranslationResult::Exception(ExceptionType::AddressError);
    };

    let num_frames = mm.config().num_frames;
    let frame = mm.update_entry(id, |entry| {
        if !entry.is_valid() {
            return Err(ExceptionType::PageFault);
        }
        if writing && entry.is_read_only() {
            return Err(ExceptionType::ReadOnly);
        }
        if entry.physical_frame >= num_frames {
            return Err(ExceptionType::BusError);
        }
        entry.flags.insert(EntryFlags::USE);
        if writing {
            entry.flags.insert(EntryFlags::DIRTY);
        }
        Ok(entry.physical_frame)
    });

    match frame {
        Some(Ok(frame)) => {
            mm.touch(id);
            let pa = frame * page_size + va.offset;
            trace!("{} -> PA {}", va, pa);
            TranslationResult::Success(pa)
        }
        Some(Err(kind)) => TranslationResult::Exception(kind),
        None => TranslationResult::Exception(ExceptionType::AddressError),
    }
}
