//! Page-fault service.
//!
//! A fault takes a free frame if one exists, otherwise it evicts the least
//! recently touched page of any address space, then brings the faulting page
//! in and makes it the most recently touched.

use log::debug;

use crate::error::{Error, Result};
use crate::manager::MemoryManager;
use crate::memory::FrameId;
use crate::translation::{ExceptionType, PageTable};

pub fn handle_page_fault(mm: &MemoryManager, table: &PageTable, virtual_page: usize) -> Result<FrameId> {
    mm.counters().record_page_fault();

    let id = table.get(virtual_page).ok_or(Error::Exception {
        kind: ExceptionType::AddressError,
        vaddr: (virtual_page * mm.page_size()) as u32,
    })?;
    let entry = mm.entry(id).ok_or(Error::Exception {
        kind: ExceptionType::AddressError,
        vaddr: (virtual_page * mm.page_size()) as u32,
    })?;
    if entry.is_valid() {
        return Ok(entry.physical_frame);
    }

    // the reclaimed frame stays marked used, so nobody can take it before
    // the faulting page is installed
    let frame = match mm.claim_free_frame(0) {
        Some(frame) => frame,
        None => mm.reclaim_frame()?,
    };
    debug!("page fault on virtual page {} serviced by frame {}", virtual_page, frame);

    if mm.install(frame, id, true)? {
        mm.publish(id, frame);
    }
    Ok(frame)
}
