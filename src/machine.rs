//! The slice of the CPU emulator the pager talks to: the register file, the
//! page-table register and translated memory access.

use std::sync::Arc;

use log::trace;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::fault::handle_page_fault;
use crate::manager::MemoryManager;
use crate::translation::{ExceptionType, PageTable, TranslationResult, VirtualAddress, translate};

pub struct Machine {
    mm: Arc<MemoryManager>,
    registers: [i32; NUM_TOTAL_REGS],
    page_table: Option<PageTable>,
}

impl Machine {
    pub fn new(mm: Arc<MemoryManager>) -> Self {
        Machine {
            mm,
            registers: [0; NUM_TOTAL_REGS],
            page_table: None,
        }
    }

    #[inline]
    pub fn memory_manager(&self) -> &Arc<MemoryManager> {
        &self.mm
    }

    #[inline]
    pub fn read_register(&self, index: usize) -> i32 {
        self.registers[index]
    }

    #[inline]
    pub fn write_register(&mut self, index: usize, value: i32) {
        self.registers[index] = value;
    }

    pub fn registers(&self) -> &[i32; NUM_TOTAL_REGS] {
        &self.registers
    }

    /// Table the machine currently translates through
    pub fn page_table(&self) -> Option<&PageTable> {
        self.page_table.as_ref()
    }

    pub fn page_table_size(&self) -> usize {
        self.page_table.as_ref().map_or(0, PageTable::len)
    }

    pub fn set_page_table(&mut self, table: Option<PageTable>) {
        self.page_table = table;
    }

    pub fn translate(&self, vaddr: u32, size: usize, writing: bool) -> TranslationResult {
        match &self.page_table {
            Some(table) => translate(&self.mm, table, vaddr, size, writing),
            None => TranslationResult::Exception(ExceptionType::AddressError),
        }
    }

    /// Read 1, 2 or 4 bytes of user memory, servicing page faults on the way
    pub fn read_mem(&mut self, vaddr: u32, size: usize) -> Result<u32> {
        let pa = self.resolve(vaddr, size, false)?;
        let value = self.mm.with_memory(|memory| {
            let bytes = &memory.data()[pa..pa + size];
            match size {
                1 => bytes[0] as u32,
                2 => u16::from_le_bytes([bytes[0], bytes[1]]) as u32,
                _ => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            }
        });
        trace!("read_mem {:#x}/{} = {:#x}", vaddr, size, value);
        Ok(value)
    }

    /// Write 1, 2 or 4 bytes of user memory, servicing page faults on the way
    pub fn write_mem(&mut self, vaddr: u32, size: usize, value: u32) -> Result<()> {
        let pa = self.resolve(vaddr, size, true)?;
        self.mm.with_memory(|memory| {
            let bytes = &mut memory.data_mut()[pa..pa + size];
            match size {
                1 => bytes[0] = value as u8,
                2 => bytes.copy_from_slice(&(value as u16).to_le_bytes()),
                _ => bytes.copy_from_slice(&value.to_le_bytes()),
            }
        });
        trace!("write_mem {:#x}/{} = {:#x}", vaddr, size, value);
        Ok(())
    }

    /// Translate, retrying after each page fault until the page is resident
    fn resolve(&mut self, vaddr: u32, size: usize, writing: bool) -> Result<usize> {
        assert!(matches!(size, 1 | 2 | 4), "unsupported access size {}", size);
        loop {
            match self.translate(vaddr, size, writing) {
                TranslationResult::Success(pa) => return Ok(pa),
                TranslationResult::Exception(ExceptionType::PageFault) => {
                    self.registers[BAD_VADDR_REG] = vaddr as i32;
                    let page = VirtualAddress::from_raw(vaddr, self.mm.page_size()).page;
                    let table = self.page_table.clone().ok_or(Error::Exception {
                        kind: ExceptionType::AddressError,
                        vaddr,
                    })?;
                    handle_page_fault(&self.mm, &table, page)?;
                }
                TranslationResult::Exception(kind) => {
                    self.registers[BAD_VADDR_REG] = vaddr as i32;
                    return Err(Error::Exception { kind, vaddr });
                }
            }
        }
    }
}
