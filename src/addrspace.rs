//! Address spaces of user programs.
//!
//! An address space owns one flat page table. Frames, swap slots, the
//! residency list and the entries themselves belong to the shared
//! [`MemoryManager`].

use std::sync::Arc;

use log::{debug, info, warn};

use crate::constants::*;
use crate::error::{Error, Result};
use crate::io::ExecutableStore;
use crate::machine::Machine;
use crate::manager::MemoryManager;
use crate::noff::NoffHeader;
use crate::segment::SegmentReader;
use crate::translation::PageTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceState {
    Created,
    Loading,
    /// Loaded, not on the machine
    Ready,
    /// Its page table is in the machine's page-table register
    Running,
    /// The last load failed; the space cannot run
    Failed,
}

pub struct AddressSpace {
    mm: Arc<MemoryManager>,
    page_table: PageTable,
    state: SpaceState,
}

impl AddressSpace {
    pub fn new(mm: Arc<MemoryManager>) -> Self {
        AddressSpace {
            mm,
            page_table: PageTable::default(),
            state: SpaceState::Created,
        }
    }

    #[inline]
    pub fn state(&self) -> SpaceState {
        self.state
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    #[inline]
    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn memory_manager(&self) -> &Arc<MemoryManager> {
        &self.mm
    }

    /// Virtual pages currently backed by a frame
    pub fn resident_pages(&self) -> Vec<usize> {
        self.page_table
            .iter()
            .filter_map(|id| self.mm.entry(id))
            .filter(|entry| entry.is_valid())
            .map(|entry| entry.virtual_page)
            .collect()
    }

    /// Load `name`, set up the registers and install the page table on the
    /// machine. Running the instructions is the emulator's business.
    pub fn execute(&mut self, store: &dyn ExecutableStore, name: &str, machine: &mut Machine) -> Result<()> {
        self.load(store, name)?;
        self.init_registers(machine)?;
        self.restore_state(machine);
        Ok(())
    }

    /// Load a NOFF executable into a fresh page table.
    ///
    /// Pages get frames while free ones remain; the rest are born evicted,
    /// their initial content staged straight to swap.
    pub fn load(&mut self, store: &dyn ExecutableStore, name: &str) -> Result<()> {
        self.state = SpaceState::Loading;
        match self.try_load(store, name) {
            Ok(()) => {
                self.state = SpaceState::Ready;
                Ok(())
            }
            Err(err) => {
                warn!("loading {} failed: {}", name, err);
                self.release_table();
                self.state = SpaceState::Failed;
                Err(err)
            }
        }
    }

    fn try_load(&mut self, store: &dyn ExecutableStore, name: &str) -> Result<()> {
        let executable = store.open(name)?;
        let header = NoffHeader::read_from(&*executable)?;

        let config = *self.mm.config();
        let size = header.segments_size() + config.user_stack_size;
        let num_pages = config.pages_for(size);
        debug!("{}: {} pages, {} bytes", name, num_pages, num_pages * config.page_size);
        debug!("code segment: {:?}", header.code);
        debug!("init data segment: {:?}", header.init_data);

        let space_size = num_pages * config.page_size;
        let segments = [
            ("code", header.code),
            ("initData", header.init_data),
            ("uninitData", header.uninit_data),
        ];
        for (kind, segment) in segments {
            let end = segment.virtual_addr as usize + segment.size as usize;
            if segment.size > 0 && end > space_size {
                return Err(Error::BadExecutableFormat(format!(
                    "{} segment ends at {:#x}, past the {:#x}-byte address space",
                    kind, end, space_size
                )));
            }
        }
        if i32::try_from(space_size).is_err() {
            return Err(Error::BadExecutableFormat(format!(
                "address space of {} bytes does not fit the stack register",
                space_size
            )));
        }

        // a second load must not leak the first table
        self.release_table();

        let available = self.mm.free_frame_count() + (config.num_slots - self.mm.used_slot_count());
        if num_pages > available {
            debug!("{} needs {} pages, {} frames and slots left", name, num_pages, available);
            return Err(Error::OutOfBackingStore);
        }
        let ids: Vec<_> = (0..num_pages).map(|vpn| self.mm.create_entry(vpn)).collect();
        self.page_table = PageTable::new(ids);

        // first pass: frames for as many pages as possible
        let mut scan = 0;
        let mut frames = vec![None; num_pages];
        for (vpn, id) in self.page_table.iter().enumerate() {
            let Some(frame) = self.mm.claim_free_frame(scan) else {
                scan = config.num_frames;
                continue;
            };
            scan = frame;
            self.mm.install(frame, id, false)?;
            frames[vpn] = Some(frame);
        }

        // second pass: page contents
        let mut code = SegmentReader::new(&*executable, header.code, "code", config.page_size);
        let mut init_data = SegmentReader::new(&*executable, header.init_data, "initData", config.page_size);
        let mut page = vec![0u8; config.page_size];
        for (vpn, id) in self.page_table.iter().enumerate() {
            match frames[vpn] {
                Some(frame) => page.copy_from_slice(&self.mm.read_frame(frame)),
                None => page.fill(0),
            }

            code.read_one_page(&mut page)?;
            init_data.read_one_page(&mut page)?;

            match frames[vpn] {
                Some(frame) => {
                    self.mm.write_frame(frame, &page);
                    self.mm.publish(id, frame);
                }
                None => self.mm.swap_out_data(id, &page)?,
            }
        }

        let resident = frames.iter().flatten().count();
        info!("loaded {}: {} of {} pages resident", name, resident, num_pages);
        Ok(())
    }

    /// Give every entry of the current table back to the memory manager
    fn release_table(&mut self) {
        for id in self.page_table.iter() {
            self.mm.destroy_entry(id);
        }
        self.page_table = PageTable::default();
    }

    /// Zero the registers, start at the entry point, put the stack at the top
    /// of the address space.
    pub fn init_registers(&self, machine: &mut Machine) -> Result<()> {
        for index in 0..NUM_TOTAL_REGS {
            machine.write_register(index, 0);
        }

        machine.write_register(PC_REG, ENTRY_POINT);
        machine.write_register(NEXT_PC_REG, ENTRY_POINT + INSTRUCTION_SIZE);

        let config = self.mm.config();
        let sp = (self.page_count() * config.page_size).saturating_sub(config.stack_margin);
        let sp = i32::try_from(sp).map_err(|_| {
            Error::BadExecutableFormat(format!("stack pointer {} does not fit a register", sp))
        })?;
        machine.write_register(STACK_REG, sp);
        debug!("initializing stack pointer: {}", sp);
        Ok(())
    }

    /// Pull the page-table register back from the machine when switching away
    pub fn save_state(&mut self, machine: &Machine) {
        if self.state != SpaceState::Running {
            warn!("saving an address space that is not running ({:?})", self.state);
            return;
        }
        if let Some(table) = machine.page_table() {
            self.page_table = table.clone();
        }
        self.state = SpaceState::Ready;
    }

    /// Point the machine at this address space's page table
    pub fn restore_state(&mut self, machine: &mut Machine) {
        if matches!(self.state, SpaceState::Failed | SpaceState::Created | SpaceState::Loading) {
            warn!("restoring an address space that cannot run ({:?})", self.state);
            return;
        }
        machine.set_page_table(Some(self.page_table.clone()));
        self.state = SpaceState::Running;
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        self.release_table();
    }
}
