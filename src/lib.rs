pub mod addrspace;
pub mod config;
pub mod constants;
pub mod entry;
pub mod error;
pub mod fault;
pub mod io;
pub mod machine;
pub mod manager;
pub mod memory;
pub mod noff;
pub mod residency;
pub mod sector;
pub mod segment;
pub mod stats;
pub mod translation;

// Re-export commonly used items for convenience
pub use addrspace::{AddressSpace, SpaceState};
pub use config::MemoryConfig;
pub use constants::*;
pub use entry::{EntryFlags, EntryId, TranslationEntry};
pub use error::{Error, Result};
pub use fault::handle_page_fault;
pub use io::{ExecutableStore, HostFileStore, MemFileStore, OpenFile};
pub use machine::Machine;
pub use manager::MemoryManager;
pub use memory::{BackingStore, Disk, FileDisk, FrameId};
pub use noff::{NoffBuilder, NoffHeader, Segment};
pub use sector::SlotId;
pub use stats::StatsSnapshot;
pub use translation::{ExceptionType, PageTable, TranslationResult, VirtualAddress};
