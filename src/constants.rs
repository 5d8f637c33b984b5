/// Bytes per page. Matches the disk sector size so one page fits one slot.
pub const PAGE_SIZE: usize = 128;
/// Frames of main memory shared by every address space.
pub const NUM_FRAMES: usize = 32;
pub const MEMORY_SIZE: usize = NUM_FRAMES * PAGE_SIZE;

/// Page-sized slots on the swap disk.
pub const NUM_SLOTS: usize = 1024;

/// Stack reserved past the end of the program's segments.
pub const USER_STACK_SIZE: usize = 1024;
/// Initial stack pointer sits this far below the top of the address space.
pub const STACK_MARGIN: usize = 16;

pub const STACK_REG: usize = 29;
pub const PC_REG: usize = 34;
pub const NEXT_PC_REG: usize = 35;
pub const BAD_VADDR_REG: usize = 39;
pub const NUM_TOTAL_REGS: usize = 40;

/// First instruction of every program.
pub const ENTRY_POINT: i32 = 0;
/// Branch delay slot: next PC trails the entry point by one instruction.
pub const INSTRUCTION_SIZE: i32 = 4;

pub const NOFF_MAGIC: u32 = 0x00ba_dfad;
/// magic + 3 segments * 3 words
pub const NOFF_HEADER_SIZE: usize = 40;
