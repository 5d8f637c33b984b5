use crate::constants::*;
use crate::error::{Error, Result};

/// Sizes of main memory, the swap disk and the per-process stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryConfig {
    pub page_size: usize,
    pub num_frames: usize,
    pub num_slots: usize,
    pub user_stack_size: usize,
    pub stack_margin: usize,
}

impl MemoryConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_frames(mut self, num_frames: usize) -> Self {
        self.num_frames = num_frames;
        self
    }

    pub fn with_slots(mut self, num_slots: usize) -> Self {
        self.num_slots = num_slots;
        self
    }

    pub fn with_user_stack_size(mut self, user_stack_size: usize) -> Self {
        self.user_stack_size = user_stack_size;
        self
    }

    pub fn with_stack_margin(mut self, stack_margin: usize) -> Self {
        self.stack_margin = stack_margin;
        self
    }

    /// Total bytes of main memory
    #[inline]
    pub fn memory_size(&self) -> usize {
        self.num_frames * self.page_size
    }

    /// Number of pages needed to hold `bytes`
    #[inline]
    pub fn pages_for(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.page_size)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size % 4 != 0 {
            return Err(Error::InvalidConfig(format!(
                "page size {} must be a non-zero multiple of 4",
                self.page_size
            )));
        }
        if self.num_frames == 0 {
            return Err(Error::InvalidConfig("at least one frame is required".into()));
        }
        if self.num_slots == 0 {
            return Err(Error::InvalidConfig("at least one swap slot is required".into()));
        }
        Ok(())
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            page_size: PAGE_SIZE,
            num_frames: NUM_FRAMES,
            num_slots: NUM_SLOTS,
            user_stack_size: USER_STACK_SIZE,
            stack_margin: STACK_MARGIN,
        }
    }
}
