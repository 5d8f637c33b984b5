//! Error types for the pager

use thiserror::Error;

use crate::translation::ExceptionType;

#[derive(Error, Debug)]
pub enum Error {
    #[error("executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("bad executable format: {0}")]
    BadExecutableFormat(String),

    #[error("out of backing store")]
    OutOfBackingStore,

    #[error("no resident page to evict")]
    NoEvictionCandidate,

    #[error("frame accounting violation: {0}")]
    FrameAccountingViolation(String),

    #[error("{kind:?} at virtual address {vaddr:#x}")]
    Exception { kind: ExceptionType, vaddr: u32 },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
