//! NOFF executable header.
//!
//! A fixed 40-byte record: the magic word followed by three segment
//! descriptors (code, initialized data, uninitialized data), each
//! `virtual_addr, in_file_addr, size`. Files are written little-endian; a
//! header whose magic only matches once byte-swapped is swapped field by
//! field.

use log::debug;

use crate::constants::{NOFF_HEADER_SIZE, NOFF_MAGIC};
use crate::error::{Error, Result};
use crate::io::OpenFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn read_word(self, bytes: &[u8]) -> u32 {
        let word = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self {
            ByteOrder::Little => u32::from_le_bytes(word),
            ByteOrder::Big => u32::from_be_bytes(word),
        }
    }

    fn write_word(self, value: u32) -> [u8; 4] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }
}

/// Placement of one segment in the address space and in the file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Segment {
    pub virtual_addr: u32,
    pub in_file_addr: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoffHeader {
    pub code: Segment,
    pub init_data: Segment,
    pub uninit_data: Segment,
    /// Byte order the header was stored in
    pub order: ByteOrder,
}

impl NoffHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < NOFF_HEADER_SIZE {
            return Err(Error::BadExecutableFormat(format!(
                "header is {} bytes, expected {}",
                bytes.len(),
                NOFF_HEADER_SIZE
            )));
        }

        let order = if ByteOrder::Little.read_word(bytes) == NOFF_MAGIC {
            ByteOrder::Little
        } else if ByteOrder::Big.read_word(bytes) == NOFF_MAGIC {
            debug!("NOFF header stored big-endian, swapping");
            ByteOrder::Big
        } else {
            return Err(Error::BadExecutableFormat(format!(
                "bad magic {:#010x}",
                ByteOrder::Little.read_word(bytes)
            )));
        };

        let segment = |index: usize| {
            let base = 4 + index * 12;
            Segment {
                virtual_addr: order.read_word(&bytes[base..]),
                in_file_addr: order.read_word(&bytes[base + 4..]),
                size: order.read_word(&bytes[base + 8..]),
            }
        };

        Ok(NoffHeader {
            code: segment(0),
            init_data: segment(1),
            uninit_data: segment(2),
            order,
        })
    }

    pub fn read_from(file: &dyn OpenFile) -> Result<Self> {
        let mut bytes = [0u8; NOFF_HEADER_SIZE];
        let read = file.read_at(&mut bytes, 0)?;
        Self::parse(&bytes[..read])
    }

    pub fn encode(&self) -> [u8; NOFF_HEADER_SIZE] {
        let mut bytes = [0u8; NOFF_HEADER_SIZE];
        let words = [
            NOFF_MAGIC,
            self.code.virtual_addr,
            self.code.in_file_addr,
            self.code.size,
            self.init_data.virtual_addr,
            self.init_data.in_file_addr,
            self.init_data.size,
            self.uninit_data.virtual_addr,
            self.uninit_data.in_file_addr,
            self.uninit_data.size,
        ];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&self.order.write_word(word));
        }
        bytes
    }

    /// Bytes of address space taken by the three segments
    pub fn segments_size(&self) -> usize {
        self.code.size as usize + self.init_data.size as usize + self.uninit_data.size as usize
    }
}

/// Assembles a NOFF image with segments laid out back to back from virtual
/// address 0, contents placed right after the header.
#[derive(Debug, Clone)]
pub struct NoffBuilder {
    code: Vec<u8>,
    init_data: Vec<u8>,
    uninit_size: u32,
    order: ByteOrder,
}

impl NoffBuilder {
    pub fn new() -> Self {
        NoffBuilder {
            code: Vec::new(),
            init_data: Vec::new(),
            uninit_size: 0,
            order: ByteOrder::Little,
        }
    }

    pub fn code(mut self, code: impl Into<Vec<u8>>) -> Self {
        self.code = code.into();
        self
    }

    pub fn init_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.init_data = data.into();
        self
    }

    pub fn uninit_data(mut self, size: u32) -> Self {
        self.uninit_size = size;
        self
    }

    pub fn byte_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    pub fn header(&self) -> NoffHeader {
        let code_len = self.code.len() as u32;
        let init_len = self.init_data.len() as u32;
        let contents = NOFF_HEADER_SIZE as u32;
        NoffHeader {
            code: Segment {
                virtual_addr: 0,
                in_file_addr: contents,
                size: code_len,
            },
            init_data: Segment {
                virtual_addr: code_len,
                in_file_addr: contents + code_len,
                size: init_len,
            },
            uninit_data: Segment {
                virtual_addr: code_len + init_len,
                in_file_addr: 0,
                size: self.uninit_size,
            },
            order: self.order,
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let mut image = self.header().encode().to_vec();
        image.extend_from_slice(&self.code);
        image.extend_from_slice(&self.init_data);
        image
    }
}

impl Default for NoffBuilder {
    fn default() -> Self {
        Self::new()
    }
}
