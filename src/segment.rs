use log::debug;

use crate::error::{Error, Result};
use crate::io::OpenFile;
use crate::noff::Segment;

/// Cursor over one executable segment, driven one page at a time.
///
/// Each call to [`SegmentReader::read_one_page`] stands for the next virtual
/// page of the address space, starting from page 0. `virtual_offset` is the
/// segment start relative to the page being materialized; it drops by one page
/// per page walked until the segment begins, then stays 0 while the rest of
/// the segment is copied.
pub struct SegmentReader<'a> {
    file: &'a dyn OpenFile,
    name: &'static str,
    virtual_offset: i64,
    file_offset: usize,
    remaining: usize,
    page_size: usize,
}

impl<'a> SegmentReader<'a> {
    pub fn new(file: &'a dyn OpenFile, segment: Segment, name: &'static str, page_size: usize) -> Self {
        SegmentReader {
            file,
            name,
            virtual_offset: segment.virtual_addr as i64,
            file_offset: segment.in_file_addr as usize,
            remaining: segment.size as usize,
            page_size,
        }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Copy this segment's share of the current page into `dest`.
    /// Returns false when the segment does not touch the page.
    pub fn read_one_page(&mut self, dest: &mut [u8]) -> Result<bool> {
        let page = self.page_size as i64;
        if self.remaining == 0 || self.virtual_offset < 0 || self.virtual_offset >= page {
            self.virtual_offset -= page;
            return Ok(false);
        }

        let start = self.virtual_offset as usize;
        let len = (self.page_size - start).min(self.remaining);
        debug!(
            "read {} bytes at file offset {} into page offset {} ({})",
            len, self.file_offset, start, self.name
        );
        let read = self.file.read_at(&mut dest[start..start + len], self.file_offset)?;
        if read != len {
            return Err(Error::BadExecutableFormat(format!(
                "{} segment truncated: wanted {} bytes at {}, got {}",
                self.name, len, self.file_offset, read
            )));
        }

        // a segment spanning pages continues at the top of the next one
        self.virtual_offset = 0;
        self.remaining -= len;
        self.file_offset += len;
        Ok(true)
    }
}
