//! An in-memory page source, used for the shadow transaction overlay and
//! for tests that would rather not touch the filesystem.

use std::sync::RwLock;

use crate::error::Result;
use crate::source::{PageSource, WritablePageSource};

pub struct MemorySource {
    page_size: u32,
    pages: RwLock<Vec<u8>>,
}

impl MemorySource {
    pub fn new(page_size: u32, page_count: u32) -> Self {
        Self {
            page_size,
            pages: RwLock::new(vec![0u8; page_size as usize * page_count as usize]),
        }
    }
}

impl PageSource for MemorySource {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        let pages = self.pages.read().expect("memory source lock poisoned");
        (pages.len() / self.page_size as usize) as u32
    }

    /// A page number allocated within an open transaction is visible
    /// through `ShadowSource::page_count` before the base is physically
    /// grown (that only happens at commit, via `set_page_count`), so a
    /// read of such a page must zero-fill rather than index out of
    /// bounds -- the same contract `NullSource` gives for free via its
    /// sparse map.
    fn read_page(&self, page_number: u32, out: &mut [u8]) -> Result<()> {
        let pages = self.pages.read().expect("memory source lock poisoned");
        let start = (page_number as usize - 1) * self.page_size as usize;
        let size = self.page_size as usize;
        if start >= pages.len() {
            out[..size].fill(0);
            return Ok(());
        }
        let end = (start + size).min(pages.len());
        out[..end - start].copy_from_slice(&pages[start..end]);
        out[end - start..size].fill(0);
        Ok(())
    }
}

impl WritablePageSource for MemorySource {
    fn write_page(&self, page_number: u32, data: &[u8]) -> Result<()> {
        let mut pages = self.pages.write().expect("memory source lock poisoned");
        let start = (page_number as usize - 1) * self.page_size as usize;
        let size = self.page_size as usize;
        if start + size > pages.len() {
            pages.resize(start + size, 0);
        }
        pages[start..start + size].copy_from_slice(&data[..size]);
        Ok(())
    }

    fn set_page_count(&self, new_count: u32) -> Result<()> {
        let mut pages = self.pages.write().expect("memory source lock poisoned");
        pages.resize(new_count as usize * self.page_size as usize, 0);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_visible_to_subsequent_reads() {
        let source = MemorySource::new(512, 2);
        let page = vec![7u8; 512];
        source.write_page(1, &page).unwrap();

        let mut out = vec![0u8; 512];
        source.read_page(1, &mut out).unwrap();
        assert_eq!(out, page);
    }

    #[test]
    fn set_page_count_grows_and_zero_fills() {
        let source = MemorySource::new(512, 1);
        source.set_page_count(3).unwrap();
        assert_eq!(source.page_count(), 3);

        let mut out = vec![0xffu8; 512];
        source.read_page(3, &mut out).unwrap();
        assert_eq!(out, vec![0u8; 512]);
    }
}
