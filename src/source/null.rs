//! A sparse, zero-filled in-memory page source.
//!
//! Unlike [`crate::source::memory::MemorySource`]'s contiguous `Vec<u8>`,
//! pages here are only materialized once written -- any page not yet
//! touched reads back as zeroes without ever being allocated, a
//! `BTreeMap<u32, ArcBuf>` cache generalized into its own `PageSource` so
//! `Database::create_in_memory` and tests can stand up a fresh database
//! with no file and no pre-sized buffer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use crate::error::Result;
use crate::source::{PageSource, WritablePageSource};

pub struct NullSource {
    page_size: u32,
    pages: RwLock<BTreeMap<u32, Box<[u8]>>>,
    page_count: AtomicU32,
}

impl NullSource {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            pages: RwLock::new(BTreeMap::new()),
            page_count: AtomicU32::new(0),
        }
    }
}

impl PageSource for NullSource {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        self.page_count.load(Ordering::Acquire)
    }

    fn read_page(&self, page_number: u32, out: &mut [u8]) -> Result<()> {
        let pages = self.pages.read().expect("null source lock poisoned");
        let size = self.page_size as usize;
        match pages.get(&page_number) {
            Some(page) => out[..size].copy_from_slice(page),
            None => out[..size].fill(0),
        }
        Ok(())
    }
}

impl WritablePageSource for NullSource {
    fn write_page(&self, page_number: u32, data: &[u8]) -> Result<()> {
        let size = self.page_size as usize;
        let mut pages = self.pages.write().expect("null source lock poisoned");
        pages.insert(page_number, data[..size].to_vec().into_boxed_slice());
        Ok(())
    }

    fn set_page_count(&self, new_count: u32) -> Result<()> {
        self.page_count.store(new_count, Ordering::Release);
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
    fn untouched_pages_read_back_as_zero() {
        let source = NullSource::new(64);
        source.set_page_count(3).unwrap();
        let mut out = vec![0xffu8; 64];
        source.read_page(2, &mut out).unwrap();
        assert_eq!(out, vec![0u8; 64]);
    }

    #[test]
    fn writes_are_visible_without_pre_allocating_every_page() {
        let source = NullSource::new(64);
        source.write_page(5, &vec![9u8; 64]).unwrap();
        let mut out = vec![0u8; 64];
        source.read_page(5, &mut out).unwrap();
        assert_eq!(out, vec![9u8; 64]);
    }
}
