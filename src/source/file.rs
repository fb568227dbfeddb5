//! The bottom of the page source stack: pages read and written directly on
//! a `std::fs::File` at `(page_number - 1) * page_size` via a plain
//! seek-then-read_exact.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use crate::error::Result;
use crate::source::{PageSource, WritablePageSource};

pub struct FileSource {
    file: Mutex<File>,
    page_size: u32,
    page_count: std::sync::atomic::AtomicU32,
}

impl FileSource {
    pub fn new(file: File, page_size: u32, page_count: u32) -> Self {
        Self {
            file: Mutex::new(file),
            page_size,
            page_count: std::sync::atomic::AtomicU32::new(page_count),
        }
    }

    fn offset(&self, page_number: u32) -> u64 {
        (page_number as u64 - 1) * self.page_size as u64
    }
}

impl PageSource for FileSource {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_count(&self) -> u32 {
        self.page_count.load(std::sync::atomic::Ordering::Acquire)
    }

    /// A page number the mutator just allocated (via `set_page_count`,
    /// which only updates the shadow's in-memory counter -- the file
    /// itself isn't extended with `set_len` until commit) can be read
    /// before it physically exists on disk. Such a read zero-fills rather
    /// than erroring, the same "unwritten page reads as zero" contract
    /// `NullSource` and `MemorySource` give in-memory databases.
    fn read_page(&self, page_number: u32, out: &mut [u8]) -> Result<()> {
        debug_assert_ne!(page_number, 0, "page number must be non-zero");
        let size = self.page_size as usize;
        let mut file = self.file.lock().expect("file source mutex poisoned");
        let offset = self.offset(page_number);
        let file_len = file.seek(SeekFrom::End(0))?;
        if offset >= file_len {
            out[..size].fill(0);
            return Ok(());
        }
        file.seek(SeekFrom::Start(offset))?;
        let available = ((file_len - offset) as usize).min(size);
        file.read_exact(&mut out[..available])?;
        if available < size {
            out[available..size].fill(0);
        }
        Ok(())
    }
}

impl WritablePageSource for FileSource {
    fn write_page(&self, page_number: u32, data: &[u8]) -> Result<()> {
        let mut file = self.file.lock().expect("file source mutex poisoned");
        file.seek(SeekFrom::Start(self.offset(page_number)))?;
        file.write_all(&data[..self.page_size as usize])?;
        Ok(())
    }

    fn set_page_count(&self, new_count: u32) -> Result<()> {
        let mut file = self.file.lock().expect("file source mutex poisoned");
        file.set_len(new_count as u64 * self.page_size as u64)?;
        self.page_count.store(new_count, std::sync::atomic::Ordering::Release);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let file = self.file.lock().expect("file source mutex poisoned");
        file.sync_data()?;
        Ok(())
    }
}
