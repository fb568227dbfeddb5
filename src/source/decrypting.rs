//! A page source wrapping any [`WritablePageSource`] with a
//! [`PageTransform`], so the b-tree layer sees logical pages while the
//! base source only ever sees whatever the transform produces on disk.
//!
//! The physical page is `transform.transformed_page_size(logical_size)`
//! bytes; for the identity transform that's the logical size itself, and
//! for an authenticated transform it's the logical size plus nonce/tag
//! overhead. `page_size()` reports the logical size, matching what every
//! layer above this one (b-tree, freelist, cursor) expects to operate on.

use crate::error::Result;
use crate::source::{PageSource, WritablePageSource};
use crate::transform::PageTransform;

pub struct DecryptingSource<S, T> {
    base: S,
    transform: T,
    logical_page_size: u32,
}

impl<S, T> DecryptingSource<S, T>
where
    S: PageSource,
    T: PageTransform,
{
    pub fn new(base: S, transform: T, logical_page_size: u32) -> Self {
        Self {
            base,
            transform,
            logical_page_size,
        }
    }

    fn physical_page_size(&self) -> u32 {
        self.transform.transformed_page_size(self.logical_page_size)
    }
}

impl<S, T> PageSource for DecryptingSource<S, T>
where
    S: PageSource,
    T: PageTransform,
{
    fn page_size(&self) -> u32 {
        self.logical_page_size
    }

    fn page_count(&self) -> u32 {
        self.base.page_count()
    }

    fn read_page(&self, page_number: u32, out: &mut [u8]) -> Result<()> {
        let mut raw = vec![0u8; self.physical_page_size() as usize];
        self.base.read_page(page_number, &mut raw)?;
        self.transform.transform_read(page_number, &raw, out)
    }
}

impl<S, T> WritablePageSource for DecryptingSource<S, T>
where
    S: WritablePageSource,
    T: PageTransform,
{
    fn write_page(&self, page_number: u32, data: &[u8]) -> Result<()> {
        let mut raw = vec![0u8; self.physical_page_size() as usize];
        self.transform.transform_write(page_number, data, &mut raw)?;
        self.base.write_page(page_number, &raw)
    }

    fn set_page_count(&self, new_count: u32) -> Result<()> {
        self.base.set_page_count(new_count)
    }

    fn sync(&self) -> Result<()> {
        self.base.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::MemorySource;
    use crate::transform::Identity;

    #[test]
    fn identity_transform_round_trips_through_the_decorator() {
        let base = MemorySource::new(512, 2);
        let source = DecryptingSource::new(base, Identity, 512);

        source.write_page(1, &vec![7u8; 512]).unwrap();
        let mut out = vec![0u8; 512];
        source.read_page(1, &mut out).unwrap();
        assert_eq!(out, vec![7u8; 512]);
    }

    #[test]
    fn page_size_reports_the_logical_size_not_the_physical_one() {
        let base = MemorySource::new(512, 1);
        let source = DecryptingSource::new(base, Identity, 512);
        assert_eq!(source.page_size(), 512);
    }
}
