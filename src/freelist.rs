//! Freelist trunk/leaf page reclamation.
//!
//! A trunk page stores a pointer to the next trunk (first 4 bytes) followed
//! by up to `(usable - 8) / 4` leaf page numbers. `pop`/`push` operate only
//! on the current trunk, allocating or discarding trunks as they fill or
//! empty -- the same shape as the teacher's b-tree page walks, applied to
//! the freelist's own linked structure instead of the table b-tree.

use zerocopy::big_endian::U32;
use zerocopy::{AsBytes, FromBytes};

use crate::error::{Error, Result};
use crate::source::shadow::ShadowSource;
use crate::source::PageSource;

/// Mutable freelist state for one transaction, backed by a shadow source.
/// Constructed from the header's `(first_trunk_page, leaf_count)` and
/// written back into the header by the caller once the transaction
/// commits.
pub struct FreelistManager<'a, S: ?Sized> {
    source: &'a ShadowSource<'a, S>,
    usable_page_size: u32,
    first_trunk: u32,
    leaf_count: u32,
}

fn max_leaves_per_trunk(usable_page_size: u32) -> usize {
    (usable_page_size as usize - 8) / 4
}

impl<'a, S: PageSource + ?Sized> FreelistManager<'a, S> {
    pub fn new(source: &'a ShadowSource<'a, S>, usable_page_size: u32, first_trunk: u32, leaf_count: u32) -> Self {
        Self {
            source,
            usable_page_size,
            first_trunk,
            leaf_count,
        }
    }

    pub fn first_trunk_page(&self) -> u32 {
        self.first_trunk
    }

    pub fn leaf_count(&self) -> u32 {
        self.leaf_count
    }

    /// Pops a reusable page number from the freelist, or `None` if it is
    /// empty (the caller should then extend the page count instead).
    pub fn pop(&mut self) -> Result<Option<u32>> {
        if self.first_trunk == 0 {
            return Ok(None);
        }

        let trunk = self.read_page(self.first_trunk)?;
        let next_trunk = U32::read_from_prefix(&trunk[0..4]).expect("4 bytes").get();
        let count = U32::read_from_prefix(&trunk[4..8]).expect("4 bytes").get() as usize;

        if count == 0 {
            // Empty trunk: the trunk page itself becomes the allocated
            // page, and the freelist head advances to what it pointed to.
            let reused = self.first_trunk;
            self.first_trunk = next_trunk;
            self.leaf_count = self.leaf_count.saturating_sub(1);
            return Ok(Some(reused));
        }

        let last_leaf_offset = 8 + (count - 1) * 4;
        let leaf = U32::read_from_prefix(&trunk[last_leaf_offset..last_leaf_offset + 4])
            .expect("4 bytes")
            .get();

        let new_count = (count - 1) as u32;
        let mut trunk = trunk;
        U32::new(new_count).write_to_prefix(&mut trunk[4..8]).expect("4 bytes");
        self.write_page(self.first_trunk, &trunk)?;

        self.leaf_count = self.leaf_count.saturating_sub(1);
        Ok(Some(leaf))
    }

    pub fn push(&mut self, page_number: u32) -> Result<()> {
        if self.first_trunk == 0 {
            self.make_new_trunk(page_number, 0)?;
            self.leaf_count += 1;
            return Ok(());
        }

        let mut trunk = self.read_page(self.first_trunk)?;
        let count = U32::read_from_prefix(&trunk[4..8]).expect("4 bytes").get() as usize;

        if count < max_leaves_per_trunk(self.usable_page_size) {
            let offset = 8 + count * 4;
            U32::new(page_number)
                .write_to_prefix(&mut trunk[offset..offset + 4])
                .expect("4 bytes");
            U32::new((count + 1) as u32)
                .write_to_prefix(&mut trunk[4..8])
                .expect("4 bytes");
            self.write_page(self.first_trunk, &trunk)?;
        } else {
            self.make_new_trunk(page_number, self.first_trunk)?;
        }

        self.leaf_count += 1;
        Ok(())
    }

    fn make_new_trunk(&mut self, new_trunk_page: u32, next_trunk: u32) -> Result<()> {
        let mut page = vec![0u8; self.usable_page_size as usize];
        U32::new(next_trunk).write_to_prefix(&mut page[0..4]).expect("4 bytes");
        U32::new(0).write_to_prefix(&mut page[4..8]).expect("4 bytes");
        self.write_page(new_trunk_page, &page)?;
        self.first_trunk = new_trunk_page;
        Ok(())
    }

    fn read_page(&self, page_number: u32) -> Result<Vec<u8>> {
        if page_number == 0 {
            return Err(Error::corrupt(0, "freelist trunk page number is zero"));
        }
        let mut buf = vec![0u8; self.usable_page_size as usize];
        self.source.read_page(page_number, &mut buf)?;
        Ok(buf)
    }

    fn write_page(&self, page_number: u32, data: &[u8]) -> Result<()> {
        self.source.write_page(page_number, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::MemorySource;

    #[test]
    fn push_then_pop_round_trips_a_single_page() {
        let base = MemorySource::new(512, 4);
        let shadow = ShadowSource::new(&base);
        let mut freelist = FreelistManager::new(&shadow, 512, 0, 0);

        freelist.push(4).unwrap();
        assert_eq!(freelist.leaf_count(), 1);
        assert_ne!(freelist.first_trunk_page(), 0);

        let popped = freelist.pop().unwrap();
        assert_eq!(popped, Some(4));
        assert_eq!(freelist.leaf_count(), 0);
    }

    #[test]
    fn trunk_overflow_allocates_a_new_trunk() {
        let base = MemorySource::new(512, 200);
        let shadow = ShadowSource::new(&base);
        let mut freelist = FreelistManager::new(&shadow, 512, 0, 0);

        let capacity = max_leaves_per_trunk(512);
        for page in 2..2 + capacity as u32 {
            freelist.push(page).unwrap();
        }
        let trunk_before = freelist.first_trunk_page();
        freelist.push(2 + capacity as u32).unwrap();
        assert_ne!(freelist.first_trunk_page(), trunk_before);
        assert_eq!(freelist.leaf_count(), capacity as u32 + 1);
    }

    #[test]
    fn pop_on_empty_freelist_returns_none() {
        let base = MemorySource::new(512, 1);
        let shadow = ShadowSource::new(&base);
        let mut freelist = FreelistManager::new(&shadow, 512, 0, 0);
        assert_eq!(freelist.pop().unwrap(), None);
    }
}
