//! The copy-on-write overlay a transaction writes through.
//!
//! While a transaction is open, every mutator call goes through a
//! `ShadowSource` wrapping the real (possibly cached) source: reads fall
//! through to the base for any page not yet touched, and writes land only
//! in the shadow's overlay map until `drain_dirty_pages` is called by the
//! commit path. Rollback is simply dropping the shadow.
//!
//! `reset` lets a shadow be reused across transactions (pooled by
//! `Database`) rather than reallocating its overlay map each time.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::Result;
use crate::source::PageSource;

pub struct ShadowSource<'a, S: ?Sized> {
    base: &'a S,
    overlay: Mutex<BTreeMap<u32, Box<[u8]>>>,
    page_count: std::sync::atomic::AtomicU32,
}

impl<'a, S: PageSource + ?Sized> ShadowSource<'a, S> {
    pub fn new(base: &'a S) -> Self {
        let page_count = base.page_count();
        Self {
            base,
            overlay: Mutex::new(BTreeMap::new()),
            page_count: std::sync::atomic::AtomicU32::new(page_count),
        }
    }

    /// Clears any pending writes so the shadow can be handed to the next
    /// transaction, re-synchronising its page count with the base source.
    pub fn reset(&self) {
        self.overlay.lock().expect("shadow mutex poisoned").clear();
        self.page_count
            .store(self.base.page_count(), std::sync::atomic::Ordering::Release);
    }

    pub fn write_page(&self, page_number: u32, data: &[u8]) -> Result<()> {
        let mut overlay = self.overlay.lock().expect("shadow mutex poisoned");
        overlay.insert(page_number, data.to_vec().into_boxed_slice());
        Ok(())
    }

    pub fn set_page_count(&self, new_count: u32) {
        self.page_count.store(new_count, std::sync::atomic::Ordering::Release);
    }

    /// Returns the dirty pages in ascending page-number order, the order
    /// the commit path must flush them in so a crash mid-flush never
    /// leaves a higher page number written without its lower dependents.
    pub fn drain_dirty_pages(&self) -> Vec<(u32, Box<[u8]>)> {
        let mut overlay = self.overlay.lock().expect("shadow mutex poisoned");
        std::mem::take(&mut *overlay).into_iter().collect()
    }

    /// Page numbers currently dirty, without consuming them -- the commit
    /// path needs this to read pre-images from the base source before
    /// `drain_dirty_pages` hands back the new contents for the journal and
    /// the flush.
    pub fn dirty_page_numbers(&self) -> Vec<u32> {
        self.overlay.lock().expect("shadow mutex poisoned").keys().copied().collect()
    }

    pub fn is_dirty(&self, page_number: u32) -> bool {
        self.overlay
            .lock()
            .expect("shadow mutex poisoned")
            .contains_key(&page_number)
    }
}

impl<'a, S: PageSource + ?Sized> PageSource for ShadowSource<'a, S> {
    fn page_size(&self) -> u32 {
        self.base.page_size()
    }

    fn page_count(&self) -> u32 {
        self.page_count.load(std::sync::atomic::Ordering::Acquire)
    }

    fn read_page(&self, page_number: u32, out: &mut [u8]) -> Result<()> {
        let overlay = self.overlay.lock().expect("shadow mutex poisoned");
        if let Some(page) = overlay.get(&page_number) {
            out[..page.len()].copy_from_slice(page);
            return Ok(());
        }
        drop(overlay);
        self.base.read_page(page_number, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::MemorySource;

    #[test]
    fn uncommitted_writes_are_invisible_to_the_base_source() {
        let base = MemorySource::new(512, 2);
        let shadow = ShadowSource::new(&base);
        shadow.write_page(1, &vec![5u8; 512]).unwrap();

        let mut base_out = vec![0u8; 512];
        base.read_page(1, &mut base_out).unwrap();
        assert_eq!(base_out, vec![0u8; 512]);

        let mut shadow_out = vec![0u8; 512];
        shadow.read_page(1, &mut shadow_out).unwrap();
        assert_eq!(shadow_out, vec![5u8; 512]);
    }

    #[test]
    fn drain_returns_pages_in_ascending_order() {
        let base = MemorySource::new(512, 3);
        let shadow = ShadowSource::new(&base);
        shadow.write_page(3, &vec![3u8; 512]).unwrap();
        shadow.write_page(1, &vec![1u8; 512]).unwrap();
        shadow.write_page(2, &vec![2u8; 512]).unwrap();

        let drained = shadow.drain_dirty_pages();
        let numbers: Vec<u32> = drained.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn dirty_page_numbers_does_not_consume_the_overlay() {
        let base = MemorySource::new(512, 2);
        let shadow = ShadowSource::new(&base);
        shadow.write_page(2, &vec![2u8; 512]).unwrap();
        assert_eq!(shadow.dirty_page_numbers(), vec![2]);
        assert!(shadow.is_dirty(2));
    }

    #[test]
    fn reset_clears_overlay_for_reuse() {
        let base = MemorySource::new(512, 1);
        let shadow = ShadowSource::new(&base);
        shadow.write_page(1, &vec![9u8; 512]).unwrap();
        shadow.reset();
        assert!(!shadow.is_dirty(1));
    }
}
