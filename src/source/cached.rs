//! An LRU page cache wrapping any `PageSource`/`WritablePageSource`.
//!
//! Writes go straight through to the inner source (no write-back buffering
//! here -- that's the shadow source's job during a transaction) and are
//! mirrored into the cache so a read immediately after a write never
//! misses.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::error::Result;
use crate::source::{PageSource, WritablePageSource};

pub struct CachedSource<S> {
    inner: S,
    cache: Mutex<LruCache<u32, Box<[u8]>>>,
}

impl<S: PageSource> CachedSource<S> {
    pub fn new(inner: S, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: PageSource> PageSource for CachedSource<S> {
    fn page_size(&self) -> u32 {
        self.inner.page_size()
    }

    fn page_count(&self) -> u32 {
        self.inner.page_count()
    }

    fn read_page(&self, page_number: u32, out: &mut [u8]) -> Result<()> {
        let size = self.page_size() as usize;
        {
            let mut cache = self.cache.lock().expect("page cache mutex poisoned");
            if let Some(page) = cache.get(&page_number) {
                out[..size].copy_from_slice(page);
                return Ok(());
            }
        }

        self.inner.read_page(page_number, out)?;

        let mut cache = self.cache.lock().expect("page cache mutex poisoned");
        cache.put(page_number, out[..size].to_vec().into_boxed_slice());
        Ok(())
    }
}

impl<S: WritablePageSource> WritablePageSource for CachedSource<S> {
    fn write_page(&self, page_number: u32, data: &[u8]) -> Result<()> {
        self.inner.write_page(page_number, data)?;
        let mut cache = self.cache.lock().expect("page cache mutex poisoned");
        cache.put(page_number, data.to_vec().into_boxed_slice());
        Ok(())
    }

    fn set_page_count(&self, new_count: u32) -> Result<()> {
        self.inner.set_page_count(new_count)?;
        let mut cache = self.cache.lock().expect("page cache mutex poisoned");
        cache.clear();
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::MemorySource;

    #[test]
    fn read_after_write_hits_the_cache_not_the_inner_source() {
        let cached = CachedSource::new(MemorySource::new(512, 2), 4);
        cached.write_page(1, &vec![9u8; 512]).unwrap();

        let mut out = vec![0u8; 512];
        cached.read_page(1, &mut out).unwrap();
        assert_eq!(out, vec![9u8; 512]);
    }

    #[test]
    fn eviction_falls_back_to_inner_source() {
        let cached = CachedSource::new(MemorySource::new(512, 3), 1);
        cached.write_page(1, &vec![1u8; 512]).unwrap();
        cached.write_page(2, &vec![2u8; 512]).unwrap();

        let mut out = vec![0u8; 512];
        cached.read_page(1, &mut out).unwrap();
        assert_eq!(out, vec![1u8; 512]);
    }
}
