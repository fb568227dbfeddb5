//! A page source whose target can be swapped at runtime.
//!
//! Used by `Database` to let an open `Reader`/`PreparedQuery` keep using
//! the same `Arc<dyn PageSource>` handle across a VACUUM-style rebuild or
//! a reattach, rather than every long-lived handle needing to re-resolve
//! the current source on each call.

use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::source::PageSource;

pub struct ProxySource {
    target: RwLock<Arc<dyn PageSource>>,
}

impl ProxySource {
    pub fn new(target: Arc<dyn PageSource>) -> Self {
        Self {
            target: RwLock::new(target),
        }
    }

    pub fn retarget(&self, target: Arc<dyn PageSource>) {
        *self.target.write().expect("proxy source lock poisoned") = target;
    }
}

impl PageSource for ProxySource {
    fn page_size(&self) -> u32 {
        self.target.read().expect("proxy source lock poisoned").page_size()
    }

    fn page_count(&self) -> u32 {
        self.target.read().expect("proxy source lock poisoned").page_count()
    }

    fn read_page(&self, page_number: u32, out: &mut [u8]) -> Result<()> {
        self.target
            .read()
            .expect("proxy source lock poisoned")
            .read_page(page_number, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::MemorySource;
    use crate::source::WritablePageSource;

    #[test]
    fn retarget_redirects_subsequent_reads() {
        let first = Arc::new(MemorySource::new(512, 1));
        first.write_page(1, &vec![1u8; 512]).unwrap();
        let proxy = ProxySource::new(first.clone());

        let second = Arc::new(MemorySource::new(512, 1));
        second.write_page(1, &vec![2u8; 512]).unwrap();

        let mut out = vec![0u8; 512];
        proxy.read_page(1, &mut out).unwrap();
        assert_eq!(out[0], 1);

        proxy.retarget(second);
        proxy.read_page(1, &mut out).unwrap();
        assert_eq!(out[0], 2);
    }
}
