//! The b-tree layer: read-side cursors and write-side mutation, built on
//! top of `page::BTreePageView` and a `source::PageSource`.

pub mod cursor;
pub mod mutator;

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::source::PageSource;

/// Fetches one page as a reference-counted buffer, so descending the tree
/// only ever bumps a refcount rather than copying page bytes -- the same
/// trick the teacher's `ArcBufSlice` plays.
pub fn fetch_page(source: &dyn PageSource, page_number: u32) -> Result<Arc<[u8]>> {
    if page_number == 0 {
        return Err(Error::corrupt(0, "page number zero is never valid"));
    }
    let size = source.page_size() as usize;
    let mut buf = vec![0u8; size];
    source.read_page(page_number, &mut buf)?;
    Ok(Arc::from(buf.into_boxed_slice()))
}
